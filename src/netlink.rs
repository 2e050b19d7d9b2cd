//! Netlink uevent intake (C1) and the kernel-side sequence counter observable.

use std::fs;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::{
    AF_NETLINK, NETLINK_KOBJECT_UEVENT, SOCK_CLOEXEC, SOCK_DGRAM, bind, c_int, recv, sa_family_t,
    sockaddr_nl, socket, socklen_t, ssize_t,
};

/// Multicast group for kernel-originated uevents (`1`, per the kernel ABI).
const UEVENT_GROUP: u32 = 1;

/// At least 16 KiB, plus a reserve for a worst-case datagram and a trailing sentinel byte.
const RECV_BUFFER_SIZE: usize = 16 * 1024 + 512;

fn cvt(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_ssize(mut f: impl FnMut() -> ssize_t) -> io::Result<ssize_t> {
    loop {
        let ret = f();
        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        } else {
            return Ok(ret);
        }
    }
}

/// An open netlink socket subscribed to the kernel's uevent broadcast group.
///
/// No internal buffering: every call to [`NetlinkSocket::recv`] issues one `recv(2)` and yields
/// exactly one datagram (or an error, which is logged by the caller and does not close the
/// socket).
pub struct NetlinkSocket {
    fd: OwnedFd,
}

impl NetlinkSocket {
    /// Opens the socket and binds it to the kernel-events multicast group.
    pub fn open() -> io::Result<Self> {
        unsafe {
            let fd = OwnedFd::from_raw_fd(cvt(socket(
                AF_NETLINK,
                SOCK_DGRAM | SOCK_CLOEXEC,
                NETLINK_KOBJECT_UEVENT,
            ))?);

            let mut addr: sockaddr_nl = mem::zeroed();
            addr.nl_family = AF_NETLINK as sa_family_t;
            addr.nl_pid = 0; // let the kernel assign our netlink port id
            addr.nl_groups = UEVENT_GROUP;
            cvt(bind(
                fd.as_raw_fd(),
                (&raw const addr).cast(),
                size_of_val(&addr) as socklen_t,
            ))?;

            Ok(Self { fd })
        }
    }

    /// Receives exactly one datagram, blocking until one is available.
    ///
    /// A zero-length or errored `recv(2)` is returned to the caller as `Ok(Vec::new())` /
    /// `Err(_)` respectively; callers are expected to log and continue rather than close the
    /// socket.
    pub fn recv(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let n = cvt_ssize(|| unsafe {
            recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
            )
        })?;
        buf.truncate(n as usize);
        Ok(buf)
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Path to the kernel-wide uevent sequence counter, used only for quiescence detection.
const KERNEL_SEQNUM_PATH: &str = "/sys/kernel/uevent_seqnum";

/// Reads the kernel-wide uevent sequence counter.
///
/// Used only by the termination predicate. If the sysfs file can't be read (e.g. in a container
/// without `/sys` mounted, or during tests), this returns `0`, which simply means the
/// termination predicate's seqnum-equality clause never becomes true, so the daemon only exits
/// on an explicit SIGUSR1/SIGINT instead of auto-quiescing.
pub fn get_kernel_seqnum() -> u64 {
    fs::read_to_string(KERNEL_SEQNUM_PATH)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
