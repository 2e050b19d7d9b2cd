//! Small `poll(2)` helper shared by the main loop, in the same raw-libc style as the netlink
//! socket and the rest of this crate's syscall-adjacent code.

use std::io;
use std::os::fd::RawFd;

/// Polls `fds` for readability, waiting up to `timeout_ms` (`-1` blocks indefinitely, `0` never
/// blocks). Returns a same-length vector of readiness flags, one per input fd.
pub fn poll_readable(fds: &[RawFd], timeout_ms: i32) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if ret == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(vec![false; fds.len()]);
        }
        return Err(err);
    }

    Ok(pollfds.iter().map(|p| p.revents & libc::POLLIN != 0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn readable_pipe_is_reported() {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        nix::unistd::write(&write_end, b"x").unwrap();
        let ready = poll_readable(&[read_end.as_raw_fd()], 0).unwrap();
        assert_eq!(ready, vec![true]);
    }

    #[test]
    fn empty_pipe_is_not_reported() {
        let (read_end, _write_end) = nix::unistd::pipe().unwrap();
        let ready = poll_readable(&[read_end.as_raw_fd()], 0).unwrap();
        assert_eq!(ready, vec![false]);
    }
}
