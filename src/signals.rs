//! The signal hub (C5), implemented as a self-pipe via `signalfd`.
//!
//! Rather than mutating daemon state from inside an async-signal-handler context, a known hazard
//! for anything beyond the handful of operations POSIX guarantees are safe there, SIGINT,
//! SIGUSR1 and SIGCHLD are blocked process-wide and instead delivered through a `signalfd`,
//! which the main loop polls exactly like the netlink socket. All of the bookkeeping (reaping,
//! persistence toggling, quiescence checks) therefore runs in ordinary, non-signal-handler code.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use nix::sys::signal::{SigSet, SigmaskHow, Signal, sigprocmask};
use nix::sys::signalfd::{SfdFlags, SignalFd};

/// Wraps a `signalfd` pre-armed for SIGINT, SIGUSR1 and SIGCHLD.
pub struct SignalHub {
    fd: SignalFd,
}

impl SignalHub {
    /// Blocks SIGINT/SIGUSR1/SIGCHLD process-wide and opens a non-blocking `signalfd` for them.
    ///
    /// Must be called once, early at startup, before any code that wants to observe these
    /// signals synchronously (e.g. `waitpid`) relies on the old default disposition.
    pub fn install() -> io::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGUSR1);
        mask.add(Signal::SIGCHLD);

        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(io::Error::from)?;

        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(io::Error::from)?;

        Ok(Self { fd })
    }

    /// Drains all currently pending signals from the `signalfd`, invoking `on_signal` for each.
    /// Returns once the `signalfd` has no more pending signals to report.
    pub fn drain(&mut self, mut on_signal: impl FnMut(Signal)) -> io::Result<()> {
        loop {
            match self.fd.read_signal() {
                Ok(Some(info)) => {
                    if let Ok(sig) = Signal::try_from(info.ssi_signo as i32) {
                        on_signal(sig);
                    }
                }
                Ok(None) => return Ok(()),
                Err(nix::errno::Errno::EAGAIN) => return Ok(()),
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    /// Unblocks SIGINT, SIGUSR1 and SIGCHLD in the calling process.
    ///
    /// `install` blocks these process-wide so the main loop can drain them cooperatively through
    /// the `signalfd`; that block survives `fork`. A forked worker or coldplug helper that execs
    /// an external program must not inherit it, so this is the self-pipe equivalent of restoring
    /// default SIGCHLD and SIGUSR1 handlers in the forked child. Callers invoke this once,
    /// immediately after `fork`, in the child branch, before running any worker logic.
    pub fn unblock_for_child() -> io::Result<()> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGUSR1);
        mask.add(Signal::SIGCHLD);
        sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None).map_err(io::Error::from)
    }

    /// Restores default dispositions for SIGINT, SIGUSR1 and SIGCHLD, and unblocks them. Used by
    /// the cleanup path so that a lingering signal after shutdown behaves normally.
    pub fn restore_defaults() -> io::Result<()> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGUSR1);
        mask.add(Signal::SIGCHLD);

        unsafe {
            nix::sys::signal::signal(Signal::SIGINT, nix::sys::signal::SigHandler::SigDfl)
                .map_err(io::Error::from)?;
            nix::sys::signal::signal(Signal::SIGUSR1, nix::sys::signal::SigHandler::SigDfl)
                .map_err(io::Error::from)?;
            nix::sys::signal::signal(Signal::SIGCHLD, nix::sys::signal::SigHandler::SigDfl)
                .map_err(io::Error::from)?;
        }
        sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None).map_err(io::Error::from)?;
        Ok(())
    }
}

impl AsRawFd for SignalHub {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
