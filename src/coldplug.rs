//! The coldplug coordinator (C7).

use std::ffi::CString;
use std::io;

use nix::unistd::{ForkResult, Pid, execvp, fork};

use crate::error::DaemonError;

/// Default coldplug command when `--set-coldplug-cmd` is not given: a `udevtrigger`-compatible
/// invocation.
pub const DEFAULT_COLDPLUG_COMMAND: &str = "udevtrigger";

/// Coldplug's lifecycle, as observed by the rest of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdplugState {
    /// Coldplug was disabled; treated as immediately finished.
    Finished,
    /// The helper is running as the given pid.
    Running(Pid),
}

impl ColdplugState {
    pub fn is_finished(self) -> bool {
        matches!(self, ColdplugState::Finished)
    }

    /// If running, the pid to compare reaped pids against.
    pub fn pid(self) -> Option<Pid> {
        match self {
            ColdplugState::Running(pid) => Some(pid),
            ColdplugState::Finished => None,
        }
    }
}

/// If `enabled`, forks and execs `command` once, returning its pid. If not, coldplug is treated
/// as immediately finished.
pub fn start(enabled: bool, command: &str) -> Result<ColdplugState, DaemonError> {
    if !enabled {
        return Ok(ColdplugState::Finished);
    }

    // Safety: single-threaded at this point in startup, before the main loop or any worker
    // fork has occurred.
    match unsafe { fork() }.map_err(io::Error::from).map_err(DaemonError::ColdplugFork)? {
        ForkResult::Parent { child } => {
            log::info!("coldplug: spawned helper '{command}' as pid {child}");
            Ok(ColdplugState::Running(child))
        }
        ForkResult::Child => {
            if let Err(e) = crate::signals::SignalHub::unblock_for_child() {
                log::error!("coldplug helper failed to unblock signals: {e}");
                std::process::exit(1);
            }
            let err = DaemonError::ColdplugExec {
                command: command.to_string(),
                source: exec_helper(command),
            };
            log::error!("{err}");
            std::process::exit(1);
        }
    }
}

fn exec_helper(command: &str) -> io::Error {
    let Ok(cmd) = CString::new(command) else {
        return io::Error::new(io::ErrorKind::InvalidInput, "command contains a NUL byte");
    };
    // execvp(argv[0], argv) with argv == [command]
    match execvp(&cmd, &[cmd.clone()]) {
        Ok(_) => unreachable!("execvp only returns on failure"),
        Err(errno) => io::Error::from(errno),
    }
}
