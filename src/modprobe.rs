//! Modprobe autodetection (C9).
//!
//! At startup, if no explicit modprobe command was given, forks a child that execs
//! `modprobe --version`, reads the first 17 bytes of its stdout, and picks between the system
//! `modprobe` (if it identifies as `module-init-tools`) and a bundled dependency-resolving
//! wrapper otherwise (e.g. BusyBox's `modprobe`, which can't resolve aliases by itself).

use std::ffi::CString;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, dup2, execvp, fork, pipe};

/// Command used when the system modprobe identifies as `module-init-tools`.
const SYSTEM_MODPROBE: &str = "/sbin/modprobe";
/// Fallback command for modprobe implementations that can't resolve aliases (e.g. BusyBox).
const DEPWRAP_MODPROBE: &str = "/sbin/hotplug2-depwrap";

const VERSION_MAGIC: &[u8] = b"module-init-tools";

/// Picks the modprobe command to use for the rest of the daemon's lifetime.
pub fn autodetect() -> io::Result<String> {
    let (read_end, write_end): (OwnedFd, OwnedFd) = pipe().map_err(io::Error::from)?;

    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { child } => {
            drop(write_end);
            let mut file = unsafe { std::fs::File::from_raw_fd(read_end.as_raw_fd()) };
            std::mem::forget(read_end); // ownership moved into `file`

            let mut buf = [0u8; 17];
            let mut total = 0;
            while total < buf.len() {
                match file.read(&mut buf[total..]) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            let _ = waitpid(child, None);

            if &buf[..total] == VERSION_MAGIC {
                Ok(SYSTEM_MODPROBE.to_string())
            } else {
                Ok(DEPWRAP_MODPROBE.to_string())
            }
        }
        ForkResult::Child => {
            drop(read_end);
            if dup2(write_end.as_raw_fd(), 1).is_err() {
                std::process::exit(1);
            }

            let prog = CString::new(SYSTEM_MODPROBE).unwrap();
            let version_flag = CString::new("--version").unwrap();
            let _ = execvp(&prog, &[prog.clone(), version_flag]);
            // Only reached if exec failed; the parent sees a closed pipe with no magic bytes
            // and falls back to the depwrap command, same outcome as the original daemon.
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autodetect_returns_one_of_the_two_commands() {
        // This forks a real child and execs `/sbin/modprobe --version`, which may not exist in
        // a sandboxed test environment; accept either outcome (a chosen command, or an I/O
        // error from the pipe/fork machinery itself) without asserting on the exec result.
        match autodetect() {
            Ok(cmd) => assert!(cmd == SYSTEM_MODPROBE || cmd == DEPWRAP_MODPROBE),
            Err(_) => {}
        }
    }
}
