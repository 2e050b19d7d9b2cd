//! Startup-fatal error type.
//!
//! Everything else in the daemon is logged and absorbed in place; only failures during the
//! fallible startup sequence (before the main loop begins) ever escape as a `Result`.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("unable to open netlink uevent socket")]
    NetlinkOpen(#[source] io::Error),

    #[error("unable to autodetect modprobe command")]
    ModprobeAutodetect(#[source] io::Error),

    #[error("unable to fork coldplug helper")]
    ColdplugFork(#[source] io::Error),

    #[error("unable to exec coldplug helper '{command}'")]
    ColdplugExec {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to install signal hub")]
    SignalSetup(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
