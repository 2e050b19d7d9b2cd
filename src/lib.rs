//! A Linux hotplug event multiplexer: netlink uevent intake, rule-driven dispatch, and bounded
//! worker-process control.
//!
//! See [`daemon::Daemon`] for the entry point used by the `hotplugd` binary; the rest of this
//! crate's modules are each one component of the pipeline described in its own module docs.

pub mod backlog;
pub mod children;
pub mod cli;
pub mod coldplug;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod modprobe;
pub mod netlink;
pub mod poll;
pub mod rules;
pub mod signals;
