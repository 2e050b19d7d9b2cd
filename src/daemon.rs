//! The main loop (C8): ties together netlink intake, the signal hub, the backlog, the child
//! table, the dispatcher and the coldplug coordinator, and owns the termination predicate.

use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

use crate::backlog::{BacklogQueue, DEFAULT_CAPACITY};
use crate::children::ChildTable;
use crate::cli::Config;
use crate::coldplug::{self, ColdplugState};
use crate::dispatcher::Dispatcher;
use crate::error::DaemonError;
use crate::event::Event;
use crate::netlink::{NetlinkSocket, get_kernel_seqnum};
use crate::poll::poll_readable;
use crate::rules::RuleSet;
use crate::signals::SignalHub;

/// Backlog-full / pool-saturated poll timeout (`HOTPLUG2_THROTTLE_INTERVAL`, nominal 100ms).
const THROTTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Owns every piece of process-wide daemon state and drives the main loop. Constructed once at
/// startup by [`Daemon::start`]; `run` never returns until the termination predicate (or a
/// SIGINT) ends it.
pub struct Daemon {
    netlink: NetlinkSocket,
    signals: SignalHub,
    children: ChildTable,
    backlog: BacklogQueue,
    coldplug_state: ColdplugState,
    persistent: bool,
    terminate_requested: bool,
    highest_seqnum: u64,
    dumb: bool,
    override_enabled: bool,
    max_children: usize,
    modprobe_command: String,
    rules: Option<RuleSet>,
}

impl Daemon {
    /// Runs the full startup sequence: load rules (or fall back to dumb mode), autodetect
    /// modprobe if unset, open the netlink socket, install the signal hub, and start coldplug.
    pub fn start(config: &Config) -> Result<Self, DaemonError> {
        let (dumb, rules) = if config.dumb() {
            (true, None)
        } else {
            match RuleSet::load(&config.rules_file) {
                Ok(rules) => (false, Some(rules)),
                Err(e) => {
                    log::warn!(
                        "rules file {:?} failed to load ({e}); falling back to dumb mode",
                        config.rules_file
                    );
                    (true, None)
                }
            }
        };

        // Autodetection always runs when unset, regardless of why dumb mode was entered.
        let modprobe_command = match &config.modprobe_cmd {
            Some(cmd) => cmd.clone(),
            None => crate::modprobe::autodetect().map_err(DaemonError::ModprobeAutodetect)?,
        };
        log::info!("using modprobe command: {modprobe_command}");

        let netlink = NetlinkSocket::open().map_err(DaemonError::NetlinkOpen)?;
        let signals = SignalHub::install().map_err(DaemonError::SignalSetup)?;
        let coldplug_state = coldplug::start(config.coldplug(), config.coldplug_command())?;

        Ok(Daemon {
            netlink,
            signals,
            children: ChildTable::new(),
            backlog: BacklogQueue::new(DEFAULT_CAPACITY),
            coldplug_state,
            persistent: config.persistent(),
            terminate_requested: false,
            highest_seqnum: 0,
            dumb,
            override_enabled: config.override_enabled(),
            max_children: config.max_children,
            modprobe_command,
            rules,
        })
    }

    /// Drives the main loop until the termination predicate holds or SIGINT requests an
    /// immediate exit, then runs cleanup.
    pub fn run(&mut self) {
        loop {
            self.drain_signals();
            if self.terminate_requested || self.should_terminate() {
                break;
            }
            self.step();
        }
        self.cleanup();
    }

    /// One iteration of the main loop: drain the backlog if a pool slot is free, throttle when
    /// it's full, otherwise poll for new input and dispatch it.
    fn step(&mut self) {
        let pool_available = self.children.len() < self.max_children;

        if !self.backlog.is_empty() && pool_available {
            let event = self.backlog.pop().expect("just checked non-empty");
            self.dispatch(event);
            return;
        }

        if self.backlog.is_full() {
            thread::sleep(THROTTLE_INTERVAL);
            return;
        }

        let timeout_ms = if self.backlog.is_empty() { -1 } else { THROTTLE_INTERVAL.as_millis() as i32 };
        let fds = [self.netlink.as_raw_fd(), self.signals.as_raw_fd()];
        let ready = match poll_readable(&fds, timeout_ms) {
            Ok(ready) => ready,
            Err(e) => {
                log::error!("poll failed: {e}");
                return;
            }
        };

        if !ready[0] {
            return;
        }

        match self.netlink.recv() {
            Ok(datagram) => {
                if let Some(event) = Event::decode(&datagram) {
                    self.dispatch(event);
                } else {
                    log::debug!("dropping undecodable uevent datagram ({} bytes)", datagram.len());
                }
            }
            Err(e) => log::error!("netlink recv failed: {e}"),
        }
    }

    fn dispatch(&mut self, event: Event) {
        let dispatcher = Dispatcher {
            dumb: self.dumb,
            override_enabled: self.override_enabled,
            max_children: self.max_children,
            modprobe_command: &self.modprobe_command,
            rules: self.rules.as_ref(),
        };
        dispatcher.dispatch(event, &mut self.children, &mut self.backlog, &mut self.highest_seqnum);
    }

    /// Drains every pending signal, reaping children and toggling persistence as needed.
    fn drain_signals(&mut self) {
        let mut signals_seen = Vec::new();
        if let Err(e) = self.signals.drain(|sig| signals_seen.push(sig)) {
            log::error!("signal hub drain failed: {e}");
        }

        for sig in signals_seen {
            match sig {
                Signal::SIGINT => {
                    log::info!("received SIGINT, shutting down");
                    self.terminate_requested = true;
                }
                Signal::SIGUSR1 => {
                    self.persistent = !self.persistent;
                    log::info!("received SIGUSR1, persistent={}", self.persistent);
                }
                Signal::SIGCHLD => self.reap_children(),
                _ => {}
            }
        }
    }

    fn reap_children(&mut self) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => {
                    let Some(pid) = status.pid() else { continue };
                    if self.coldplug_state.pid() == Some(pid) {
                        log::info!("coldplug helper (pid {pid}) finished");
                        self.coldplug_state = ColdplugState::Finished;
                    } else if self.children.remove(pid) {
                        log::debug!("reaped worker pid={pid}");
                    }
                }
                Err(nix::errno::Errno::ECHILD) => break,
                Err(e) => {
                    log::error!("waitpid failed: {e}");
                    break;
                }
            }
        }
    }

    /// Quiescence predicate: not persistent, coldplug finished, no live children, and the
    /// daemon has seen every event the kernel has issued so far.
    fn should_terminate(&self) -> bool {
        !self.persistent
            && self.coldplug_state.is_finished()
            && self.children.is_empty()
            && self.highest_seqnum == get_kernel_seqnum()
    }

    fn cleanup(&mut self) {
        log::info!("shutting down: waiting for {} outstanding worker(s)", self.children.len());
        loop {
            match waitpid(None, None) {
                Ok(_) => continue,
                Err(nix::errno::Errno::ECHILD) => break,
                Err(e) => {
                    log::error!("waitpid during cleanup failed: {e}");
                    break;
                }
            }
        }
        if let Err(e) = SignalHub::restore_defaults() {
            log::warn!("failed to restore default signal dispositions: {e}");
        }
        log::info!("shutdown complete");
    }
}
