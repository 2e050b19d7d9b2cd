//! CLI argument parsing (C10, ambient).

use std::path::PathBuf;

use clap::Parser;

use crate::coldplug::DEFAULT_COLDPLUG_COMMAND;

/// Compile-time default rules file path (`HOTPLUG2_RULE_PATH` in the original daemon).
pub const DEFAULT_RULES_PATH: &str = "/etc/hotplugd/rules";

/// Default worker-pool cap.
pub const DEFAULT_MAX_CHILDREN: usize = 20;

/// A Linux hotplug event multiplexer.
///
/// Subscribes to the kernel's uevent netlink broadcast, matches each event against a rule
/// program (or runs in dumb mode), and spawns short-lived workers to act on matches.
#[derive(Debug, Parser)]
#[command(name = "hotplugd", version, about)]
pub struct Config {
    /// Keep running after quiescence instead of exiting.
    #[arg(long = "persistent", action = clap::ArgAction::SetTrue)]
    persistent: bool,
    #[arg(long = "no-persistent", action = clap::ArgAction::SetTrue, conflicts_with = "persistent")]
    no_persistent: bool,

    /// Run the coldplug trigger helper at startup.
    #[arg(long = "coldplug", visible_alias = "udevtrigger", action = clap::ArgAction::SetTrue)]
    coldplug: bool,
    #[arg(long = "no-coldplug", visible_alias = "no-udevtrigger", action = clap::ArgAction::SetTrue, conflicts_with = "coldplug")]
    no_coldplug: bool,

    /// Enable flag pre-evaluation short-circuit (rule mode only).
    #[arg(long = "override", action = clap::ArgAction::SetTrue)]
    override_: bool,
    #[arg(long = "no-override", action = clap::ArgAction::SetTrue, conflicts_with = "override_")]
    no_override: bool,

    /// Bypass the rule engine; only `ADD` events carrying `MODALIAS` trigger a module load.
    #[arg(long = "dumb", action = clap::ArgAction::SetTrue)]
    dumb: bool,
    #[arg(long = "no-dumb", action = clap::ArgAction::SetTrue, conflicts_with = "dumb")]
    no_dumb: bool,

    /// Worker-pool cap.
    #[arg(long = "max-children", default_value_t = DEFAULT_MAX_CHILDREN)]
    pub max_children: usize,

    /// Coldplug helper path.
    #[arg(long = "set-coldplug-cmd", value_name = "PATH")]
    coldplug_cmd: Option<String>,

    /// Module loader path. If unset, autodetected at startup.
    #[arg(long = "set-modprobe-cmd", value_name = "PATH")]
    pub modprobe_cmd: Option<String>,

    /// Rules file.
    #[arg(long = "set-rules-file", value_name = "PATH", default_value = DEFAULT_RULES_PATH)]
    pub rules_file: PathBuf,

    /// Increase log verbosity. Repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    /// Resolved `persistent` flag (default: off).
    pub fn persistent(&self) -> bool {
        self.persistent && !self.no_persistent
    }

    /// Resolved `coldplug` flag (default: on).
    pub fn coldplug(&self) -> bool {
        !self.no_coldplug
    }

    /// Resolved `override` flag (default: off).
    pub fn override_enabled(&self) -> bool {
        self.override_ && !self.no_override
    }

    /// Resolved `dumb` flag (default: off; forced on if rules loading fails at startup).
    pub fn dumb(&self) -> bool {
        self.dumb && !self.no_dumb
    }

    /// Coldplug command, defaulting to a `udevtrigger`-compatible invocation.
    pub fn coldplug_command(&self) -> &str {
        self.coldplug_cmd
            .as_deref()
            .unwrap_or(DEFAULT_COLDPLUG_COMMAND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::parse_from(["hotplugd"]);
        assert!(!cfg.persistent());
        assert!(cfg.coldplug());
        assert!(!cfg.override_enabled());
        assert!(!cfg.dumb());
        assert_eq!(cfg.max_children, DEFAULT_MAX_CHILDREN);
        assert_eq!(cfg.coldplug_command(), DEFAULT_COLDPLUG_COMMAND);
        assert_eq!(cfg.rules_file, PathBuf::from(DEFAULT_RULES_PATH));
    }

    #[test]
    fn no_coldplug_disables_it() {
        let cfg = Config::parse_from(["hotplugd", "--no-coldplug"]);
        assert!(!cfg.coldplug());
    }

    #[test]
    fn udevtrigger_alias_is_accepted() {
        let cfg = Config::parse_from(["hotplugd", "--udevtrigger"]);
        assert!(cfg.coldplug());
    }

    #[test]
    fn max_children_override() {
        let cfg = Config::parse_from(["hotplugd", "--max-children", "5"]);
        assert_eq!(cfg.max_children, 5);
    }
}
