//! The rule engine capability (C11).
//!
//! The core dispatcher depends only on the capability described in the module-level docs below
//! ([`RuleSet::flags_eval`], [`RuleSet::execute`]); the rule *language* is an external concern
//! that this crate bundles a deliberately minimal reference implementation of, so that rule mode
//! can be exercised end to end without a real rule-language parser. See the design notes for why
//! the grammar below is intentionally small.
//!
//! # Rules file format
//!
//! One rule per non-blank, non-`#`-comment line:
//!
//! ```text
//! SUBSYSTEM=usb,ACTION=add:NOTHROTTLE
//! SUBSYSTEM=block:
//! ```
//!
//! Conditions (left of `:`) are comma-separated `KEY=VALUE` pairs, ANDed together; a leading `!`
//! on a condition negates it (`!SUBSYSTEM=usb` matches everything *except* `SUBSYSTEM=usb`).
//! Flags (right of `:`) are comma-separated flag names; an empty flags list is valid and means
//! "no flags set" (`FLAG_UNSET`).

use std::fs;
use std::io;
use std::path::Path;

use bitflags::bitflags;

use crate::event::Event;

bitflags! {
    /// Per-rule gating flags.
    ///
    /// `FLAG_ALL` is not a set of individually meaningful bits, it is the sentinel
    /// [`flags_eval`] returns when *no* rule matched the event at all, which the dispatcher
    /// interprets as "skip this event entirely". This inverts the intuitive reading of "all
    /// flags set" and is preserved verbatim from the original daemon rather than renamed, since
    /// rewording it would be indistinguishable from a silent behavior change to anyone diffing
    /// against the original. `FLAG_UNSET` ("no flags apply") is the default used outside of
    /// override pre-evaluation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlagMask: u32 {
        const NOTHROTTLE = 1 << 0;
    }
}

impl FlagMask {
    /// Sentinel returned by [`RuleSet::flags_eval`] when no rule matched the event.
    pub const ALL: FlagMask = FlagMask::from_bits_truncate(u32::MAX);
    /// Default flags outside of override pre-evaluation: every gating decision defaults on.
    pub const UNSET: FlagMask = FlagMask::empty();

    fn parse_name(name: &str) -> Option<FlagMask> {
        match name {
            "NOTHROTTLE" => Some(FlagMask::NOTHROTTLE),
            _ => None,
        }
    }
}

/// A single ANDed condition: `key` must (or, if negated, must not) equal `expected`.
#[derive(Debug, Clone)]
struct Condition {
    key: String,
    expected: String,
    negate: bool,
}

impl Condition {
    fn matches(&self, event: &Event) -> bool {
        let actual = event.get_value(&self.key);
        let eq = actual == Some(self.expected.as_str());
        eq != self.negate
    }
}

/// One rule: a conjunction of conditions plus the flags that apply when all of them match.
#[derive(Debug, Clone)]
pub struct Rule {
    conditions: Vec<Condition>,
    flags: FlagMask,
}

impl Rule {
    fn matches(&self, event: &Event) -> bool {
        self.conditions.iter().all(|c| c.matches(event))
    }

    fn parse(line: &str) -> Result<Self, RuleParseError> {
        let (cond_part, flag_part) = line
            .split_once(':')
            .ok_or_else(|| RuleParseError(format!("missing ':' in rule line: {line:?}")))?;

        let mut conditions = Vec::new();
        for cond in cond_part.split(',') {
            let cond = cond.trim();
            if cond.is_empty() {
                return Err(RuleParseError(format!("empty condition in rule: {line:?}")));
            }
            let (negate, cond) = match cond.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, cond),
            };
            let (key, expected) = cond
                .split_once('=')
                .ok_or_else(|| RuleParseError(format!("condition missing '=': {cond:?}")))?;
            conditions.push(Condition {
                key: key.trim().to_string(),
                expected: expected.trim().to_string(),
                negate,
            });
        }

        let mut flags = FlagMask::UNSET;
        for name in flag_part.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let flag = FlagMask::parse_name(name)
                .ok_or_else(|| RuleParseError(format!("unknown flag name: {name:?}")))?;
            flags |= flag;
        }

        Ok(Rule { conditions, flags })
    }
}

/// Failure to parse a line of a rules file. The caller (startup) treats any such failure as a
/// whole-file parse failure and falls back to dumb mode.
#[derive(Debug)]
pub struct RuleParseError(String);

impl std::fmt::Display for RuleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RuleParseError {}

/// A loaded set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Parses a rules file. One rule per non-blank, non-comment line; see the module
    /// documentation for the grammar. The whole file fails to load if any line fails to parse.
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let text = fs::read_to_string(path).map_err(RuleLoadError::Io)?;
        Self::parse(&text).map_err(RuleLoadError::Parse)
    }

    fn parse(text: &str) -> Result<Self, RuleParseError> {
        let mut rules = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            rules.push(Rule::parse(line)?);
        }
        Ok(RuleSet { rules })
    }

    /// Iterates the rules that match `event`, in file order, running each one's action.
    ///
    /// The bundled rule language has no action beyond "this rule's flags apply", so there is
    /// nothing further to execute here. Real-world hotplug actions are the dumb-mode modprobe
    /// invocation; a fuller rule language that can itself exec arbitrary helpers is explicitly
    /// out of scope for this bundled implementation.
    pub fn execute(&self, event: &Event) {
        for rule in &self.rules {
            if rule.matches(event) {
                log::debug!("rule matched event (seqnum={})", event.seqnum());
            }
        }
    }

    /// ANDs together the flags of every rule that matches `event`.
    ///
    /// Returns [`FlagMask::ALL`] if no rule matched at all. The dispatcher's override-mode
    /// pre-evaluation path interprets that as "nothing applies to this event" and skips it
    /// entirely. This is the inverted-reading sentinel documented on [`FlagMask`].
    pub fn flags_eval(&self, event: &Event) -> FlagMask {
        let mut flags = FlagMask::ALL;
        let mut matched_any = false;

        for rule in &self.rules {
            if rule.matches(event) {
                matched_any = true;
                flags &= rule.flags;
            }
        }

        if matched_any { flags } else { FlagMask::ALL }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Failure to load a rules file, distinguishing I/O failure from a parse failure so the caller
/// can log the right diagnostic (both fall back to dumb mode identically).
#[derive(Debug)]
pub enum RuleLoadError {
    Io(io::Error),
    Parse(RuleParseError),
}

impl std::fmt::Display for RuleLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleLoadError::Io(e) => write!(f, "unable to open/read rules file: {e}"),
            RuleLoadError::Parse(e) => write!(f, "unable to parse rules file: {e}"),
        }
    }
}

impl std::error::Error for RuleLoadError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(env: &[&str]) -> Event {
        let mut dg = String::from("add@/devices/x\0SEQNUM=1\0");
        for kv in env {
            dg.push_str(kv);
            dg.push('\0');
        }
        Event::decode(dg.as_bytes()).unwrap()
    }

    #[test]
    fn matching_rule_contributes_flags() {
        let rs = RuleSet::parse("SUBSYSTEM=usb:NOTHROTTLE\n").unwrap();
        let matching = ev(&["SUBSYSTEM=usb"]);
        assert_eq!(rs.flags_eval(&matching), FlagMask::NOTHROTTLE);
    }

    #[test]
    fn no_matching_rule_yields_flag_all() {
        let rs = RuleSet::parse("SUBSYSTEM=block:\n").unwrap();
        let non_matching = ev(&["SUBSYSTEM=usb"]);
        assert_eq!(rs.flags_eval(&non_matching), FlagMask::ALL);
    }

    #[test]
    fn empty_ruleset_yields_flag_all() {
        let rs = RuleSet::default();
        assert_eq!(rs.flags_eval(&ev(&[])), FlagMask::ALL);
    }

    #[test]
    fn negated_condition() {
        let rs = RuleSet::parse("!SUBSYSTEM=usb:\n").unwrap();
        assert!(rs.flags_eval(&ev(&["SUBSYSTEM=block"])) != FlagMask::ALL);
        assert_eq!(rs.flags_eval(&ev(&["SUBSYSTEM=usb"])), FlagMask::ALL);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let rs = RuleSet::parse("# a comment\n\nSUBSYSTEM=usb:\n").unwrap();
        assert_eq!(rs.rules.len(), 1);
    }

    #[test]
    fn malformed_line_fails_whole_file() {
        assert!(RuleSet::parse("this has no colon or equals\n").is_err());
    }

    #[test]
    fn multiple_matching_rules_and_their_flags() {
        let rs = RuleSet::parse("SUBSYSTEM=usb:NOTHROTTLE\nACTION=add:\n").unwrap();
        // First rule sets NOTHROTTLE, second (matching, flags empty) ANDs it away.
        assert_eq!(
            rs.flags_eval(&ev(&["SUBSYSTEM=usb", "ACTION=add"])),
            FlagMask::UNSET
        );
    }
}
