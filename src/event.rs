//! The parsed uevent record ([`Event`]) and its decoder.
//!
//! A uevent datagram looks like `ACTION@DEVPATH\0KEY1=VAL1\0KEY2=VAL2\0...`. [`Event::decode`]
//! turns the raw bytes the kernel hands us on the netlink socket into a structured record; the
//! rest of the daemon never looks at the datagram bytes directly again, except to hand the
//! original `raw` bytes to a forked worker that wants to re-serialize them.

use std::path::Path;

/// The action a uevent announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
    /// Anything other than `add`/`remove` (e.g. `change`, `move`, `bind`).
    Unknown,
}

impl Action {
    fn parse(s: &str) -> Self {
        match s {
            "add" => Action::Add,
            "remove" => Action::Remove,
            _ => Action::Unknown,
        }
    }
}

/// A single `KEY=VALUE` entry from the uevent environment, in kernel delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// A fully parsed uevent.
///
/// See the decoder contract on [`Event::decode`] for exactly which datagrams produce an `Event`
/// and which are rejected outright.
#[derive(Debug, Clone)]
pub struct Event {
    action: Action,
    /// `KEY=VALUE` pairs in kernel order, plus the synthetic `DEVICENAME` entry injected right
    /// after `DEVPATH` (see [`Event::decode`]).
    env: Vec<EnvVar>,
    /// The verbatim datagram bytes, kept around so a forked worker can re-serialize the event.
    raw: Vec<u8>,
    /// Extracted from the `SEQNUM` env entry. Every `Event` that exists has one: decoding fails
    /// outright for datagrams that don't carry a parseable `SEQNUM`.
    seqnum: u64,
}

impl Event {
    /// Decodes a raw uevent datagram.
    ///
    /// Returns `None` if the first NUL-terminated token doesn't contain an `@` (no
    /// `action@devpath` header), or if no `SEQNUM=` entry is present or parseable. Malformed
    /// `KEY=VALUE` entries (missing `=`) are skipped individually and do not abort decoding.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        let first_nul = datagram
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(datagram.len());
        let header = std::str::from_utf8(&datagram[..first_nul]).ok()?;
        let at = header.find('@')?;
        let action = Action::parse(&header[..at]);

        let mut env = Vec::new();
        let mut offset = first_nul + 1;
        while offset < datagram.len() {
            let end = datagram[offset..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| offset + p)
                .unwrap_or(datagram.len());

            if end > offset {
                if let Ok(entry) = std::str::from_utf8(&datagram[offset..end]) {
                    push_env(&mut env, entry);
                }
            }

            offset = end + 1;
        }

        let seqnum = env
            .iter()
            .find(|kv| kv.key == "SEQNUM")
            .and_then(|kv| kv.value.parse().ok())?;

        Some(Event {
            action,
            env,
            raw: datagram.to_vec(),
            seqnum,
        })
    }

    /// The action this event announces.
    pub fn action(&self) -> Action {
        self.action
    }

    /// The event's sequence number, as extracted from its `SEQNUM` entry.
    pub fn seqnum(&self) -> u64 {
        self.seqnum
    }

    /// The raw datagram bytes this event was decoded from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// All `KEY=VALUE` pairs, in kernel order (plus the synthetic `DEVICENAME`, if any).
    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    /// Looks up the first value for `key`. Comparisons are case-sensitive.
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}

/// Splits `entry` at its first `=` and appends it to `env`. Appends a synthetic `DEVICENAME`
/// entry right after any `DEVPATH` entry, as the original daemon does.
fn push_env(env: &mut Vec<EnvVar>, entry: &str) {
    let Some(eq) = entry.find('=') else {
        // Malformed env string (no `=`); skip it but keep decoding.
        return;
    };
    let key = &entry[..eq];
    let value = &entry[eq + 1..];

    env.push(EnvVar {
        key: key.to_string(),
        value: value.to_string(),
    });

    if key == "DEVPATH" {
        let name = Path::new(value)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| value.to_string());
        env.push(EnvVar {
            key: "DEVICENAME".to_string(),
            value: name,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(parts: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for part in parts {
            buf.extend_from_slice(part.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn decodes_add_event_with_modalias() {
        let dg = datagram(&[
            "add@/devices/x",
            "ACTION=add",
            "DEVPATH=/devices/x",
            "SEQNUM=42",
            "MODALIAS=pci:v00008086d00001234",
        ]);
        let ev = Event::decode(&dg).unwrap();
        assert_eq!(ev.action(), Action::Add);
        assert_eq!(ev.seqnum(), 42);
        assert_eq!(ev.get_value("MODALIAS"), Some("pci:v00008086d00001234"));
        // synthetic DEVICENAME is injected right after DEVPATH
        assert_eq!(ev.get_value("DEVICENAME"), Some("x"));
    }

    #[test]
    fn no_at_sign_yields_none() {
        let dg = datagram(&["nodevpathhere", "SEQNUM=1"]);
        assert!(Event::decode(&dg).is_none());
    }

    #[test]
    fn missing_seqnum_yields_none() {
        let dg = datagram(&["add@/devices/x", "ACTION=add"]);
        assert!(Event::decode(&dg).is_none());
    }

    #[test]
    fn empty_env_after_at_sign_still_requires_seqnum() {
        let dg = b"add@/devices/x\0".to_vec();
        assert!(Event::decode(&dg).is_none());
    }

    #[test]
    fn malformed_entry_is_skipped_not_fatal() {
        let dg = datagram(&["add@/devices/x", "GARBAGE_NO_EQUALS", "SEQNUM=7"]);
        let ev = Event::decode(&dg).unwrap();
        assert_eq!(ev.seqnum(), 7);
        assert!(ev.get_value("GARBAGE_NO_EQUALS").is_none());
    }

    #[test]
    fn unknown_action() {
        let dg = datagram(&["change@/devices/x", "SEQNUM=3"]);
        let ev = Event::decode(&dg).unwrap();
        assert_eq!(ev.action(), Action::Unknown);
    }

    #[test]
    fn env_order_is_preserved_ignoring_devicename() {
        let dg = datagram(&[
            "add@/devices/x",
            "SUBSYSTEM=usb",
            "DEVPATH=/devices/x",
            "SEQNUM=9",
        ]);
        let ev = Event::decode(&dg).unwrap();
        let keys_without_devicename: Vec<_> = ev
            .env()
            .iter()
            .map(|kv| kv.key.as_str())
            .filter(|k| *k != "DEVICENAME")
            .collect();
        assert_eq!(keys_without_devicename, ["SUBSYSTEM", "DEVPATH", "SEQNUM"]);
    }
}
