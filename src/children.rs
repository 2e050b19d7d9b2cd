//! The live-worker table (C3).

use nix::unistd::Pid;

/// One entry per live worker process.
#[derive(Debug, Clone, Copy)]
pub struct ChildRecord {
    pub pid: Pid,
    /// The seqnum of the `Event` that caused this worker to be spawned.
    pub seqnum: u64,
}

/// Tracks live worker PIDs and the seqnum of the event that spawned each one.
///
/// Insertion only happens on a successful `fork`; removal only happens when SIGCHLD reaping
/// observes a matching PID. There is no ordering guarantee, and no zombie entries are ever
/// stored: a reap for a PID this table doesn't recognize (e.g. the coldplug helper) is silently
/// ignored here. The caller is responsible for handling that case (see the coldplug
/// coordinator).
#[derive(Debug, Default)]
pub struct ChildTable {
    children: Vec<ChildRecord>,
}

impl ChildTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly forked worker.
    pub fn insert(&mut self, pid: Pid, seqnum: u64) {
        self.children.push(ChildRecord { pid, seqnum });
    }

    /// Removes the entry for `pid`, if any. Returns `true` if an entry was removed.
    pub fn remove(&mut self, pid: Pid) -> bool {
        let len_before = self.children.len();
        self.children.retain(|c| c.pid != pid);
        self.children.len() != len_before
    }

    /// Number of live workers. Always equal to the number of entries in the table.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn insert_and_remove() {
        let mut table = ChildTable::new();
        assert!(table.is_empty());

        table.insert(pid(100), 1);
        table.insert(pid(101), 2);
        assert_eq!(table.len(), 2);

        assert!(table.remove(pid(100)));
        assert_eq!(table.len(), 1);

        // Removing an unknown PID (e.g. the coldplug helper) is a silent no-op.
        assert!(!table.remove(pid(999)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn count_matches_len_invariant() {
        let mut table = ChildTable::new();
        for i in 0..5 {
            table.insert(pid(1000 + i), i as u64);
        }
        assert_eq!(table.len(), 5);
        table.remove(pid(1002));
        assert_eq!(table.len(), 4);
    }
}
