//! Lockset + vector-clock race detection over committed accesses.
//!
//! Each state carries the access history of its own interleaving. Two
//! committed accesses race when they come from different threads, touch
//! overlapping cells with at least one write, hold no common lock, and are
//! concurrent in the happens-before order induced by create/join and lock
//! hand-off. Deduplication across interleavings happens in the reporter,
//! keyed by (location, unordered site pair).

use indexmap::{IndexMap, IndexSet};
use marmoset_ir::Site;

use crate::store::{LockId, ObjId};
use crate::thread::ThreadId;
use crate::vclock::VClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One committed access to a shared location.
#[derive(Debug, Clone)]
pub struct Access {
    pub thread: ThreadId,
    pub kind: AccessKind,
    pub site: Site,
    /// Locks held at the moment of the access.
    pub lockset: IndexSet<LockId>,
    pub clock: VClock,
}

/// A detected race: two conflicting unsynchronized accesses.
#[derive(Debug, Clone)]
pub struct RacePair {
    pub obj: ObjId,
    /// `None` for accesses with an imprecise (symbolic) offset, which
    /// conflict with every cell of the object.
    pub offset: Option<i64>,
    pub prior: Access,
    pub current: Access,
}

/// Per-path access history, keyed per object with per-cell offsets.
#[derive(Debug, Clone, Default)]
pub struct AccessHistory {
    per_obj: IndexMap<ObjId, Vec<(Option<i64>, Access)>>,
}

fn offsets_overlap(a: Option<i64>, b: Option<i64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        // A symbolic offset may alias any cell of the object.
        _ => true,
    }
}

fn conflict(a: &Access, b: &Access) -> bool {
    a.thread != b.thread
        && (a.kind == AccessKind::Write || b.kind == AccessKind::Write)
        && a.lockset.is_disjoint(&b.lockset)
        && a.clock.concurrent_with(&b.clock)
}

impl AccessHistory {
    /// Record a committed access and return the first conflicting prior
    /// access, if any.
    pub fn record(
        &mut self,
        obj: ObjId,
        offset: Option<i64>,
        access: Access,
    ) -> Option<RacePair> {
        let entries = self.per_obj.entry(obj).or_default();
        let raced = entries
            .iter()
            .find(|(prior_off, prior)| {
                offsets_overlap(*prior_off, offset) && conflict(prior, &access)
            })
            .map(|(prior_off, prior)| RacePair {
                obj,
                offset: if *prior_off == offset { offset } else { None },
                prior: prior.clone(),
                current: access.clone(),
            });
        entries.push((offset, access));
        raced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marmoset_ir::{BlockId, FunId};

    fn site(ix: u32) -> Site {
        Site { fun: FunId(0), block: BlockId(0), index: ix }
    }

    fn access(tid: u32, kind: AccessKind, locks: &[LockId], clock: VClock) -> Access {
        Access {
            thread: ThreadId(tid),
            kind,
            site: site(tid),
            lockset: locks.iter().copied().collect(),
            clock,
        }
    }

    fn concurrent_clocks() -> (VClock, VClock) {
        let mut a = VClock::new();
        let mut b = VClock::new();
        a.tick(ThreadId(1));
        b.tick(ThreadId(2));
        (a, b)
    }

    #[test]
    fn unsynchronized_write_write_races() {
        let (ca, cb) = concurrent_clocks();
        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        assert!(hist
            .record(obj, Some(0), access(1, AccessKind::Write, &[], ca))
            .is_none());
        let race = hist
            .record(obj, Some(0), access(2, AccessKind::Write, &[], cb))
            .expect("conflicting writes must race");
        assert_eq!(race.offset, Some(0));
    }

    #[test]
    fn read_read_never_races() {
        let (ca, cb) = concurrent_clocks();
        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        hist.record(obj, Some(0), access(1, AccessKind::Read, &[], ca));
        assert!(hist
            .record(obj, Some(0), access(2, AccessKind::Read, &[], cb))
            .is_none());
    }

    #[test]
    fn common_lock_synchronizes() {
        let (ca, cb) = concurrent_clocks();
        let lock = LockId { obj: ObjId(9), offset: 0 };
        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        hist.record(obj, Some(0), access(1, AccessKind::Write, &[lock], ca));
        assert!(hist
            .record(obj, Some(0), access(2, AccessKind::Write, &[lock], cb))
            .is_none());
    }

    #[test]
    fn distinct_locks_do_not_synchronize() {
        let (ca, cb) = concurrent_clocks();
        let la = LockId { obj: ObjId(9), offset: 0 };
        let lb = LockId { obj: ObjId(9), offset: 1 };
        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        hist.record(obj, Some(0), access(1, AccessKind::Write, &[la], ca));
        assert!(hist
            .record(obj, Some(0), access(2, AccessKind::Write, &[lb], cb))
            .is_some());
    }

    #[test]
    fn disjoint_cells_of_one_aggregate_do_not_conflict() {
        let (ca, cb) = concurrent_clocks();
        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        hist.record(obj, Some(0), access(1, AccessKind::Write, &[], ca));
        assert!(hist
            .record(obj, Some(1), access(2, AccessKind::Write, &[], cb))
            .is_none());
    }

    #[test]
    fn symbolic_offset_conflicts_with_every_cell() {
        let (ca, cb) = concurrent_clocks();
        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        hist.record(obj, Some(3), access(1, AccessKind::Write, &[], ca));
        let race = hist
            .record(obj, None, access(2, AccessKind::Write, &[], cb))
            .expect("symbolic offset must alias");
        assert_eq!(race.offset, None);
    }

    #[test]
    fn happens_before_suppresses_races() {
        // The second access sees the first through a join: ordered.
        let mut first_clock = VClock::new();
        first_clock.tick(ThreadId(1));
        let mut second_clock = VClock::new();
        second_clock.join(&first_clock);
        second_clock.tick(ThreadId(2));

        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        hist.record(obj, Some(0), access(1, AccessKind::Write, &[], first_clock));
        assert!(hist
            .record(obj, Some(0), access(2, AccessKind::Write, &[], second_clock))
            .is_none());
    }

    #[test]
    fn same_thread_accesses_never_race() {
        let mut c = VClock::new();
        c.tick(ThreadId(1));
        let mut hist = AccessHistory::default();
        let obj = ObjId(0);
        hist.record(obj, Some(0), access(1, AccessKind::Write, &[], c.clone()));
        c.tick(ThreadId(1));
        assert!(hist
            .record(obj, Some(0), access(1, AccessKind::Write, &[], c))
            .is_none());
    }
}
