//! Ranking-function based loop-termination checking.
//!
//! Per loop activation the checker snapshots the integer contents of
//! memory at each back edge and derives per-iteration deltas. A loop is
//! certified terminating on the current path when some location changes by
//! a constant nonzero delta per iteration while the loop guard bounds it
//! on the side the change moves away from, the classic strictly-
//! decreasing-counter ranking function. Certification is re-established
//! at every back edge and revoked if an iteration breaks the pattern, so
//! a stale certificate never outlives the behavior that justified it.
//!
//! A loop that exhausts its iteration budget uncertified and without
//! exiting is flagged as a non-termination candidate: a soft signal, since
//! an unproved loop is not a proven-infinite loop.

use std::collections::BTreeMap;

use marmoset_solver::Expr;

use crate::store::{Memory, ObjId};

/// Location key: (object, concrete cell offset).
pub type CellKey = (ObjId, i64);

/// Per-loop, per-activation tracking state, stored in the owning frame.
#[derive(Debug, Clone, Default)]
pub struct LoopTrack {
    /// Completed iterations along this path.
    pub iters: u32,
    /// Whether a ranking function currently certifies this loop.
    pub certified: bool,
    /// The guard conjunct that admitted the current iteration.
    pub last_guard: Option<Expr>,
    /// Cell values at the previous back edge.
    prev: Option<BTreeMap<CellKey, Expr>>,
}

/// Capture every concrete-offset integer cell as a constraint term.
pub fn snapshot(memory: &Memory) -> BTreeMap<CellKey, Expr> {
    let mut snap = BTreeMap::new();
    for (id, obj) in memory.iter() {
        for (off, cell) in obj.cells.iter().enumerate() {
            if let crate::store::Cell::Val(v) = cell {
                if let Some(e) = v.to_expr() {
                    snap.insert((id, off as i64), e);
                }
            }
        }
    }
    snap
}

/// Structural per-iteration delta between two value terms.
fn delta_of(prev: &Expr, now: &Expr) -> Option<i64> {
    if prev == now {
        return Some(0);
    }
    match (prev, now) {
        (Expr::IntLit(a), Expr::IntLit(b)) => Some(b.wrapping_sub(*a)),
        (_, Expr::Add(a, b)) => {
            if **a == *prev {
                if let Expr::IntLit(k) = **b {
                    return Some(k);
                }
            }
            if **b == *prev {
                if let Expr::IntLit(k) = **a {
                    return Some(k);
                }
            }
            None
        }
        (_, Expr::Sub(a, b)) => {
            if **a == *prev {
                if let Expr::IntLit(k) = **b {
                    return Some(-k);
                }
            }
            None
        }
        _ => None,
    }
}

/// Does `guard` bound `val_at_guard` against the direction of `delta`?
///
/// A strictly decreasing value needs a constant lower bound in the guard;
/// a strictly increasing value needs a constant upper bound.
fn guard_bounds(guard: &Expr, val_at_guard: &Expr, delta: i64) -> bool {
    let is_lit = |e: &Expr| matches!(e, Expr::IntLit(_));
    match guard {
        Expr::Gt(a, b) | Expr::Ge(a, b) => {
            (delta < 0 && **a == *val_at_guard && is_lit(b))
                || (delta > 0 && **b == *val_at_guard && is_lit(a))
        }
        Expr::Lt(a, b) | Expr::Le(a, b) => {
            (delta > 0 && **a == *val_at_guard && is_lit(b))
                || (delta < 0 && **b == *val_at_guard && is_lit(a))
        }
        _ => false,
    }
}

impl LoopTrack {
    /// Process one taken back edge: compare the new snapshot against the
    /// previous one and re-derive the certification verdict.
    pub fn on_back_edge(&mut self, snap: BTreeMap<CellKey, Expr>) {
        self.iters += 1;
        let Some(prev) = self.prev.replace(snap) else {
            return;
        };
        // `prev` now holds the values the current guard was evaluated on;
        // `self.prev` holds the values after this iteration's body.
        let now = self.prev.as_ref().expect("snapshot just stored");

        let mut certified = false;
        if let Some(guard) = &self.last_guard {
            for (key, prev_val) in &prev {
                let Some(now_val) = now.get(key) else { continue };
                let Some(delta) = delta_of(prev_val, now_val) else { continue };
                if delta != 0 && guard_bounds(guard, prev_val, delta) {
                    certified = true;
                    break;
                }
            }
        }
        self.certified = certified;
    }
}
