//! Interleaving scheduler with partial-order reduction.
//!
//! Threads run between visible operations without interruption; every
//! visible operation (shared-memory access, lock operation, thread
//! create/join) is a scheduling point. Two candidate operations are
//! independent when they neither touch the same memory location with at
//! least one write nor operate on the same lock; when some runnable
//! thread's next operation is independent of every other candidate, only
//! that thread is scheduled and no fork happens. Only potentially
//! conflicting operations multiply the search.

use marmoset_ir::{Instr, Program};

use crate::options::PorMode;
use crate::state::State;
use crate::store::{LockId, ObjId};
use crate::thread::ThreadId;
use crate::value::{Offset, Val};

/// A thread's pending visible operation, as seen at a scheduling point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibleOp {
    Mem { obj: ObjId, offset: Option<i64>, write: bool },
    Lock(LockId),
    Unlock(LockId),
    Create,
    Join,
}

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedDecision {
    /// Exactly one thread continues; no fork.
    Run(ThreadId),
    /// Conflicting candidates: fork the search per thread.
    Fork(Vec<ThreadId>),
    /// Nothing is runnable but blocked threads remain.
    Deadlock,
    /// Nothing is runnable and nothing is blocked.
    Stuck,
}

/// Resolve a pointer operand without side effects. `None` when the next
/// instruction does not touch shared memory in a resolvable way.
fn mem_target(state: &State, tid: ThreadId, ptr: &marmoset_ir::Operand) -> Option<(ObjId, Option<i64>)> {
    let val = state.eval_operand(tid, ptr).ok()?;
    let Val::Ptr(p) = val else { return None };
    if !state.memory.object(p.obj).shared {
        return None;
    }
    let offset = match p.offset {
        Offset::Const(n) => Some(n),
        Offset::Sym(_) => None,
    };
    Some((p.obj, offset))
}

fn lock_target(state: &State, tid: ThreadId, ptr: &marmoset_ir::Operand) -> Option<LockId> {
    let val = state.eval_operand(tid, ptr).ok()?;
    match val {
        Val::Ptr(p) => match p.offset {
            Offset::Const(n) => Some(LockId { obj: p.obj, offset: n }),
            Offset::Sym(_) => None,
        },
        _ => None,
    }
}

/// Classify the next instruction of `tid`. `None` means the thread's next
/// step is invisible to other threads (thread-local work, terminators).
pub fn visible_op(state: &State, program: &Program, tid: ThreadId) -> Option<VisibleOp> {
    let thread = state.thread(tid);
    let frame = thread.frame();
    let block = program.function(frame.fun).block(frame.block);
    let instr = block.instrs.get(frame.ip)?;
    match instr {
        Instr::Load { ptr, .. } => {
            let (obj, offset) = mem_target(state, tid, ptr)?;
            Some(VisibleOp::Mem { obj, offset, write: false })
        }
        Instr::Store { ptr, .. } => {
            let (obj, offset) = mem_target(state, tid, ptr)?;
            Some(VisibleOp::Mem { obj, offset, write: true })
        }
        Instr::MutexLock { mutex } => lock_target(state, tid, mutex).map(VisibleOp::Lock),
        Instr::MutexUnlock { mutex } => lock_target(state, tid, mutex).map(VisibleOp::Unlock),
        Instr::ThreadCreate { .. } => Some(VisibleOp::Create),
        Instr::ThreadJoin { .. } => Some(VisibleOp::Join),
        _ => None,
    }
}

/// Independence per the reduction rule: no same-location conflict with a
/// write, and no operations on the same lock.
pub fn independent(a: &VisibleOp, b: &VisibleOp) -> bool {
    match (a, b) {
        (
            VisibleOp::Mem { obj: oa, offset: fa, write: wa },
            VisibleOp::Mem { obj: ob, offset: fb, write: wb },
        ) => {
            if oa != ob {
                return true;
            }
            let overlap = match (fa, fb) {
                (Some(fa), Some(fb)) => fa == fb,
                _ => true,
            };
            !(overlap && (*wa || *wb))
        }
        (VisibleOp::Lock(a) | VisibleOp::Unlock(a), VisibleOp::Lock(b) | VisibleOp::Unlock(b)) => {
            a != b
        }
        _ => true,
    }
}

/// Pick the thread(s) to explore at a scheduling point.
pub fn schedule(state: &State, program: &Program, por: PorMode) -> SchedDecision {
    let runnable = state.runnable();
    match runnable.len() {
        0 => {
            return if state.any_blocked() {
                SchedDecision::Deadlock
            } else {
                SchedDecision::Stuck
            }
        }
        1 => return SchedDecision::Run(runnable[0]),
        _ => {}
    }

    if por == PorMode::Off {
        return SchedDecision::Fork(runnable);
    }

    let ops: Vec<Option<VisibleOp>> = runnable
        .iter()
        .map(|t| visible_op(state, program, *t))
        .collect();

    // Prefer the currently scheduled thread to avoid needless context
    // switches, then lowest id.
    let preference = |idx: usize| runnable[idx] != state.current;
    let mut candidates: Vec<usize> = (0..runnable.len()).collect();
    candidates.sort_by_key(|i| (preference(*i), runnable[*i]));

    for i in candidates {
        let mine = &ops[i];
        let independent_of_all = ops.iter().enumerate().all(|(j, other)| {
            if i == j {
                return true;
            }
            match (mine, other) {
                (Some(a), Some(b)) => independent(a, b),
                // An invisible next step commutes with everything.
                _ => true,
            }
        });
        if independent_of_all {
            return SchedDecision::Run(runnable[i]);
        }
    }

    SchedDecision::Fork(runnable)
}
