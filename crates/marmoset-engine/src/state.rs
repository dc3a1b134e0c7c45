//! Program states: the unit of search.
//!
//! A state owns its symbolic store, path condition, simulated threads,
//! lock table, and per-path race history. Forking clones the whole state;
//! siblings never observe each other's mutations.

use indexmap::IndexMap;
use marmoset_solver::{Expr, SymId};

use marmoset_ir::{GlobalId, Operand, Program};

use crate::race::AccessHistory;
use crate::report::Finding;
use crate::store::{LockId, Memory, ObjKind, ObjId};
use crate::thread::{Frame, Thread, ThreadId};
use crate::value::{Offset, Pointer, Val};
use crate::vclock::VClock;

/// Which bound cut a path short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    ContextSwitches,
    LoopIterations,
    Steps,
}

/// Why a path ended quietly (no finding, no incompleteness).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatedKind {
    /// An `Assume` condition was infeasible.
    AssumeFalse,
    /// A loop already certified terminating reached the iteration budget;
    /// the certificate covers the unexplored tail.
    CertifiedLoopCut,
}

/// Lifecycle status of a state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateStatus {
    Ready,
    /// The entry function returned with this exit code.
    Exited(i64),
    /// A finding terminated this path.
    Errored(Finding),
    /// An unsupported operation; counted, reported as incompleteness.
    Killed(String),
    Terminated(TerminatedKind),
    BoundExceeded(BoundKind),
}

/// A mutex in one state: its owner and the clock of its last release.
#[derive(Debug, Clone, Default)]
pub struct LockState {
    pub owner: Option<ThreadId>,
    pub clock: VClock,
}

/// One search node.
#[derive(Debug, Clone)]
pub struct State {
    pub memory: Memory,
    /// Path condition: conjunction of branch predicates taken. Invariant:
    /// satisfiable for every live state.
    pub path: Vec<Expr>,
    pub threads: Vec<Thread>,
    /// Per-thread vector clocks, indexed by thread id.
    pub clocks: Vec<VClock>,
    pub locks: IndexMap<LockId, LockState>,
    /// Thread currently scheduled to run.
    pub current: ThreadId,
    /// Thread that executed the previous instruction, for switch counting.
    pub last_ran: Option<ThreadId>,
    pub switches: u32,
    pub steps: u64,
    /// A scheduling decision is in force for the pending visible op.
    pub sched_done: bool,
    next_sym: u32,
    pub status: StateStatus,
    /// Committed-access history of this interleaving.
    pub history: AccessHistory,
    /// Object backing each IR global, in declaration order.
    pub global_objs: Vec<ObjId>,
}

impl State {
    /// The root state: globals allocated, one thread at the entry.
    pub fn initial(program: &Program) -> State {
        let mut memory = Memory::new();
        let mut global_objs = Vec::with_capacity(program.globals.len());
        for (i, g) in program.globals.iter().enumerate() {
            let id = memory.alloc(
                g.name.clone(),
                ObjKind::Global(GlobalId(i as u32)),
                g.cells as usize,
                g.zeroed,
            );
            global_objs.push(id);
        }

        let entry = program.function(program.entry);
        let frame = Frame::new(program.entry, entry.regs, Vec::new(), None);
        State {
            memory,
            path: Vec::new(),
            threads: vec![Thread::new(ThreadId(0), frame)],
            clocks: vec![VClock::new()],
            locks: IndexMap::new(),
            current: ThreadId(0),
            last_ran: None,
            switches: 0,
            steps: 0,
            sched_done: false,
            next_sym: 0,
            status: StateStatus::Ready,
            history: AccessHistory::default(),
            global_objs,
        }
    }

    /// Mint a fresh nondeterministic value. Ids are per-path-deterministic:
    /// forked siblings continue the same sequence independently.
    pub fn fresh_sym(&mut self) -> Expr {
        let id = SymId(self.next_sym);
        self.next_sym += 1;
        Expr::var(id)
    }

    pub fn thread(&self, id: ThreadId) -> &Thread {
        &self.threads[id.0 as usize]
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        &mut self.threads[id.0 as usize]
    }

    pub fn cur_thread(&self) -> &Thread {
        self.thread(self.current)
    }

    pub fn cur_thread_mut(&mut self) -> &mut Thread {
        let id = self.current;
        self.thread_mut(id)
    }

    pub fn clock(&self, id: ThreadId) -> &VClock {
        &self.clocks[id.0 as usize]
    }

    pub fn clock_mut(&mut self, id: ThreadId) -> &mut VClock {
        &mut self.clocks[id.0 as usize]
    }

    /// Ids of all runnable threads, ascending.
    pub fn runnable(&self) -> Vec<ThreadId> {
        self.threads
            .iter()
            .filter(|t| t.is_runnable())
            .map(|t| t.id)
            .collect()
    }

    /// Whether any thread is blocked (deadlock candidate when nothing is
    /// runnable).
    pub fn any_blocked(&self) -> bool {
        self.threads
            .iter()
            .any(|t| matches!(t.status, crate::thread::ThreadStatus::Blocked(_)))
    }

    /// Pure operand evaluation against a thread's top frame.
    pub fn eval_operand(&self, tid: ThreadId, op: &Operand) -> Result<Val, String> {
        let frame = self.thread(tid).frame();
        match op {
            Operand::Const(n) => Ok(Val::Int(*n)),
            Operand::Reg(r) => frame
                .regs
                .get(r.0 as usize)
                .and_then(|v| v.clone())
                .ok_or_else(|| format!("use of unassigned register {r}")),
            Operand::Param(i) => frame
                .params
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| format!("use of missing parameter #{i}")),
            Operand::Global(g) => Ok(Val::Ptr(Pointer {
                obj: self.global_objs[g.0 as usize],
                offset: Offset::Const(0),
            })),
        }
    }

    /// Record a context switch to `tid`; returns false when the
    /// context-switch budget is exhausted.
    pub fn switch_to(&mut self, tid: ThreadId, max_switches: u32) -> bool {
        if let Some(last) = self.last_ran {
            if last != tid {
                self.switches += 1;
                if self.switches > max_switches {
                    self.status = StateStatus::BoundExceeded(BoundKind::ContextSwitches);
                    return false;
                }
            }
        }
        self.current = tid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marmoset_ir::{FunctionBuilder, ProgramBuilder};

    fn tiny_program() -> Program {
        let mut p = ProgramBuilder::new();
        p.global("g", 2, true);
        let mut f = FunctionBuilder::new("main", 0);
        let n = f.nondet();
        f.assert(Operand::Reg(n));
        f.ret(Some(Operand::Const(0)));
        let main = p.define(f);
        p.set_entry(main);
        p.finish().expect("valid program")
    }

    #[test]
    fn initial_state_allocates_globals_and_main() {
        let program = tiny_program();
        let state = State::initial(&program);
        assert_eq!(state.global_objs.len(), 1);
        assert!(state.memory.object(state.global_objs[0]).shared);
        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.current, ThreadId(0));
        assert_eq!(state.status, StateStatus::Ready);
    }

    #[test]
    fn fresh_syms_are_sequential_and_fork_independent() {
        let program = tiny_program();
        let mut a = State::initial(&program);
        let first = a.fresh_sym();
        let mut b = a.clone();

        // Siblings continue the same deterministic sequence.
        assert_eq!(a.fresh_sym(), b.fresh_sym());
        assert_ne!(first, a.fresh_sym());
    }

    #[test]
    fn operand_evaluation() {
        let program = tiny_program();
        let mut state = State::initial(&program);
        assert_eq!(
            state.eval_operand(ThreadId(0), &Operand::Const(4)),
            Ok(Val::Int(4))
        );
        assert!(state
            .eval_operand(ThreadId(0), &Operand::Reg(marmoset_ir::Reg(0)))
            .is_err());

        state.cur_thread_mut().frame_mut().regs[0] = Some(Val::Int(9));
        assert_eq!(
            state.eval_operand(ThreadId(0), &Operand::Reg(marmoset_ir::Reg(0))),
            Ok(Val::Int(9))
        );
    }

    #[test]
    fn switch_counting_enforces_the_bound() {
        let program = tiny_program();
        let mut state = State::initial(&program);
        state.threads.push(Thread::new(
            ThreadId(1),
            Frame::new(program.entry, 0, Vec::new(), None),
        ));
        state.clocks.push(VClock::new());
        state.last_ran = Some(ThreadId(0));

        assert!(state.switch_to(ThreadId(0), 1), "same thread is free");
        assert!(state.switch_to(ThreadId(1), 1), "first switch fits");
        state.last_ran = Some(ThreadId(1));
        assert!(!state.switch_to(ThreadId(0), 1), "second switch exceeds");
        assert_eq!(
            state.status,
            StateStatus::BoundExceeded(BoundKind::ContextSwitches)
        );
    }
}
