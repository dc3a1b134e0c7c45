//! The path explorer: drives states forward, forks at nondeterministic
//! decision points, prunes infeasible children, and feeds every terminal
//! path and finding into the reporter.
//!
//! Exploration order is a frontier policy (DFS by default) and may run on
//! several worker threads; the final counters and deduplicated findings
//! are identical for every order and worker count. The analyzed program's
//! threads are simulated inside each state; blocking a simulated thread
//! never blocks an engine worker.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::debug;

use marmoset_ir::{
    analyze_loops, BinOp, Callee, Instr, LoopInfo, Operand, Pred, Program, Site, Terminator,
};
use marmoset_solver::{Expr, SatResult};

use crate::options::{ExecOptions, SearchOrder};
use crate::oracle::Oracle;
use crate::race::{Access, AccessKind};
use crate::report::{Finding, Reporter, RunReport};
use crate::sched::{self, SchedDecision};
use crate::state::{BoundKind, State, StateStatus, TerminatedKind};
use crate::store::{Cell, LockId, ObjId, ObjKind};
use crate::thread::{BlockReason, Frame, Thread, ThreadId, ThreadStatus};
use crate::value::{Offset, Truth, Val};

/// Upper bound on a single allocation, in cells.
const MAX_ALLOC_CELLS: i64 = 1 << 20;

/// Analyze a program and produce the final report.
pub fn analyze(program: &Program, opts: &ExecOptions) -> RunReport {
    let explorer = Explorer {
        program,
        loops: analyze_loops(program),
        reporter: Reporter::new(opts),
        oracle: Oracle::new(),
        opts: opts.clone(),
    };
    explorer.run(State::initial(program));
    explorer.reporter.finalize()
}

enum Step {
    /// The state is still live; keep stepping it.
    Continue,
    /// The state split; the children replace it on the frontier.
    Fork(Vec<State>),
    /// The state reached a terminal status.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OobVerdict {
    /// This state continues, constrained in-bounds where needed.
    InBounds,
    /// The offset can never be in range; the state became the error path.
    AlwaysOob,
}

struct Explorer<'p> {
    program: &'p Program,
    loops: LoopInfo,
    reporter: Reporter,
    oracle: Oracle,
    opts: ExecOptions,
}

impl<'p> Explorer<'p> {
    fn run(&self, initial: State) {
        if self.opts.jobs > 1 {
            self.run_parallel(initial);
        } else {
            self.run_sequential(initial);
        }
    }

    fn run_sequential(&self, initial: State) {
        let mut frontier = VecDeque::new();
        frontier.push_back(initial);
        while let Some(state) = self.pop(&mut frontier) {
            if self.reporter.should_stop() {
                frontier.push_back(state);
                break;
            }
            for child in self.advance(state) {
                frontier.push_back(child);
            }
        }
        if self.reporter.stopped_on_error() && !frontier.is_empty() {
            self.reporter.note_partial("halted at first finding");
        }
    }

    /// Work-sharing pool over the frontier. The reporter is the single
    /// mutation point; the frontier is a mutex-protected queue with an
    /// in-flight count so workers know when the search is drained.
    fn run_parallel(&self, initial: State) {
        let frontier: Mutex<(VecDeque<State>, usize)> = Mutex::new((VecDeque::from([initial]), 0));
        let work_ready = Condvar::new();

        std::thread::scope(|scope| {
            for _ in 0..self.opts.jobs {
                scope.spawn(|| loop {
                    let state = {
                        let mut guard = frontier.lock().expect("frontier mutex poisoned");
                        loop {
                            if self.reporter.should_stop() {
                                work_ready.notify_all();
                                return;
                            }
                            if let Some(state) = match self.opts.search {
                                SearchOrder::Dfs => guard.0.pop_back(),
                                SearchOrder::Bfs => guard.0.pop_front(),
                            } {
                                guard.1 += 1;
                                break state;
                            }
                            if guard.1 == 0 {
                                work_ready.notify_all();
                                return;
                            }
                            let (g, _) = work_ready
                                .wait_timeout(guard, Duration::from_millis(20))
                                .expect("frontier mutex poisoned");
                            guard = g;
                        }
                    };

                    let children = self.advance(state);
                    let mut guard = frontier.lock().expect("frontier mutex poisoned");
                    guard.0.extend(children);
                    guard.1 -= 1;
                    work_ready.notify_all();
                });
            }
        });

        let guard = frontier.lock().expect("frontier mutex poisoned");
        if self.reporter.stopped_on_error() && !guard.0.is_empty() {
            self.reporter.note_partial("halted at first finding");
        }
    }

    fn pop(&self, frontier: &mut VecDeque<State>) -> Option<State> {
        match self.opts.search {
            SearchOrder::Dfs => frontier.pop_back(),
            SearchOrder::Bfs => frontier.pop_front(),
        }
    }

    /// Step one state until it forks or terminates.
    fn advance(&self, mut state: State) -> Vec<State> {
        loop {
            if self.reporter.should_stop() {
                // In-flight work is discarded, never counted.
                return Vec::new();
            }
            match self.exec_step(&mut state) {
                Step::Continue => {}
                Step::Fork(children) => {
                    let mut live = Vec::new();
                    for child in children {
                        if child.status == StateStatus::Ready {
                            live.push(child);
                        } else {
                            self.reporter.on_terminal(&child.status);
                        }
                    }
                    return live;
                }
                Step::Done => {
                    self.reporter.on_terminal(&state.status);
                    return Vec::new();
                }
            }
        }
    }

    /// One scheduling decision or one instruction.
    fn exec_step(&self, state: &mut State) -> Step {
        if !state.sched_done {
            let needs_schedule = !state.cur_thread().is_runnable()
                || sched::visible_op(state, self.program, state.current).is_some();
            if needs_schedule {
                match sched::schedule(state, self.program, self.opts.por) {
                    SchedDecision::Run(tid) => {
                        if !state.switch_to(tid, self.opts.max_context_switches) {
                            return Step::Done;
                        }
                        state.sched_done = true;
                    }
                    SchedDecision::Fork(tids) => {
                        let children = tids
                            .into_iter()
                            .map(|tid| {
                                let mut child = state.clone();
                                child.sched_done = true;
                                child.switch_to(tid, self.opts.max_context_switches);
                                child
                            })
                            .collect();
                        return Step::Fork(children);
                    }
                    SchedDecision::Deadlock => {
                        let site = self.blocked_site(state);
                        state.status = StateStatus::Errored(Finding::Deadlock { site });
                        return Step::Done;
                    }
                    SchedDecision::Stuck => {
                        state.status = StateStatus::Killed("no runnable thread".into());
                        return Step::Done;
                    }
                }
            } else {
                state.sched_done = true;
            }
        }

        state.steps += 1;
        if self.opts.max_steps != 0 && state.steps > self.opts.max_steps {
            state.status = StateStatus::BoundExceeded(BoundKind::Steps);
            return Step::Done;
        }

        let tid = state.current;
        state.last_ran = Some(tid);
        state.sched_done = false;

        let (fun_id, block_id, ip) = {
            let frame = state.thread(tid).frame();
            (frame.fun, frame.block, frame.ip)
        };
        let block = self.program.function(fun_id).block(block_id);
        if ip < block.instrs.len() {
            let instr = block.instrs[ip].clone();
            let site = Site { fun: fun_id, block: block_id, index: ip as u32 };
            match self.exec_instr(state, tid, &instr, site) {
                Ok(step) => step,
                Err(reason) => {
                    debug!(%reason, site = %self.program.site_label(site), "path killed");
                    state.status = StateStatus::Killed(reason);
                    Step::Done
                }
            }
        } else {
            let term = block.term.clone();
            match self.exec_terminator(state, tid, &term) {
                Ok(step) => step,
                Err(reason) => {
                    state.status = StateStatus::Killed(reason);
                    Step::Done
                }
            }
        }
    }

    fn site_label(&self, site: Site) -> String {
        self.program.site_label(site)
    }

    /// Position of the first blocked thread, for deadlock findings.
    fn blocked_site(&self, state: &State) -> String {
        for t in &state.threads {
            if matches!(t.status, ThreadStatus::Blocked(_)) {
                let f = t.frame();
                return self.site_label(Site {
                    fun: f.fun,
                    block: f.block,
                    index: f.ip as u32,
                });
            }
        }
        "<unknown>".to_string()
    }

    fn advance_ip(&self, state: &mut State, tid: ThreadId) {
        state.thread_mut(tid).frame_mut().ip += 1;
    }

    #[allow(clippy::too_many_lines)]
    fn exec_instr(
        &self,
        state: &mut State,
        tid: ThreadId,
        instr: &Instr,
        site: Site,
    ) -> Result<Step, String> {
        match instr {
            Instr::Alloc { dst, cells } => {
                let n = match state.eval_operand(tid, cells)? {
                    Val::Int(n) => n,
                    Val::Sym(_) => return Err("allocation with symbolic size".into()),
                    Val::Ptr(_) => return Err("allocation size is a pointer".into()),
                };
                if !(0..=MAX_ALLOC_CELLS).contains(&n) {
                    return Err(format!("allocation of {n} cells out of range"));
                }
                let name = format!("{}.alloc", self.site_label(site));
                let obj = state.memory.alloc(name, ObjKind::Alloc, n as usize, false);
                self.set_reg(state, tid, *dst, Val::Ptr(crate::value::Pointer {
                    obj,
                    offset: Offset::Const(0),
                }));
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }

            Instr::Gep { dst, base, index } => {
                let base = match state.eval_operand(tid, base)? {
                    Val::Ptr(p) => p,
                    _ => return Err("pointer offset through non-pointer".into()),
                };
                let index = state.eval_operand(tid, index)?;
                let offset = base
                    .offset
                    .add(&index)
                    .ok_or("pointer-valued index in pointer offset")?;
                self.set_reg(state, tid, *dst, Val::Ptr(crate::value::Pointer {
                    obj: base.obj,
                    offset,
                }));
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }

            Instr::Load { dst, ptr } => self.exec_load(state, tid, *dst, ptr, site),
            Instr::Store { val, ptr } => self.exec_store(state, tid, val, ptr, site),

            Instr::Bin { dst, op, lhs, rhs } => {
                let a = state.eval_operand(tid, lhs)?;
                let b = state.eval_operand(tid, rhs)?;
                let v = match (&a, &b) {
                    (Val::Int(a), Val::Int(b)) => Val::Int(match op {
                        BinOp::Add => a.wrapping_add(*b),
                        BinOp::Sub => a.wrapping_sub(*b),
                        BinOp::Mul => a.wrapping_mul(*b),
                    }),
                    (Val::Ptr(_), _) | (_, Val::Ptr(_)) => {
                        return Err("arithmetic on pointer values".into())
                    }
                    _ => {
                        let ea = a.to_expr().ok_or("non-integer operand")?;
                        let eb = b.to_expr().ok_or("non-integer operand")?;
                        Val::Sym(match op {
                            BinOp::Add => ea.add(eb),
                            BinOp::Sub => ea.sub(eb),
                            BinOp::Mul => ea.mul(eb),
                        })
                    }
                };
                self.set_reg(state, tid, *dst, v);
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }

            Instr::Cmp { dst, pred, lhs, rhs } => {
                let a = state.eval_operand(tid, lhs)?;
                let b = state.eval_operand(tid, rhs)?;
                let v = self.eval_cmp(*pred, &a, &b)?;
                self.set_reg(state, tid, *dst, v);
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }

            Instr::Nondet { dst } => {
                let fresh = state.fresh_sym();
                self.set_reg(state, tid, *dst, Val::Sym(fresh));
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }

            Instr::Assert { cond } => {
                let cond = state.eval_operand(tid, cond)?;
                match cond.truth() {
                    Truth::True => {
                        self.advance_ip(state, tid);
                        Ok(Step::Continue)
                    }
                    Truth::False => {
                        state.status = StateStatus::Errored(Finding::AssertionViolation {
                            site: self.site_label(site),
                        });
                        Ok(Step::Done)
                    }
                    Truth::Symbolic(c) => {
                        let violated = c.clone().not();
                        match self.oracle.check_with(&state.path, &violated) {
                            SatResult::Sat => {
                                let finding = Finding::AssertionViolation {
                                    site: self.site_label(site),
                                };
                                match self.oracle.check_with(&state.path, &c) {
                                    SatResult::Unsat => {
                                        // The condition cannot hold: the
                                        // whole path is the violation.
                                        state.status = StateStatus::Errored(finding);
                                        Ok(Step::Done)
                                    }
                                    passing => {
                                        // The violating side is a terminal
                                        // path of its own; this state
                                        // continues where the assert holds.
                                        self.reporter
                                            .on_terminal(&StateStatus::Errored(finding));
                                        if matches!(passing, SatResult::Unknown(_)) {
                                            self.reporter.note_partial("solver returned unknown");
                                        }
                                        state.path.push(c);
                                        self.advance_ip(state, tid);
                                        Ok(Step::Continue)
                                    }
                                }
                            }
                            SatResult::Unsat => {
                                self.advance_ip(state, tid);
                                Ok(Step::Continue)
                            }
                            SatResult::Unknown(_) => {
                                self.reporter.note_partial("solver returned unknown");
                                state.path.push(c);
                                self.advance_ip(state, tid);
                                Ok(Step::Continue)
                            }
                        }
                    }
                }
            }

            Instr::Assume { cond } => {
                let cond = state.eval_operand(tid, cond)?;
                match cond.truth() {
                    Truth::True => {
                        self.advance_ip(state, tid);
                        Ok(Step::Continue)
                    }
                    Truth::False => {
                        state.status = StateStatus::Terminated(TerminatedKind::AssumeFalse);
                        Ok(Step::Done)
                    }
                    Truth::Symbolic(c) => match self.oracle.check_with(&state.path, &c) {
                        SatResult::Unsat => {
                            state.status = StateStatus::Terminated(TerminatedKind::AssumeFalse);
                            Ok(Step::Done)
                        }
                        result => {
                            if matches!(result, SatResult::Unknown(_)) {
                                self.reporter.note_partial("solver returned unknown");
                            }
                            state.path.push(c);
                            self.advance_ip(state, tid);
                            Ok(Step::Continue)
                        }
                    },
                }
            }

            Instr::Call { dst, callee, args } => match callee {
                Callee::Fun(fid) => {
                    let callee_fun = self.program.function(*fid);
                    let mut params = Vec::with_capacity(args.len());
                    for a in args {
                        params.push(state.eval_operand(tid, a)?);
                    }
                    self.advance_ip(state, tid);
                    let frame = Frame::new(*fid, callee_fun.regs, params, *dst);
                    state.thread_mut(tid).frames.push(frame);
                    Ok(Step::Continue)
                }
                Callee::External(name) => {
                    // Unmodeled call: opaque and nondeterministic.
                    debug!(external = %name, "treating external call as nondeterministic");
                    if let Some(dst) = dst {
                        let fresh = state.fresh_sym();
                        self.set_reg(state, tid, *dst, Val::Sym(fresh));
                    }
                    self.advance_ip(state, tid);
                    Ok(Step::Continue)
                }
            },

            Instr::ThreadCreate { dst, entry, arg } => {
                let arg = state.eval_operand(tid, arg)?;
                if let Val::Ptr(p) = &arg {
                    // The argument escapes to the new thread.
                    state.memory.mark_shared(p.obj);
                }
                let entry_fun = self.program.function(*entry);
                let params = if entry_fun.params == 0 { Vec::new() } else { vec![arg] };

                let new_id = ThreadId(state.threads.len() as u32);
                let mut child_clock = state.clock(tid).clone();
                child_clock.tick(new_id);
                state.clocks.push(child_clock);
                state
                    .threads
                    .push(Thread::new(new_id, Frame::new(*entry, entry_fun.regs, params, None)));
                state.clock_mut(tid).tick(tid);
                self.reporter.note_threads();

                self.set_reg(state, tid, *dst, Val::Int(new_id.0 as i64));
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }

            Instr::ThreadJoin { handle } => {
                let handle = state.eval_operand(tid, handle)?;
                let target = match handle {
                    Val::Int(n) => ThreadId(u32::try_from(n).map_err(|_| "invalid thread handle")?),
                    _ => return Err("join on a non-concrete thread handle".into()),
                };
                if target.0 as usize >= state.threads.len() {
                    return Err(format!("join on unknown thread {target}"));
                }
                match state.thread(target).status {
                    ThreadStatus::Exited => {
                        state.thread_mut(target).joined();
                        let target_clock = state.clock(target).clone();
                        state.clock_mut(tid).join(&target_clock);
                        state.clock_mut(tid).tick(tid);
                        self.advance_ip(state, tid);
                        Ok(Step::Continue)
                    }
                    ThreadStatus::Joined => Err(format!("thread {target} joined twice")),
                    _ => {
                        // Park without consuming the join; it re-executes
                        // when the target exits.
                        state.thread_mut(tid).block(BlockReason::Join(target));
                        Ok(Step::Continue)
                    }
                }
            }

            Instr::MutexInit { mutex } => {
                let lock = self.lock_id(state, tid, mutex)?;
                state.locks.insert(lock, Default::default());
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }

            Instr::MutexLock { mutex } => {
                let lock = self.lock_id(state, tid, mutex)?;
                let owner = state.locks.entry(lock).or_default().owner;
                match owner {
                    None => {
                        let entry = state.locks.get_mut(&lock).expect("lock entry just created");
                        entry.owner = Some(tid);
                        let lock_clock = entry.clock.clone();
                        state.thread_mut(tid).held.insert(lock);
                        state.clock_mut(tid).join(&lock_clock);
                        state.clock_mut(tid).tick(tid);
                        self.advance_ip(state, tid);
                        Ok(Step::Continue)
                    }
                    Some(owner) if owner == tid => {
                        // Default mutexes self-deadlock on relock.
                        state.status = StateStatus::Errored(Finding::Deadlock {
                            site: self.site_label(site),
                        });
                        Ok(Step::Done)
                    }
                    Some(_) => {
                        state.thread_mut(tid).block(BlockReason::Lock(lock));
                        Ok(Step::Continue)
                    }
                }
            }

            Instr::MutexUnlock { mutex } => {
                let lock = self.lock_id(state, tid, mutex)?;
                let owner = state.locks.get(&lock).and_then(|l| l.owner);
                if owner != Some(tid) {
                    state.status = StateStatus::Errored(Finding::Generic {
                        site: self.site_label(site),
                        message: "unlock of a mutex not held".into(),
                    });
                    return Ok(Step::Done);
                }
                let my_clock = state.clock(tid).clone();
                let entry = state.locks.get_mut(&lock).expect("owned lock exists");
                entry.owner = None;
                entry.clock = my_clock;
                state.thread_mut(tid).held.shift_remove(&lock);
                state.clock_mut(tid).tick(tid);

                // Wake every thread parked on this mutex.
                for t in &mut state.threads {
                    if t.status == ThreadStatus::Blocked(BlockReason::Lock(lock)) {
                        t.unblock();
                    }
                }
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }
        }
    }

    fn exec_load(
        &self,
        state: &mut State,
        tid: ThreadId,
        dst: marmoset_ir::Reg,
        ptr: &Operand,
        site: Site,
    ) -> Result<Step, String> {
        let p = match state.eval_operand(tid, ptr)? {
            Val::Ptr(p) => p,
            _ => return Err("load through non-pointer".into()),
        };
        match p.offset.clone() {
            Offset::Const(off) => {
                let (len, name) = {
                    let obj = state.memory.object(p.obj);
                    (obj.len(), obj.name.clone())
                };
                if off < 0 || off >= len {
                    state.status = StateStatus::Errored(Finding::OutOfBounds {
                        site: self.site_label(site),
                        object: name,
                    });
                    return Ok(Step::Done);
                }
                let cell = state.memory.object(p.obj).cells[off as usize].clone();
                let value = match cell {
                    Cell::Val(v) => v,
                    Cell::Uninit => {
                        // First read of an uninitialized cell: a fresh
                        // nondeterministic value, stored back so every
                        // later read observes the same value.
                        let fresh = Val::Sym(state.fresh_sym());
                        state.memory.object_mut(p.obj).cells[off as usize] =
                            Cell::Val(fresh.clone());
                        fresh
                    }
                };
                if let Some(finding) =
                    self.observe_access(state, tid, p.obj, Some(off), AccessKind::Read, site)
                {
                    state.status = StateStatus::Errored(finding);
                    return Ok(Step::Done);
                }
                self.set_reg(state, tid, dst, value);
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }
            Offset::Sym(off) => {
                if self.check_oob_split(state, &off, site, p.obj) == OobVerdict::AlwaysOob {
                    return Ok(Step::Done);
                }
                let value = {
                    let obj = state.memory.object(p.obj);
                    if let Some(v) = obj.uniform_value() {
                        Some(v.clone())
                    } else if obj.all_uninit() {
                        None
                    } else {
                        return Err("read with symbolic offset from non-uniform object".into());
                    }
                };
                let value = match value {
                    Some(v) => v,
                    None => Val::Sym(state.fresh_sym()),
                };
                if let Some(finding) =
                    self.observe_access(state, tid, p.obj, None, AccessKind::Read, site)
                {
                    state.status = StateStatus::Errored(finding);
                    return Ok(Step::Done);
                }
                self.set_reg(state, tid, dst, value);
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }
        }
    }

    fn exec_store(
        &self,
        state: &mut State,
        tid: ThreadId,
        val: &Operand,
        ptr: &Operand,
        site: Site,
    ) -> Result<Step, String> {
        let value = state.eval_operand(tid, val)?;
        let p = match state.eval_operand(tid, ptr)? {
            Val::Ptr(p) => p,
            _ => return Err("store through non-pointer".into()),
        };
        match p.offset.clone() {
            Offset::Const(off) => {
                let (len, shared_target) = {
                    let obj = state.memory.object(p.obj);
                    (obj.len(), obj.shared)
                };
                if off < 0 || off >= len {
                    state.status = StateStatus::Errored(Finding::OutOfBounds {
                        site: self.site_label(site),
                        object: state.memory.object(p.obj).name.clone(),
                    });
                    return Ok(Step::Done);
                }
                if shared_target {
                    if let Val::Ptr(stored) = &value {
                        // The pointee escapes through shared memory.
                        state.memory.mark_shared(stored.obj);
                    }
                }
                state.memory.object_mut(p.obj).cells[off as usize] = Cell::Val(value);
                if let Some(finding) =
                    self.observe_access(state, tid, p.obj, Some(off), AccessKind::Write, site)
                {
                    state.status = StateStatus::Errored(finding);
                    return Ok(Step::Done);
                }
                self.advance_ip(state, tid);
                Ok(Step::Continue)
            }
            Offset::Sym(off) => {
                if self.check_oob_split(state, &off, site, p.obj) == OobVerdict::AlwaysOob {
                    return Ok(Step::Done);
                }
                Err("store with symbolic offset".into())
            }
        }
    }

    /// Handle a symbolic-offset access against the object bounds. A
    /// feasibly (but not necessarily) out-of-range offset becomes its own
    /// error path while this state is constrained in-bounds; a necessarily
    /// out-of-range offset turns this state into the error path.
    fn check_oob_split(&self, state: &mut State, off: &Expr, site: Site, obj: ObjId) -> OobVerdict {
        let len = state.memory.object(obj).len();
        let oob = Expr::or(vec![
            off.clone().lt(Expr::int(0)),
            off.clone().ge(Expr::int(len)),
        ]);
        match self.oracle.check_with(&state.path, &oob) {
            SatResult::Sat => {
                let finding = Finding::OutOfBounds {
                    site: self.site_label(site),
                    object: state.memory.object(obj).name.clone(),
                };
                let in_bounds = Expr::and(vec![
                    off.clone().ge(Expr::int(0)),
                    off.clone().lt(Expr::int(len)),
                ]);
                if self.oracle.refutes(&state.path, &in_bounds) {
                    state.status = StateStatus::Errored(finding);
                    return OobVerdict::AlwaysOob;
                }
                self.reporter.on_terminal(&StateStatus::Errored(finding));
                state.path.push(off.clone().ge(Expr::int(0)));
                state.path.push(off.clone().lt(Expr::int(len)));
                OobVerdict::InBounds
            }
            SatResult::Unsat => OobVerdict::InBounds,
            SatResult::Unknown(_) => {
                self.reporter.note_partial("solver returned unknown");
                OobVerdict::InBounds
            }
        }
    }

    /// Commit a shared-memory access: advance the thread's clock, record
    /// the access, and surface a race finding if one is detected.
    fn observe_access(
        &self,
        state: &mut State,
        tid: ThreadId,
        obj: ObjId,
        offset: Option<i64>,
        kind: AccessKind,
        site: Site,
    ) -> Option<Finding> {
        if !state.memory.object(obj).shared {
            return None;
        }
        state.clock_mut(tid).tick(tid);
        let access = Access {
            thread: tid,
            kind,
            site,
            lockset: state.thread(tid).held.clone(),
            clock: state.clock(tid).clone(),
        };
        let pair = state.history.record(obj, offset, access)?;
        Some(Finding::race(
            state.memory.object(obj).name.clone(),
            pair.offset,
            self.site_label(pair.prior.site),
            self.site_label(pair.current.site),
        ))
    }

    fn eval_cmp(&self, pred: Pred, a: &Val, b: &Val) -> Result<Val, String> {
        let concrete = |ok: bool| Val::Int(ok as i64);
        match (a, b) {
            (Val::Int(a), Val::Int(b)) => Ok(concrete(match pred {
                Pred::Eq => a == b,
                Pred::Ne => a != b,
                Pred::Lt => a < b,
                Pred::Le => a <= b,
                Pred::Gt => a > b,
                Pred::Ge => a >= b,
            })),
            (Val::Ptr(pa), Val::Ptr(pb)) => match (pred, &pa.offset, &pb.offset) {
                (Pred::Eq, Offset::Const(fa), Offset::Const(fb)) => {
                    Ok(concrete(pa.obj == pb.obj && fa == fb))
                }
                (Pred::Ne, Offset::Const(fa), Offset::Const(fb)) => {
                    Ok(concrete(pa.obj != pb.obj || fa != fb))
                }
                _ => Err("unsupported pointer comparison".into()),
            },
            // Pointers are non-null; equality against zero is decidable.
            (Val::Ptr(_), Val::Int(0)) | (Val::Int(0), Val::Ptr(_)) => match pred {
                Pred::Eq => Ok(concrete(false)),
                Pred::Ne => Ok(concrete(true)),
                _ => Err("unsupported pointer comparison".into()),
            },
            _ => {
                let ea = a.to_expr().ok_or("unsupported pointer comparison")?;
                let eb = b.to_expr().ok_or("unsupported pointer comparison")?;
                Ok(Val::Sym(match pred {
                    Pred::Eq => ea.eq(eb),
                    Pred::Ne => ea.ne(eb),
                    Pred::Lt => ea.lt(eb),
                    Pred::Le => ea.le(eb),
                    Pred::Gt => ea.gt(eb),
                    Pred::Ge => ea.ge(eb),
                }))
            }
        }
    }

    fn exec_terminator(
        &self,
        state: &mut State,
        tid: ThreadId,
        term: &Terminator,
    ) -> Result<Step, String> {
        match term {
            Terminator::Br { target } => Ok(self.take_edge(state, tid, *target)),

            Terminator::CondBr { cond, then_bb, else_bb } => {
                let cond = state.eval_operand(tid, cond)?;
                match cond.truth() {
                    Truth::True => Ok(self.take_edge(state, tid, *then_bb)),
                    Truth::False => Ok(self.take_edge(state, tid, *else_bb)),
                    Truth::Symbolic(c) => {
                        // One fork per data-dependent branch, whatever
                        // survives pruning.
                        self.reporter.on_branch_fork();
                        let mut children = Vec::with_capacity(2);
                        for (constraint, target) in [
                            (c.clone(), *then_bb),
                            (c.clone().not(), *else_bb),
                        ] {
                            match self.oracle.check_with(&state.path, &constraint) {
                                SatResult::Unsat => continue,
                                SatResult::Unknown(_) => {
                                    self.reporter.note_partial("solver returned unknown");
                                }
                                SatResult::Sat => {}
                            }
                            let mut child = state.clone();
                            child.path.push(constraint.clone());
                            self.note_loop_guard(&mut child, tid, constraint);
                            match self.take_edge(&mut child, tid, target) {
                                Step::Continue | Step::Done => children.push(child),
                                Step::Fork(_) => unreachable!("edges do not fork"),
                            }
                        }
                        if children.is_empty() {
                            // Both sides refuted: the path condition itself
                            // was unsatisfiable, which live states rule out.
                            return Err("branch with no feasible successor".into());
                        }
                        Ok(Step::Fork(children))
                    }
                }
            }

            Terminator::Ret { value } => {
                let value = match value {
                    Some(v) => Some(state.eval_operand(tid, v)?),
                    None => None,
                };
                let finished = state.thread_mut(tid).frames.pop().expect("ret without frame");
                if state.thread(tid).frames.is_empty() {
                    if tid == ThreadId(0) {
                        let code = value.and_then(|v| v.as_int()).unwrap_or(0);
                        debug!(exit_code = code, "state exited");
                        state.status = StateStatus::Exited(code);
                        return Ok(Step::Done);
                    }
                    state.thread_mut(tid).exit();
                    // Wake joiners parked on this thread.
                    for t in &mut state.threads {
                        if t.status == ThreadStatus::Blocked(BlockReason::Join(tid)) {
                            t.unblock();
                        }
                    }
                    return Ok(Step::Continue);
                }
                if let Some(reg) = finished.ret_reg {
                    let v = value.ok_or("call expects a return value")?;
                    self.set_reg(state, tid, reg, v);
                }
                Ok(Step::Continue)
            }
        }
    }

    /// Remember the guard conjunct for loops headed at the current block;
    /// the termination checker matches it against per-iteration deltas.
    fn note_loop_guard(&self, state: &mut State, tid: ThreadId, guard: Expr) {
        let frame = state.thread_mut(tid).frame_mut();
        if let Some(loop_id) = self.loops.head(frame.fun, frame.block) {
            frame.loops.entry(loop_id).or_default().last_guard = Some(guard);
        }
    }

    /// Move a thread to `target`, handling loop back-edge bookkeeping and
    /// the per-loop iteration budget.
    fn take_edge(&self, state: &mut State, tid: ThreadId, target: marmoset_ir::BlockId) -> Step {
        let (fun_id, from) = {
            let f = state.thread(tid).frame();
            (f.fun, f.block)
        };
        let back_edge = self.loops.back_edge(fun_id, from, target);
        let snapshot = back_edge.map(|_| crate::termination::snapshot(&state.memory));

        let frame = state.thread_mut(tid).frame_mut();
        frame.block = target;
        frame.ip = 0;

        if let Some(loop_id) = back_edge {
            let track = frame.loops.entry(loop_id).or_default();
            track.on_back_edge(snapshot.expect("snapshot taken for back edges"));
            if track.iters > self.opts.loop_bound {
                if track.certified {
                    // The ranking function covers the unexplored tail.
                    state.status = StateStatus::Terminated(TerminatedKind::CertifiedLoopCut);
                } else if self.opts.check_termination {
                    state.status = StateStatus::Errored(Finding::NonTermination {
                        site: self.site_label(Site { fun: fun_id, block: target, index: 0 }),
                    });
                } else {
                    state.status = StateStatus::BoundExceeded(BoundKind::LoopIterations);
                }
                return Step::Done;
            }
        }
        Step::Continue
    }

    fn lock_id(&self, state: &State, tid: ThreadId, mutex: &Operand) -> Result<LockId, String> {
        match state.eval_operand(tid, mutex)? {
            Val::Ptr(p) => match p.offset {
                Offset::Const(offset) => Ok(LockId { obj: p.obj, offset }),
                Offset::Sym(_) => Err("mutex with symbolic address".into()),
            },
            _ => Err("mutex operand is not a pointer".into()),
        }
    }

    fn set_reg(&self, state: &mut State, tid: ThreadId, reg: marmoset_ir::Reg, val: Val) {
        state.thread_mut(tid).frame_mut().regs[reg.0 as usize] = Some(val);
    }
}
