//! Shared program builders for the integration suites, mirroring the small
//! C programs this engine is meant to analyze.

#![allow(dead_code)]

use marmoset_engine::{analyze, ExecOptions, RunReport};
use marmoset_ir::{
    Callee, FunId, FunctionBuilder, Operand, Pred, Program, ProgramBuilder,
};

pub fn run(program: &Program) -> RunReport {
    analyze(program, &ExecOptions::default())
}

pub fn run_with(program: &Program, opts: &ExecOptions) -> RunReport {
    analyze(program, opts)
}

/// `int a; a = nondet(); if (a > 3) a += 1; else a -= 1;`
///
/// One data-dependent branch, both sides feasible, no checks.
pub fn branch_program() -> Program {
    let mut p = ProgramBuilder::new();
    let a = p.global("a", 1, true);
    let mut f = FunctionBuilder::new("main", 0);
    let n = f.nondet();
    f.store(Operand::Reg(n), Operand::Global(a));
    let v = f.load(Operand::Global(a));
    let c = f.cmp(Pred::Gt, Operand::Reg(v), Operand::Const(3));
    let then_bb = f.block();
    let else_bb = f.block();
    let exit_bb = f.block();
    f.cond_br(Operand::Reg(c), then_bb, else_bb);

    f.switch_to(then_bb);
    let v1 = f.load(Operand::Global(a));
    let inc = f.bin(marmoset_ir::BinOp::Add, Operand::Reg(v1), Operand::Const(1));
    f.store(Operand::Reg(inc), Operand::Global(a));
    f.br(exit_bb);

    f.switch_to(else_bb);
    let v2 = f.load(Operand::Global(a));
    let dec = f.bin(marmoset_ir::BinOp::Sub, Operand::Reg(v2), Operand::Const(1));
    f.store(Operand::Reg(dec), Operand::Global(a));
    f.br(exit_bb);

    f.switch_to(exit_bb);
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// `void foo(int y) { assert(y != 5); }  int main() { foo(5); }`
pub fn assert_arg_program() -> Program {
    let mut p = ProgramBuilder::new();
    let mut foo = FunctionBuilder::new("foo", 1);
    let c = foo.cmp(Pred::Ne, Operand::Param(0), Operand::Const(5));
    foo.assert(Operand::Reg(c));
    foo.ret(None);
    let foo = p.define(foo);

    let mut f = FunctionBuilder::new("main", 0);
    f.call_void(Callee::Fun(foo), vec![Operand::Const(5)]);
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// `unsigned x[100]; int k = nondet(); if (k < 0 || k >= 100) return 0;
/// assert(x[k] == 0);`
pub fn bounds_safe_program() -> Program {
    let mut p = ProgramBuilder::new();
    let x = p.global("x", 100, true);
    let mut f = FunctionBuilder::new("main", 0);
    let k = f.nondet();
    let in_range = f.block();
    let body = f.block();
    let exit_bb = f.block();

    let below = f.cmp(Pred::Lt, Operand::Reg(k), Operand::Const(0));
    f.cond_br(Operand::Reg(below), exit_bb, in_range);

    f.switch_to(in_range);
    let above = f.cmp(Pred::Ge, Operand::Reg(k), Operand::Const(100));
    f.cond_br(Operand::Reg(above), exit_bb, body);

    f.switch_to(body);
    let ptr = f.gep(Operand::Global(x), Operand::Reg(k));
    let v = f.load(Operand::Reg(ptr));
    let is_zero = f.cmp(Pred::Eq, Operand::Reg(v), Operand::Const(0));
    f.assert(Operand::Reg(is_zero));
    f.br(exit_bb);

    f.switch_to(exit_bb);
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// An unguarded symbolic index into a two-cell buffer.
pub fn oob_program() -> Program {
    let mut p = ProgramBuilder::new();
    let buf = p.global("buf", 2, true);
    let mut f = FunctionBuilder::new("main", 0);
    let k = f.nondet();
    let ptr = f.gep(Operand::Global(buf), Operand::Reg(k));
    let _ = f.load(Operand::Reg(ptr));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// `int n = nondet(); while (n > 0) --n; assert(n <= 0);`
pub fn countdown_program() -> Program {
    let mut p = ProgramBuilder::new();
    let mut f = FunctionBuilder::new("main", 0);
    let slot = f.alloc(Operand::Const(1));
    let n = f.nondet();
    f.store(Operand::Reg(n), Operand::Reg(slot));
    let head = f.block();
    let body = f.block();
    let after = f.block();
    f.br(head);

    f.switch_to(head);
    let v = f.load(Operand::Reg(slot));
    let c = f.cmp(Pred::Gt, Operand::Reg(v), Operand::Const(0));
    f.cond_br(Operand::Reg(c), body, after);

    f.switch_to(body);
    let v2 = f.load(Operand::Reg(slot));
    let dec = f.bin(marmoset_ir::BinOp::Sub, Operand::Reg(v2), Operand::Const(1));
    f.store(Operand::Reg(dec), Operand::Reg(slot));
    f.br(head);

    f.switch_to(after);
    let fin = f.load(Operand::Reg(slot));
    let le = f.cmp(Pred::Le, Operand::Reg(fin), Operand::Const(0));
    f.assert(Operand::Reg(le));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// `int x = nondet(); while (x < 100) x++; assert(0);`
pub fn climb_then_fail_program() -> Program {
    let mut p = ProgramBuilder::new();
    let mut f = FunctionBuilder::new("main", 0);
    let slot = f.alloc(Operand::Const(1));
    let x = f.nondet();
    f.store(Operand::Reg(x), Operand::Reg(slot));
    let head = f.block();
    let body = f.block();
    let after = f.block();
    f.br(head);

    f.switch_to(head);
    let v = f.load(Operand::Reg(slot));
    let c = f.cmp(Pred::Lt, Operand::Reg(v), Operand::Const(100));
    f.cond_br(Operand::Reg(c), body, after);

    f.switch_to(body);
    let v2 = f.load(Operand::Reg(slot));
    let inc = f.bin(marmoset_ir::BinOp::Add, Operand::Reg(v2), Operand::Const(1));
    f.store(Operand::Reg(inc), Operand::Reg(slot));
    f.br(head);

    f.switch_to(after);
    f.assert(Operand::Const(0));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// `int x = nondet(); while (x > 0) { }`: no progress, truly infinite
/// when entered.
pub fn stuck_loop_program() -> Program {
    let mut p = ProgramBuilder::new();
    let mut f = FunctionBuilder::new("main", 0);
    let slot = f.alloc(Operand::Const(1));
    let x = f.nondet();
    f.store(Operand::Reg(x), Operand::Reg(slot));
    let head = f.block();
    let body = f.block();
    let after = f.block();
    f.br(head);

    f.switch_to(head);
    let v = f.load(Operand::Reg(slot));
    let c = f.cmp(Pred::Gt, Operand::Reg(v), Operand::Const(0));
    f.cond_br(Operand::Reg(c), body, after);

    f.switch_to(body);
    f.br(head);

    f.switch_to(after);
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// Build a writer thread `void thr() { v = <val>; }` for `global`.
fn writer_thread(p: &mut ProgramBuilder, name: &str, global: marmoset_ir::GlobalId, val: i64) -> FunId {
    let mut f = FunctionBuilder::new(name, 0);
    f.store(Operand::Const(val), Operand::Global(global));
    f.ret(None);
    p.define(f)
}

/// Two threads write the same global scalar with no synchronization.
pub fn unsync_writers_program() -> Program {
    let mut p = ProgramBuilder::new();
    let v = p.global("v", 1, true);
    let t1 = writer_thread(&mut p, "thread1", v, 49);
    let t2 = writer_thread(&mut p, "thread2", v, 50);

    let mut f = FunctionBuilder::new("main", 0);
    let h1 = f.thread_create(t1, Operand::Const(0));
    let h2 = f.thread_create(t2, Operand::Const(0));
    f.thread_join(Operand::Reg(h1));
    f.thread_join(Operand::Reg(h2));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// Two threads write the same scalar, each under the same mutex.
pub fn locked_writers_program() -> Program {
    let mut p = ProgramBuilder::new();
    let v = p.global("v", 1, true);
    let lock = p.global("lock", 1, true);

    let mk = |name: &str, val: i64, p: &mut ProgramBuilder| {
        let mut f = FunctionBuilder::new(name, 0);
        f.mutex_lock(Operand::Global(lock));
        f.store(Operand::Const(val), Operand::Global(v));
        f.mutex_unlock(Operand::Global(lock));
        f.ret(None);
        p.define(f)
    };
    let t1 = mk("thread1", 49, &mut p);
    let t2 = mk("thread2", 50, &mut p);

    let mut f = FunctionBuilder::new("main", 0);
    f.mutex_init(Operand::Global(lock));
    let h1 = f.thread_create(t1, Operand::Const(0));
    let h2 = f.thread_create(t2, Operand::Const(0));
    f.thread_join(Operand::Reg(h1));
    f.thread_join(Operand::Reg(h2));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// `char v[2];` where each thread writes its own element, unsynchronized.
pub fn disjoint_offsets_program() -> Program {
    let mut p = ProgramBuilder::new();
    let v = p.global("v", 2, true);

    let mk = |name: &str, idx: i64, val: i64, p: &mut ProgramBuilder| {
        let mut f = FunctionBuilder::new(name, 0);
        let ptr = f.gep(Operand::Global(v), Operand::Const(idx));
        f.store(Operand::Const(val), Operand::Reg(ptr));
        f.ret(None);
        p.define(f)
    };
    let t1 = mk("thread1", 0, 49, &mut p);
    let t2 = mk("thread2", 1, 50, &mut p);

    let mut f = FunctionBuilder::new("main", 0);
    let h1 = f.thread_create(t1, Operand::Const(0));
    let h2 = f.thread_create(t2, Operand::Const(0));
    f.thread_join(Operand::Reg(h1));
    f.thread_join(Operand::Reg(h2));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// Each thread writes the shared scalar only under a branch on its own
/// uninitialized (hence nondeterministic) local.
pub fn guarded_racers_program() -> Program {
    let mut p = ProgramBuilder::new();
    let v = p.global("v", 1, true);

    let mk = |name: &str, val: i64, p: &mut ProgramBuilder| {
        let mut f = FunctionBuilder::new(name, 0);
        let slot = f.alloc(Operand::Const(1));
        let guard = f.load(Operand::Reg(slot));
        let c = f.cmp(Pred::Lt, Operand::Reg(guard), Operand::Const(5));
        let write_bb = f.block();
        let done_bb = f.block();
        f.cond_br(Operand::Reg(c), write_bb, done_bb);
        f.switch_to(write_bb);
        f.store(Operand::Const(val), Operand::Global(v));
        f.br(done_bb);
        f.switch_to(done_bb);
        f.ret(None);
        p.define(f)
    };
    let t1 = mk("thread1", 49, &mut p);
    let t2 = mk("thread2", 50, &mut p);

    let mut f = FunctionBuilder::new("main", 0);
    let h1 = f.thread_create(t1, Operand::Const(0));
    let h2 = f.thread_create(t2, Operand::Const(0));
    f.thread_join(Operand::Reg(h1));
    f.thread_join(Operand::Reg(h2));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// Classic AB-BA lock ordering: some interleavings deadlock.
pub fn abba_deadlock_program() -> Program {
    let mut p = ProgramBuilder::new();
    let la = p.global("lock_a", 1, true);
    let lb = p.global("lock_b", 1, true);

    let mk = |name: &str, first: marmoset_ir::GlobalId, second: marmoset_ir::GlobalId,
                  p: &mut ProgramBuilder| {
        let mut f = FunctionBuilder::new(name, 0);
        f.mutex_lock(Operand::Global(first));
        f.mutex_lock(Operand::Global(second));
        f.mutex_unlock(Operand::Global(second));
        f.mutex_unlock(Operand::Global(first));
        f.ret(None);
        p.define(f)
    };
    let t1 = mk("thread1", la, lb, &mut p);
    let t2 = mk("thread2", lb, la, &mut p);

    let mut f = FunctionBuilder::new("main", 0);
    f.mutex_init(Operand::Global(la));
    f.mutex_init(Operand::Global(lb));
    let h1 = f.thread_create(t1, Operand::Const(0));
    let h2 = f.thread_create(t2, Operand::Const(0));
    f.thread_join(Operand::Reg(h1));
    f.thread_join(Operand::Reg(h2));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// Parent writes the global before create; the child reads it afterwards.
pub fn create_ordering_program() -> Program {
    let mut p = ProgramBuilder::new();
    let v = p.global("v", 1, true);

    let mut reader = FunctionBuilder::new("reader", 0);
    let _ = reader.load(Operand::Global(v));
    reader.ret(None);
    let reader = p.define(reader);

    let mut f = FunctionBuilder::new("main", 0);
    f.store(Operand::Const(7), Operand::Global(v));
    let h = f.thread_create(reader, Operand::Const(0));
    f.thread_join(Operand::Reg(h));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// The child writes; the parent reads only after joining it.
pub fn join_ordering_program() -> Program {
    let mut p = ProgramBuilder::new();
    let v = p.global("v", 1, true);
    let writer = writer_thread(&mut p, "writer", v, 42);

    let mut f = FunctionBuilder::new("main", 0);
    let h = f.thread_create(writer, Operand::Const(0));
    f.thread_join(Operand::Reg(h));
    let _ = f.load(Operand::Global(v));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// Two feasible paths, each ending in a distinct failing assertion.
pub fn two_failures_program() -> Program {
    let mut p = ProgramBuilder::new();
    let mut f = FunctionBuilder::new("main", 0);
    let n = f.nondet();
    let c = f.cmp(Pred::Gt, Operand::Reg(n), Operand::Const(0));
    let then_bb = f.block();
    let else_bb = f.block();
    f.cond_br(Operand::Reg(c), then_bb, else_bb);
    f.switch_to(then_bb);
    f.assert(Operand::Const(0));
    f.ret(Some(Operand::Const(0)));
    f.switch_to(else_bb);
    f.assert(Operand::Const(0));
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

/// `assume(n > 10); if (n < 5) { assert(0); }`: the then-side is
/// infeasible and must be pruned silently.
pub fn infeasible_branch_program() -> Program {
    let mut p = ProgramBuilder::new();
    let mut f = FunctionBuilder::new("main", 0);
    let n = f.nondet();
    let big = f.cmp(Pred::Gt, Operand::Reg(n), Operand::Const(10));
    f.assume(Operand::Reg(big));
    let small = f.cmp(Pred::Lt, Operand::Reg(n), Operand::Const(5));
    let then_bb = f.block();
    let else_bb = f.block();
    f.cond_br(Operand::Reg(small), then_bb, else_bb);
    f.switch_to(then_bb);
    f.assert(Operand::Const(0));
    f.ret(Some(Operand::Const(0)));
    f.switch_to(else_bb);
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}
