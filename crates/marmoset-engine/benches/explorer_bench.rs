use criterion::{criterion_group, criterion_main, Criterion};

use marmoset_engine::{analyze, ExecOptions};
use marmoset_ir::{BinOp, FunctionBuilder, Operand, Pred, Program, ProgramBuilder};

/// A chain of `depth` data-dependent branches: 2^depth feasible paths.
fn branch_chain(depth: usize) -> Program {
    let mut p = ProgramBuilder::new();
    let acc = p.global("acc", 1, true);
    let mut f = FunctionBuilder::new("main", 0);
    for _ in 0..depth {
        let n = f.nondet();
        let c = f.cmp(Pred::Gt, Operand::Reg(n), Operand::Const(0));
        let then_bb = f.block();
        let join_bb = f.block();
        f.cond_br(Operand::Reg(c), then_bb, join_bb);
        f.switch_to(then_bb);
        let v = f.load(Operand::Global(acc));
        let inc = f.bin(BinOp::Add, Operand::Reg(v), Operand::Const(1));
        f.store(Operand::Reg(inc), Operand::Global(acc));
        f.br(join_bb);
        f.switch_to(join_bb);
    }
    f.ret(Some(Operand::Const(0)));
    let main = p.define(f);
    p.set_entry(main);
    p.finish().expect("valid program")
}

fn bench_explorer(c: &mut Criterion) {
    let program = branch_chain(8);
    c.bench_function("explore_256_paths", |b| {
        b.iter(|| analyze(&program, &ExecOptions::default()))
    });

    let program = branch_chain(8);
    let parallel = ExecOptions { jobs: 4, ..ExecOptions::default() };
    c.bench_function("explore_256_paths_4_workers", |b| {
        b.iter(|| analyze(&program, &parallel))
    });
}

criterion_group!(benches, bench_explorer);
criterion_main!(benches);
