#![doc = include_str!("../README.md")]

//! Marmoset intermediate representation.
//!
//! This crate defines the analyzable program IR (functions, basic blocks,
//! instructions with explicit thread/lock operations), the loop back-edge
//! analysis consumed by the termination checker, the JSON artifact loader,
//! and the in-code program builder used by the tests.

pub mod analysis;
pub mod builder;
pub mod loader;
pub mod program;

pub use analysis::{analyze_loops, LoopId, LoopInfo};
pub use builder::{FunctionBuilder, ProgramBuilder};
pub use loader::{load_file, load_str, LoadError};
pub use program::{
    BinOp, Block, BlockId, Callee, FunId, Function, Global, GlobalId, Instr, Operand, Pred,
    Program, Reg, Site, Terminator,
};
