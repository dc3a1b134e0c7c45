//! Core IR types.
//!
//! The IR is register-based: every value-producing instruction writes a
//! function-local register, and operands refer to registers, parameters,
//! constants, or the addresses of globals. Memory is addressed through
//! typed pointers produced by `Alloc`, global references, and `Gep`;
//! the engine resolves them to (object, offset) pairs, never raw addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a function in [`Program::functions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunId(pub u32);

/// Index of a basic block within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// A function-local virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reg(pub u32);

/// Index of a global in [`Program::globals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

impl fmt::Display for FunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An instruction position, used to identify finding sites.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Site {
    pub fun: FunId,
    pub block: BlockId,
    pub index: u32,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.fun, self.block, self.index)
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Integer constant.
    Const(i64),
    /// Value of a previously assigned register.
    Reg(Reg),
    /// Value of a function parameter.
    Param(u32),
    /// Address of a global object (pointer to its first cell).
    Global(GlobalId),
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

/// Comparison predicates (signed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A call target: a function in this program, or an opaque external.
///
/// Externals model library calls the front end could not resolve. The
/// engine treats them as nondeterministic: they produce a fresh symbolic
/// result and have no side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    Fun(FunId),
    External(String),
}

/// A non-terminator instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    /// Allocate a fresh memory object with `cells` cells; `dst` receives a
    /// pointer to its first cell. Cells start uninitialized.
    Alloc { dst: Reg, cells: Operand },
    /// Load the cell addressed by `ptr`.
    Load { dst: Reg, ptr: Operand },
    /// Store `val` into the cell addressed by `ptr`.
    Store { val: Operand, ptr: Operand },
    /// Pointer offset: `dst = base + index` cells.
    Gep { dst: Reg, base: Operand, index: Operand },
    /// Integer arithmetic.
    Bin { dst: Reg, op: BinOp, lhs: Operand, rhs: Operand },
    /// Integer comparison; result is 1 or 0 (possibly symbolic).
    Cmp { dst: Reg, pred: Pred, lhs: Operand, rhs: Operand },
    /// Produce a fresh nondeterministic value.
    Nondet { dst: Reg },
    /// Check a condition; a (feasibly) false condition is an assertion
    /// violation finding.
    Assert { cond: Operand },
    /// Constrain the path to executions where the condition holds.
    Assume { cond: Operand },
    /// Call a function. `dst` receives the return value, if any.
    Call { dst: Option<Reg>, callee: Callee, args: Vec<Operand> },
    /// Spawn a new thread running `entry(arg)`; `dst` receives its handle.
    ThreadCreate { dst: Reg, entry: FunId, arg: Operand },
    /// Wait for the thread identified by `handle` to exit.
    ThreadJoin { handle: Operand },
    /// Initialize the mutex whose identity is the addressed cell.
    MutexInit { mutex: Operand },
    /// Acquire a mutex, blocking while another thread owns it.
    MutexLock { mutex: Operand },
    /// Release a mutex owned by the current thread.
    MutexUnlock { mutex: Operand },
}

impl Instr {
    /// The register written by this instruction, if any.
    pub fn dst(&self) -> Option<Reg> {
        match self {
            Instr::Alloc { dst, .. }
            | Instr::Load { dst, .. }
            | Instr::Gep { dst, .. }
            | Instr::Bin { dst, .. }
            | Instr::Cmp { dst, .. }
            | Instr::Nondet { dst }
            | Instr::ThreadCreate { dst, .. } => Some(*dst),
            Instr::Call { dst, .. } => *dst,
            _ => None,
        }
    }
}

/// A block terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional jump.
    Br { target: BlockId },
    /// Two-way branch on an integer condition (zero = false).
    CondBr { cond: Operand, then_bb: BlockId, else_bb: BlockId },
    /// Return from the current function.
    Ret { value: Option<Operand> },
}

impl Terminator {
    /// Successor blocks of this terminator.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        let (a, b) = match self {
            Terminator::Br { target } => (Some(*target), None),
            Terminator::CondBr { then_bb, else_bb, .. } => (Some(*then_bb), Some(*else_bb)),
            Terminator::Ret { .. } => (None, None),
        };
        a.into_iter().chain(b)
    }
}

/// A basic block: straight-line instructions plus one terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub instrs: Vec<Instr>,
    pub term: Terminator,
}

/// A function. Block 0 is the entry block; registers are numbered
/// `0..regs` and written before any use (loop bodies reassign them on
/// every iteration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: u32,
    pub regs: u32,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }
}

/// A global memory object. C globals without an explicit initializer are
/// zero-initialized, so `zeroed` is almost always true; a non-zeroed global
/// starts with uninitialized cells like an `Alloc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub cells: u32,
    pub zeroed: bool,
}

/// A whole program: the unit the engine analyzes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
    pub entry: FunId,
}

impl Program {
    pub fn function(&self, id: FunId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    /// Render a site as `function:block:index` using the function name.
    pub fn site_label(&self, site: Site) -> String {
        format!(
            "{}:{}:{}",
            self.function(site.fun).name,
            site.block,
            site.index
        )
    }
}
