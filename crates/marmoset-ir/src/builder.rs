//! Programmatic construction of IR programs.
//!
//! The test suites (and tooling that does not go through the artifact
//! loader) assemble programs with these builders. `finish` runs the same
//! structural validation as the loader, so a builder cannot hand the engine
//! a malformed program.

use crate::loader::{validate, LoadError};
use crate::program::{
    BinOp, Block, BlockId, Callee, FunId, Function, Global, GlobalId, Instr, Operand, Pred,
    Program, Reg, Terminator,
};

/// Builds one function. Blocks are created with [`FunctionBuilder::block`]
/// and filled through the cursor set by [`FunctionBuilder::switch_to`];
/// the entry block exists from the start and is initially selected.
pub struct FunctionBuilder {
    name: String,
    params: u32,
    next_reg: u32,
    blocks: Vec<(Vec<Instr>, Option<Terminator>)>,
    cur: usize,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, params: u32) -> Self {
        Self {
            name: name.into(),
            params,
            next_reg: 0,
            blocks: vec![(Vec::new(), None)],
            cur: 0,
        }
    }

    /// Create a new, empty block (does not move the cursor).
    pub fn block(&mut self) -> BlockId {
        self.blocks.push((Vec::new(), None));
        BlockId((self.blocks.len() - 1) as u32)
    }

    /// Point the cursor at `block`; subsequent instructions append there.
    pub fn switch_to(&mut self, block: BlockId) {
        assert!((block.0 as usize) < self.blocks.len(), "unknown block {block}");
        self.cur = block.0 as usize;
    }

    fn fresh(&mut self) -> Reg {
        let r = Reg(self.next_reg);
        self.next_reg += 1;
        r
    }

    fn push(&mut self, instr: Instr) {
        let (instrs, term) = &mut self.blocks[self.cur];
        assert!(term.is_none(), "appending to a terminated block");
        instrs.push(instr);
    }

    fn terminate(&mut self, term: Terminator) {
        let slot = &mut self.blocks[self.cur].1;
        assert!(slot.is_none(), "block terminated twice");
        *slot = Some(term);
    }

    pub fn alloc(&mut self, cells: Operand) -> Reg {
        let dst = self.fresh();
        self.push(Instr::Alloc { dst, cells });
        dst
    }

    pub fn load(&mut self, ptr: Operand) -> Reg {
        let dst = self.fresh();
        self.push(Instr::Load { dst, ptr });
        dst
    }

    pub fn store(&mut self, val: Operand, ptr: Operand) {
        self.push(Instr::Store { val, ptr });
    }

    pub fn gep(&mut self, base: Operand, index: Operand) -> Reg {
        let dst = self.fresh();
        self.push(Instr::Gep { dst, base, index });
        dst
    }

    pub fn bin(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> Reg {
        let dst = self.fresh();
        self.push(Instr::Bin { dst, op, lhs, rhs });
        dst
    }

    pub fn cmp(&mut self, pred: Pred, lhs: Operand, rhs: Operand) -> Reg {
        let dst = self.fresh();
        self.push(Instr::Cmp { dst, pred, lhs, rhs });
        dst
    }

    pub fn nondet(&mut self) -> Reg {
        let dst = self.fresh();
        self.push(Instr::Nondet { dst });
        dst
    }

    pub fn assert(&mut self, cond: Operand) {
        self.push(Instr::Assert { cond });
    }

    pub fn assume(&mut self, cond: Operand) {
        self.push(Instr::Assume { cond });
    }

    /// Call with a used return value.
    pub fn call(&mut self, callee: Callee, args: Vec<Operand>) -> Reg {
        let dst = self.fresh();
        self.push(Instr::Call { dst: Some(dst), callee, args });
        dst
    }

    /// Call discarding any return value.
    pub fn call_void(&mut self, callee: Callee, args: Vec<Operand>) {
        self.push(Instr::Call { dst: None, callee, args });
    }

    pub fn thread_create(&mut self, entry: FunId, arg: Operand) -> Reg {
        let dst = self.fresh();
        self.push(Instr::ThreadCreate { dst, entry, arg });
        dst
    }

    pub fn thread_join(&mut self, handle: Operand) {
        self.push(Instr::ThreadJoin { handle });
    }

    pub fn mutex_init(&mut self, mutex: Operand) {
        self.push(Instr::MutexInit { mutex });
    }

    pub fn mutex_lock(&mut self, mutex: Operand) {
        self.push(Instr::MutexLock { mutex });
    }

    pub fn mutex_unlock(&mut self, mutex: Operand) {
        self.push(Instr::MutexUnlock { mutex });
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br { target });
    }

    pub fn cond_br(&mut self, cond: Operand, then_bb: BlockId, else_bb: BlockId) {
        self.terminate(Terminator::CondBr { cond, then_bb, else_bb });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.terminate(Terminator::Ret { value });
    }

    fn build(self) -> Function {
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, (instrs, term))| Block {
                instrs,
                term: term.unwrap_or_else(|| panic!("block bb{i} has no terminator")),
            })
            .collect();
        Function {
            name: self.name,
            params: self.params,
            regs: self.next_reg,
            blocks,
        }
    }
}

/// Builds a whole [`Program`].
#[derive(Default)]
pub struct ProgramBuilder {
    globals: Vec<Global>,
    functions: Vec<Option<Function>>,
    entry: Option<FunId>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&mut self, name: impl Into<String>, cells: u32, zeroed: bool) -> GlobalId {
        self.globals.push(Global { name: name.into(), cells, zeroed });
        GlobalId((self.globals.len() - 1) as u32)
    }

    /// Reserve a function id before its body exists, for forward references
    /// (mutual recursion, thread entries defined later).
    pub fn declare(&mut self) -> FunId {
        self.functions.push(None);
        FunId((self.functions.len() - 1) as u32)
    }

    /// Fill a previously declared slot.
    pub fn define_declared(&mut self, id: FunId, f: FunctionBuilder) {
        let slot = &mut self.functions[id.0 as usize];
        assert!(slot.is_none(), "function {id} defined twice");
        *slot = Some(f.build());
    }

    /// Append a finished function.
    pub fn define(&mut self, f: FunctionBuilder) -> FunId {
        self.functions.push(Some(f.build()));
        FunId((self.functions.len() - 1) as u32)
    }

    pub fn set_entry(&mut self, entry: FunId) {
        self.entry = Some(entry);
    }

    /// Assemble and validate the program.
    pub fn finish(self) -> Result<Program, LoadError> {
        let mut functions = Vec::with_capacity(self.functions.len());
        for (i, f) in self.functions.into_iter().enumerate() {
            match f {
                Some(f) => functions.push(f),
                None => {
                    return Err(LoadError::Structure {
                        message: format!("function f{i} was declared but never defined"),
                    })
                }
            }
        }
        let entry = self.entry.ok_or_else(|| LoadError::Structure {
            message: "no entry function set".into(),
        })?;
        let program = Program { globals: self.globals, functions, entry };
        validate(&program)?;
        Ok(program)
    }
}
