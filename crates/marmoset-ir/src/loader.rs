//! Artifact loading and structural validation.
//!
//! The front end serializes the compiled program as JSON. A malformed or
//! structurally invalid artifact is a fatal condition: it is surfaced as a
//! diagnostic and the process exits non-zero without claiming any partial
//! report.

use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

use crate::program::{Callee, Instr, Operand, Program, Terminator};

/// Errors produced while loading or validating an input artifact.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("cannot read artifact '{path}': {source}")]
    #[diagnostic(code(marmoset::load::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact: {0}")]
    #[diagnostic(
        code(marmoset::load::malformed),
        help("the artifact must be a JSON program produced by the front end")
    )]
    Malformed(#[from] serde_json::Error),

    #[error("invalid program: {message}")]
    #[diagnostic(code(marmoset::load::structure))]
    Structure { message: String },
}

fn structure(message: impl Into<String>) -> LoadError {
    LoadError::Structure { message: message.into() }
}

/// Load a program from a JSON string.
pub fn load_str(source: &str) -> Result<Program, LoadError> {
    let program: Program = serde_json::from_str(source)?;
    validate(&program)?;
    Ok(program)
}

/// Load a program from a file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Program, LoadError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_str(&source)
}

/// Structural validation shared by the loader and the builder: every id is
/// in range and every register is assigned before any use along block
/// order. This is what makes downstream indexing in the engine safe.
pub fn validate(program: &Program) -> Result<(), LoadError> {
    if program.entry.0 as usize >= program.functions.len() {
        return Err(structure(format!(
            "entry {} out of range ({} functions)",
            program.entry,
            program.functions.len()
        )));
    }
    if program.function(program.entry).params != 0 {
        return Err(structure("entry function must take no parameters"));
    }

    for (fi, fun) in program.functions.iter().enumerate() {
        let ctx = |msg: String| structure(format!("function '{}' (f{fi}): {msg}", fun.name));
        if fun.blocks.is_empty() {
            return Err(ctx("has no blocks".into()));
        }

        let check_operand = |op: &Operand| -> Result<(), LoadError> {
            match op {
                Operand::Const(_) => Ok(()),
                Operand::Reg(r) => {
                    if r.0 >= fun.regs {
                        Err(ctx(format!("register {r} out of range (regs = {})", fun.regs)))
                    } else {
                        Ok(())
                    }
                }
                Operand::Param(i) => {
                    if *i >= fun.params {
                        Err(ctx(format!("parameter #{i} out of range")))
                    } else {
                        Ok(())
                    }
                }
                Operand::Global(g) => {
                    if g.0 as usize >= program.globals.len() {
                        Err(ctx(format!("global g{} out of range", g.0)))
                    } else {
                        Ok(())
                    }
                }
            }
        };
        let check_block = |b: &crate::program::BlockId| -> Result<(), LoadError> {
            if b.0 as usize >= fun.blocks.len() {
                Err(ctx(format!("branch target {b} out of range")))
            } else {
                Ok(())
            }
        };

        for block in &fun.blocks {
            for instr in &block.instrs {
                match instr {
                    Instr::Alloc { cells, .. } => check_operand(cells)?,
                    Instr::Load { ptr, .. } => check_operand(ptr)?,
                    Instr::Store { val, ptr } => {
                        check_operand(val)?;
                        check_operand(ptr)?;
                    }
                    Instr::Gep { base, index, .. } => {
                        check_operand(base)?;
                        check_operand(index)?;
                    }
                    Instr::Bin { lhs, rhs, .. } | Instr::Cmp { lhs, rhs, .. } => {
                        check_operand(lhs)?;
                        check_operand(rhs)?;
                    }
                    Instr::Nondet { .. } => {}
                    Instr::Assert { cond } | Instr::Assume { cond } => check_operand(cond)?,
                    Instr::Call { callee, args, .. } => {
                        if let Callee::Fun(id) = callee {
                            if id.0 as usize >= program.functions.len() {
                                return Err(ctx(format!("call target {id} out of range")));
                            }
                            let callee_fun = program.function(*id);
                            if args.len() != callee_fun.params as usize {
                                return Err(ctx(format!(
                                    "call to '{}' passes {} arguments, expected {}",
                                    callee_fun.name,
                                    args.len(),
                                    callee_fun.params
                                )));
                            }
                        }
                        for a in args {
                            check_operand(a)?;
                        }
                    }
                    Instr::ThreadCreate { entry, arg, .. } => {
                        if entry.0 as usize >= program.functions.len() {
                            return Err(ctx(format!("thread entry {entry} out of range")));
                        }
                        if program.function(*entry).params > 1 {
                            return Err(ctx(format!(
                                "thread entry '{}' must take at most one parameter",
                                program.function(*entry).name
                            )));
                        }
                        check_operand(arg)?;
                    }
                    Instr::ThreadJoin { handle } => check_operand(handle)?,
                    Instr::MutexInit { mutex }
                    | Instr::MutexLock { mutex }
                    | Instr::MutexUnlock { mutex } => check_operand(mutex)?,
                }
                if let Some(dst) = instr.dst() {
                    if dst.0 >= fun.regs {
                        return Err(ctx(format!("destination {dst} out of range")));
                    }
                }
            }
            match &block.term {
                Terminator::Br { target } => check_block(target)?,
                Terminator::CondBr { cond, then_bb, else_bb } => {
                    check_operand(cond)?;
                    check_block(then_bb)?;
                    check_block(else_bb)?;
                }
                Terminator::Ret { value } => {
                    if let Some(v) = value {
                        check_operand(v)?;
                    }
                }
            }
        }
    }
    Ok(())
}
