//! The solver interface consumed by the engine.

use std::collections::HashMap;

use thiserror::Error;

use crate::terms::{Expr, SymId};

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

impl SatResult {
    /// Whether a path with this result may be feasible. `Unknown` counts as
    /// feasible: the engine must never prune on an inconclusive answer.
    pub fn may_be_sat(&self) -> bool {
        !matches!(self, SatResult::Unsat)
    }
}

/// An integer assignment extracted from a `Sat` answer.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub values: HashMap<SymId, i64>,
}

impl Model {
    pub fn get(&self, id: SymId) -> Option<i64> {
        self.values.get(&id).copied()
    }
}

/// Error surface of a solver backend.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver backend failure: {0}")]
    Backend(String),
}

/// Abstract satisfiability oracle over [`Expr`] constraints.
///
/// Backends hold a stack of assertion scopes. The built-in implementation
/// is [`crate::decide::LinearSolver`]; an external SMT process would slot
/// in behind the same trait.
pub trait ConstraintSolver {
    /// Assert a boolean constraint in the current scope.
    fn assert(&mut self, term: &Expr) -> Result<(), SolverError>;

    /// Push a new scope.
    fn push(&mut self) -> Result<(), SolverError>;

    /// Pop the innermost scope, dropping its assertions.
    fn pop(&mut self) -> Result<(), SolverError>;

    /// Check satisfiability of the asserted conjunction.
    fn check_sat(&mut self) -> Result<SatResult, SolverError>;

    /// Check satisfiability and extract a model if satisfiable.
    fn check_sat_with_model(&mut self) -> Result<(SatResult, Option<Model>), SolverError>;

    /// Drop all scopes and assertions.
    fn reset(&mut self) -> Result<(), SolverError>;
}
