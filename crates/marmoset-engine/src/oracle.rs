//! The engine's feasibility oracle.
//!
//! A thin facade over the constraint solver: the engine only ever asks
//! "is this path condition (plus one extra constraint) satisfiable".
//! `Unknown` answers keep the path alive: pruning on an inconclusive
//! answer would silently drop feasible behavior.

use marmoset_solver::{decide, Expr, SatResult};
use tracing::debug;

/// Stateless satisfiability oracle over path conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Oracle;

impl Oracle {
    pub fn new() -> Self {
        Oracle
    }

    /// Check a path condition extended with one extra conjunct.
    pub fn check_with(&self, path: &[Expr], extra: &Expr) -> SatResult {
        let mut conjuncts = Vec::with_capacity(path.len() + 1);
        conjuncts.extend_from_slice(path);
        conjuncts.push(extra.clone());
        let result = decide::check(&conjuncts);
        if let SatResult::Unknown(reason) = &result {
            debug!(%extra, %reason, "oracle returned unknown");
        }
        result
    }

    /// Check a bare path condition.
    pub fn check(&self, path: &[Expr]) -> SatResult {
        decide::check(path)
    }

    /// Whether `extra` is impossible under `path`: an exact refutation.
    pub fn refutes(&self, path: &[Expr], extra: &Expr) -> bool {
        matches!(self.check_with(path, extra), SatResult::Unsat)
    }
}
