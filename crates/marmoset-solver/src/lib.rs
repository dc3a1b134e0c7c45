#![doc = include_str!("../README.md")]

//! Marmoset constraint oracle.
//!
//! The engine builds path conditions as conjunctions of [`terms::Expr`]
//! and asks the oracle for satisfiability through the
//! [`solver::ConstraintSolver`] trait. [`decide`] is the built-in
//! implementation.

pub mod decide;
pub mod solver;
pub mod terms;

pub use decide::{check, check_with_model, LinearSolver};
pub use solver::{ConstraintSolver, Model, SatResult, SolverError};
pub use terms::{Expr, SymId};
