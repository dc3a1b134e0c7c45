//! Built-in decision procedure for linear integer arithmetic.
//!
//! The engine's path conditions are conjunctions of (negated) comparisons
//! over integer-linear terms, occasionally with disjunctions introduced by
//! disequalities. The procedure runs in three stages:
//!
//! 1. Normalize to NNF and split on `Or`/`Ne` (bounded DPLL-style search).
//! 2. Per branch, normalize atoms to `Σ cᵢ·xᵢ + k ≤ 0`, tighten integer
//!    bounds for univariate atoms, and substitute fixed variables.
//! 3. Decide remaining multivariate systems by Fourier–Motzkin elimination
//!    over the rationals; a derived contradiction is a sound `Unsat` for
//!    the integers, and a candidate model is only reported as `Sat` after
//!    it has been verified against the original constraints.
//!
//! Anything outside the fragment (nonlinear terms, exhausted budgets,
//! unverifiable candidate models) yields `Unknown`, which callers treat as
//! "cannot prune".

use std::collections::BTreeMap;

use crate::solver::{ConstraintSolver, Model, SatResult, SolverError};
use crate::terms::{Expr, EvalValue, SymId};

/// Branch budget for the `Or`/`Ne` split search.
const SPLIT_FUEL: u32 = 4096;
/// Cap on the number of inequalities produced by elimination.
const FM_ATOM_CAP: usize = 1024;

/// Check satisfiability of a conjunction.
pub fn check(conjuncts: &[Expr]) -> SatResult {
    check_with_model(conjuncts).0
}

/// Check satisfiability and produce a verified model when satisfiable.
pub fn check_with_model(conjuncts: &[Expr]) -> (SatResult, Option<Model>) {
    let mut fuel = SPLIT_FUEL;
    let goals: Vec<Expr> = conjuncts.iter().map(|e| nnf(e, false)).collect();
    match solve(goals, conjuncts, &mut fuel) {
        Outcome::Sat(model) => (SatResult::Sat, Some(model)),
        Outcome::Unsat => (SatResult::Unsat, None),
        Outcome::Unknown(reason) => (SatResult::Unknown(reason), None),
    }
}

enum Outcome {
    Sat(Model),
    Unsat,
    Unknown(String),
}

/// Negation normal form: push `Not` onto atoms, fold literals.
fn nnf(e: &Expr, negated: bool) -> Expr {
    match (e, negated) {
        (Expr::Not(inner), _) => nnf(inner, !negated),
        (Expr::BoolLit(b), _) => Expr::BoolLit(*b != negated),
        (Expr::And(ts), false) => Expr::And(ts.iter().map(|t| nnf(t, false)).collect()),
        (Expr::And(ts), true) => Expr::Or(ts.iter().map(|t| nnf(t, true)).collect()),
        (Expr::Or(ts), false) => Expr::Or(ts.iter().map(|t| nnf(t, false)).collect()),
        (Expr::Or(ts), true) => Expr::And(ts.iter().map(|t| nnf(t, true)).collect()),
        (Expr::Eq(a, b), false) => Expr::Eq(a.clone(), b.clone()),
        (Expr::Eq(a, b), true) => Expr::Ne(a.clone(), b.clone()),
        (Expr::Ne(a, b), false) => Expr::Ne(a.clone(), b.clone()),
        (Expr::Ne(a, b), true) => Expr::Eq(a.clone(), b.clone()),
        (Expr::Lt(a, b), false) => Expr::Lt(a.clone(), b.clone()),
        (Expr::Lt(a, b), true) => Expr::Ge(a.clone(), b.clone()),
        (Expr::Le(a, b), false) => Expr::Le(a.clone(), b.clone()),
        (Expr::Le(a, b), true) => Expr::Gt(a.clone(), b.clone()),
        (Expr::Gt(a, b), false) => Expr::Gt(a.clone(), b.clone()),
        (Expr::Gt(a, b), true) => Expr::Le(a.clone(), b.clone()),
        (Expr::Ge(a, b), false) => Expr::Ge(a.clone(), b.clone()),
        (Expr::Ge(a, b), true) => Expr::Lt(a.clone(), b.clone()),
        // Integer-valued terms used as conditions: nonzero means true.
        (other, false) => Expr::Ne(Box::new(other.clone()), Box::new(Expr::IntLit(0))),
        (other, true) => Expr::Eq(Box::new(other.clone()), Box::new(Expr::IntLit(0))),
    }
}

fn solve(mut goals: Vec<Expr>, original: &[Expr], fuel: &mut u32) -> Outcome {
    let mut atoms: Vec<LinAtom> = Vec::new();
    let mut nonlinear = false;

    while let Some(goal) = goals.pop() {
        match goal {
            Expr::BoolLit(true) => {}
            Expr::BoolLit(false) => return Outcome::Unsat,
            Expr::And(ts) => goals.extend(ts),
            Expr::Or(ts) => {
                let mut saw_unknown = false;
                for t in ts {
                    if *fuel == 0 {
                        return Outcome::Unknown("split budget exhausted".into());
                    }
                    *fuel -= 1;
                    let mut branch = goals.clone();
                    branch.push(t);
                    branch.extend(atoms.iter().map(LinAtom::to_expr));
                    if nonlinear {
                        // Re-verification against `original` covers the
                        // nonlinear part; the branch itself stays linear.
                        saw_unknown = true;
                    }
                    match solve(branch, original, fuel) {
                        Outcome::Sat(model) => return Outcome::Sat(model),
                        Outcome::Unsat => {}
                        Outcome::Unknown(_) => saw_unknown = true,
                    }
                }
                return if saw_unknown {
                    Outcome::Unknown("disjunction undecided".into())
                } else {
                    Outcome::Unsat
                };
            }
            Expr::Ne(a, b) => {
                goals.push(Expr::Or(vec![Expr::Lt(a.clone(), b.clone()), Expr::Gt(a, b)]));
            }
            Expr::Eq(a, b) => match (linearize(&a), linearize(&b)) {
                (Some(la), Some(lb)) => {
                    let diff = la.sub(&lb);
                    atoms.push(LinAtom::new(diff.clone(), 0));
                    atoms.push(LinAtom::new(diff.negate(), 0));
                }
                _ => nonlinear = true,
            },
            Expr::Lt(a, b) => push_cmp(&mut atoms, &mut nonlinear, &a, &b, 1, false),
            Expr::Le(a, b) => push_cmp(&mut atoms, &mut nonlinear, &a, &b, 0, false),
            Expr::Gt(a, b) => push_cmp(&mut atoms, &mut nonlinear, &a, &b, 1, true),
            Expr::Ge(a, b) => push_cmp(&mut atoms, &mut nonlinear, &a, &b, 0, true),
            Expr::Not(_) => return Outcome::Unknown("unnormalized negation".into()),
            other => {
                // Bare integer term as condition.
                goals.push(Expr::Ne(Box::new(other), Box::new(Expr::IntLit(0))));
            }
        }
    }

    decide_linear(atoms, nonlinear, original)
}

/// `a ⋈ b` as `±(a - b) + slack ≤ 0`.
fn push_cmp(
    atoms: &mut Vec<LinAtom>,
    nonlinear: &mut bool,
    a: &Expr,
    b: &Expr,
    slack: i64,
    flip: bool,
) {
    match (linearize(a), linearize(b)) {
        (Some(la), Some(lb)) => {
            let diff = if flip { lb.sub(&la) } else { la.sub(&lb) };
            atoms.push(LinAtom::new(diff, slack));
        }
        _ => *nonlinear = true,
    }
}

/// A linear term `Σ cᵢ·xᵢ + k`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LinExpr {
    coeffs: BTreeMap<SymId, i64>,
    k: i64,
}

impl LinExpr {
    fn constant(k: i64) -> Self {
        LinExpr { coeffs: BTreeMap::new(), k }
    }

    fn var(id: SymId) -> Self {
        let mut coeffs = BTreeMap::new();
        coeffs.insert(id, 1);
        LinExpr { coeffs, k: 0 }
    }

    fn add(&self, other: &LinExpr) -> Self {
        let mut coeffs = self.coeffs.clone();
        for (v, c) in &other.coeffs {
            let e = coeffs.entry(*v).or_insert(0);
            *e = e.saturating_add(*c);
            if *e == 0 {
                coeffs.remove(v);
            }
        }
        LinExpr { coeffs, k: self.k.saturating_add(other.k) }
    }

    fn negate(&self) -> Self {
        LinExpr {
            coeffs: self.coeffs.iter().map(|(v, c)| (*v, -c)).collect(),
            k: -self.k,
        }
    }

    fn sub(&self, other: &LinExpr) -> Self {
        self.add(&other.negate())
    }

    fn scale(&self, factor: i64) -> Self {
        LinExpr {
            coeffs: self
                .coeffs
                .iter()
                .map(|(v, c)| (*v, c.saturating_mul(factor)))
                .collect(),
            k: self.k.saturating_mul(factor),
        }
    }

    fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }
}

/// Turn an integer-valued term into a linear expression, or `None` when it
/// falls outside the linear fragment.
fn linearize(e: &Expr) -> Option<LinExpr> {
    match e {
        Expr::Var(id) => Some(LinExpr::var(*id)),
        Expr::IntLit(n) => Some(LinExpr::constant(*n)),
        Expr::Add(a, b) => Some(linearize(a)?.add(&linearize(b)?)),
        Expr::Sub(a, b) => Some(linearize(a)?.sub(&linearize(b)?)),
        Expr::Neg(a) => Some(linearize(a)?.negate()),
        Expr::Mul(a, b) => {
            let la = linearize(a)?;
            let lb = linearize(b)?;
            if la.is_constant() {
                Some(lb.scale(la.k))
            } else if lb.is_constant() {
                Some(la.scale(lb.k))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// A constraint `expr ≤ 0`.
#[derive(Debug, Clone)]
struct LinAtom {
    expr: LinExpr,
}

impl LinAtom {
    fn new(mut expr: LinExpr, slack: i64) -> Self {
        expr.k = expr.k.saturating_add(slack);
        LinAtom { expr }
    }

    /// Render back into a term (used when re-entering the split search).
    fn to_expr(&self) -> Expr {
        let mut sum = Expr::IntLit(self.expr.k);
        for (v, c) in &self.expr.coeffs {
            let term = if *c == 1 {
                Expr::Var(*v)
            } else {
                Expr::IntLit(*c).mul(Expr::Var(*v))
            };
            sum = sum.add(term);
        }
        sum.le(Expr::IntLit(0))
    }
}

fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn div_ceil(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) == (b < 0)) {
        q + 1
    } else {
        q
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Interval {
    lo: Option<i64>,
    hi: Option<i64>,
}

impl Interval {
    fn tighten_hi(&mut self, hi: i64) {
        self.hi = Some(self.hi.map_or(hi, |h| h.min(hi)));
    }

    fn tighten_lo(&mut self, lo: i64) {
        self.lo = Some(self.lo.map_or(lo, |l| l.max(lo)));
    }

    fn empty(&self) -> bool {
        matches!((self.lo, self.hi), (Some(l), Some(h)) if l > h)
    }

    fn pick(&self) -> i64 {
        match (self.lo, self.hi) {
            (Some(l), Some(h)) if l <= 0 && 0 <= h => 0,
            (Some(l), Some(h)) => {
                if l > 0 {
                    l
                } else {
                    h
                }
            }
            (Some(l), None) => l.max(0),
            (None, Some(h)) => h.min(0),
            (None, None) => 0,
        }
    }

    fn contains(&self, v: i64) -> bool {
        self.lo.map_or(true, |l| l <= v) && self.hi.map_or(true, |h| v <= h)
    }
}

fn decide_linear(atoms: Vec<LinAtom>, nonlinear: bool, original: &[Expr]) -> Outcome {
    let mut intervals: BTreeMap<SymId, Interval> = BTreeMap::new();
    let mut fixed: BTreeMap<SymId, i64> = BTreeMap::new();
    let mut pending: Vec<LinAtom> = atoms;

    // Bound propagation with integer tightening, substituting variables as
    // they become fixed.
    loop {
        let mut progressed = false;
        let mut multivar: Vec<LinAtom> = Vec::new();
        for atom in pending.drain(..) {
            let mut expr = atom.expr;
            // Substitute fixed variables.
            let mut k = expr.k;
            expr.coeffs.retain(|v, c| {
                if let Some(val) = fixed.get(v) {
                    k = k.saturating_add(c.saturating_mul(*val));
                    false
                } else {
                    true
                }
            });
            expr.k = k;

            match expr.coeffs.len() {
                0 => {
                    if expr.k > 0 {
                        return Outcome::Unsat;
                    }
                }
                1 => {
                    let (v, c) = expr.coeffs.iter().next().map(|(v, c)| (*v, *c)).expect("one coeff");
                    let iv = intervals.entry(v).or_default();
                    if c > 0 {
                        iv.tighten_hi(div_floor(-expr.k, c));
                    } else {
                        iv.tighten_lo(div_ceil(-expr.k, c));
                    }
                    if iv.empty() {
                        return Outcome::Unsat;
                    }
                    if let (Some(l), Some(h)) = (iv.lo, iv.hi) {
                        if l == h && fixed.insert(v, l).is_none() {
                            progressed = true;
                        }
                    }
                }
                _ => multivar.push(LinAtom { expr }),
            }
        }
        pending = multivar;
        if !progressed {
            break;
        }
    }

    if !pending.is_empty() {
        // Fold known interval bounds in as inequalities so elimination sees
        // the whole system.
        let mut system = pending.clone();
        for (v, iv) in &intervals {
            if let Some(h) = iv.hi {
                system.push(LinAtom::new(LinExpr::var(*v).sub(&LinExpr::constant(h)), 0));
            }
            if let Some(l) = iv.lo {
                system.push(LinAtom::new(LinExpr::constant(l).sub(&LinExpr::var(*v)), 0));
            }
        }
        match fourier_motzkin(system) {
            FmResult::Unsat => return Outcome::Unsat,
            FmResult::Overflow => return Outcome::Unknown("elimination budget exhausted".into()),
            FmResult::RationallySat => {}
        }
    }

    // Candidate model: fixed values, interval picks, zero elsewhere; then
    // refine greedily against the leftover multivariate atoms.
    let mut model = Model::default();
    for (v, val) in &fixed {
        model.values.insert(*v, *val);
    }
    for (v, iv) in &intervals {
        model.values.entry(*v).or_insert_with(|| iv.pick());
    }
    let mut all_vars: Vec<SymId> = Vec::new();
    for e in original {
        e.collect_vars(&mut all_vars);
    }
    for v in &all_vars {
        model.values.entry(*v).or_insert(0);
    }
    refine_against(&mut model, &pending, &intervals, &fixed);

    if verify(&model, original) {
        return Outcome::Sat(model);
    }
    if nonlinear || !pending.is_empty() {
        return Outcome::Unknown("no verified model for residual system".into());
    }
    // Pure univariate systems must verify; reaching here means the
    // candidate assignment logic missed, so stay conservative.
    Outcome::Unknown("candidate model rejected".into())
}

/// Greedy repair: for each multivariate atom violated under the current
/// assignment, move one variable just enough to satisfy it, preferring a
/// variable whose interval tolerates the move. Fixed variables never move.
fn refine_against(
    model: &mut Model,
    atoms: &[LinAtom],
    intervals: &BTreeMap<SymId, Interval>,
    fixed: &BTreeMap<SymId, i64>,
) {
    for _ in 0..atoms.len().saturating_mul(2) {
        let mut changed = false;
        for atom in atoms {
            let mut slack: i128 = atom.expr.k as i128;
            for (v, c) in &atom.expr.coeffs {
                slack += (*c as i128) * (model.values.get(v).copied().unwrap_or(0) as i128);
            }
            if slack <= 0 {
                continue;
            }
            let candidates = atom.expr.coeffs.iter().filter(|(v, _)| !fixed.contains_key(v));
            for (v, c) in candidates {
                let cur = model.values.get(v).copied().unwrap_or(0) as i128;
                let delta = (slack + (c.unsigned_abs() as i128) - 1) / (*c as i128).abs();
                let next = if *c > 0 { cur - delta } else { cur + delta };
                let Ok(next) = i64::try_from(next) else { continue };
                let in_range = intervals.get(v).map_or(true, |iv| iv.contains(next));
                if in_range {
                    model.values.insert(*v, next);
                    changed = true;
                    break;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

fn verify(model: &Model, original: &[Expr]) -> bool {
    let lookup = |id: SymId| model.get(id).or(Some(0));
    original.iter().all(|e| {
        match e.eval(&lookup) {
            Some(EvalValue::Bool(b)) => b,
            // Integer terms as conditions: nonzero is true.
            Some(EvalValue::Int(n)) => n != 0,
            None => false,
        }
    })
}

enum FmResult {
    RationallySat,
    Unsat,
    Overflow,
}

/// Fourier–Motzkin elimination over the rationals. A derived `0 < c ≤ 0`
/// contradiction refutes the integer system too.
fn fourier_motzkin(mut atoms: Vec<LinAtom>) -> FmResult {
    loop {
        let Some(var) = atoms
            .iter()
            .flat_map(|a| a.expr.coeffs.keys())
            .min()
            .copied()
        else {
            break;
        };

        let mut uppers: Vec<LinExpr> = Vec::new();
        let mut lowers: Vec<LinExpr> = Vec::new();
        let mut rest: Vec<LinAtom> = Vec::new();
        for atom in atoms {
            match atom.expr.coeffs.get(&var).copied() {
                Some(c) if c > 0 => uppers.push(atom.expr),
                Some(_) => lowers.push(atom.expr),
                None => rest.push(atom),
            }
        }

        const COEFF_CAP: i64 = 1 << 31;
        for u in &uppers {
            let cu = u.coeffs[&var];
            for l in &lowers {
                let cl = l.coeffs[&var];
                if cu.abs() > COEFF_CAP
                    || cl.abs() > COEFF_CAP
                    || u.coeffs.values().any(|c| c.abs() > COEFF_CAP)
                    || l.coeffs.values().any(|c| c.abs() > COEFF_CAP)
                {
                    return FmResult::Overflow;
                }
                // cu > 0, cl < 0: cu·l - cl·u eliminates `var`.
                let combined = l.scale(cu).add(&u.scale(-cl));
                debug_assert!(!combined.coeffs.contains_key(&var));
                if combined.is_constant() {
                    if combined.k > 0 {
                        return FmResult::Unsat;
                    }
                } else {
                    rest.push(LinAtom { expr: combined });
                }
                if rest.len() > FM_ATOM_CAP {
                    return FmResult::Overflow;
                }
            }
        }
        atoms = rest;
    }
    FmResult::RationallySat
}

/// The built-in [`ConstraintSolver`]: a scope stack over [`check`].
#[derive(Debug)]
pub struct LinearSolver {
    scopes: Vec<Vec<Expr>>,
}

impl Default for LinearSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver {
    pub fn new() -> Self {
        Self { scopes: vec![Vec::new()] }
    }

    fn all_asserted(&self) -> Vec<Expr> {
        self.scopes.iter().flatten().cloned().collect()
    }
}

impl ConstraintSolver for LinearSolver {
    fn assert(&mut self, term: &Expr) -> Result<(), SolverError> {
        self.scopes
            .last_mut()
            .ok_or_else(|| SolverError::Backend("no active scope".into()))?
            .push(term.clone());
        Ok(())
    }

    fn push(&mut self) -> Result<(), SolverError> {
        self.scopes.push(Vec::new());
        Ok(())
    }

    fn pop(&mut self) -> Result<(), SolverError> {
        if self.scopes.len() <= 1 {
            return Err(SolverError::Backend("pop without matching push".into()));
        }
        self.scopes.pop();
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, SolverError> {
        Ok(check(&self.all_asserted()))
    }

    fn check_sat_with_model(&mut self) -> Result<(SatResult, Option<Model>), SolverError> {
        Ok(check_with_model(&self.all_asserted()))
    }

    fn reset(&mut self) -> Result<(), SolverError> {
        self.scopes = vec![Vec::new()];
        Ok(())
    }
}
