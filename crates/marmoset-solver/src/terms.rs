//! Solver-agnostic constraint terms.

use std::fmt;

/// Identity of a symbolic variable. The engine mints these per explored
/// path; ids are only meaningful within one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymId(pub u32);

impl fmt::Display for SymId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Abstract constraint term over integers and booleans.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Symbolic integer variable.
    Var(SymId),
    /// Integer literal.
    IntLit(i64),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),

    // Comparison
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),

    // Boolean logic
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn var(id: SymId) -> Self {
        Expr::Var(id)
    }

    pub fn int(n: i64) -> Self {
        Expr::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        Expr::BoolLit(b)
    }

    pub fn add(self, other: Expr) -> Self {
        Expr::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: Expr) -> Self {
        Expr::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: Expr) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    pub fn neg(self) -> Self {
        Expr::Neg(Box::new(self))
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    pub fn ne(self, other: Expr) -> Self {
        Expr::Ne(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: Expr) -> Self {
        Expr::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: Expr) -> Self {
        Expr::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<Expr>) -> Self {
        Expr::And(terms)
    }

    pub fn or(terms: Vec<Expr>) -> Self {
        Expr::Or(terms)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// True for terms that denote a truth value rather than an integer.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Expr::BoolLit(_)
                | Expr::Eq(..)
                | Expr::Ne(..)
                | Expr::Lt(..)
                | Expr::Le(..)
                | Expr::Gt(..)
                | Expr::Ge(..)
                | Expr::And(_)
                | Expr::Or(_)
                | Expr::Not(_)
        )
    }

    /// Evaluate under a complete integer assignment. Returns `None` when a
    /// variable is missing from the assignment.
    pub fn eval(&self, lookup: &dyn Fn(SymId) -> Option<i64>) -> Option<EvalValue> {
        use EvalValue::*;
        let int = |e: &Expr| match e.eval(lookup)? {
            Int(n) => Some(n),
            Bool(_) => None,
        };
        let boolean = |e: &Expr| match e.eval(lookup)? {
            Bool(b) => Some(b),
            Int(_) => None,
        };
        Some(match self {
            Expr::Var(id) => Int(lookup(*id)?),
            Expr::IntLit(n) => Int(*n),
            Expr::BoolLit(b) => Bool(*b),
            Expr::Add(a, b) => Int(int(a)?.wrapping_add(int(b)?)),
            Expr::Sub(a, b) => Int(int(a)?.wrapping_sub(int(b)?)),
            Expr::Mul(a, b) => Int(int(a)?.wrapping_mul(int(b)?)),
            Expr::Neg(a) => Int(int(a)?.wrapping_neg()),
            Expr::Eq(a, b) => Bool(int(a)? == int(b)?),
            Expr::Ne(a, b) => Bool(int(a)? != int(b)?),
            Expr::Lt(a, b) => Bool(int(a)? < int(b)?),
            Expr::Le(a, b) => Bool(int(a)? <= int(b)?),
            Expr::Gt(a, b) => Bool(int(a)? > int(b)?),
            Expr::Ge(a, b) => Bool(int(a)? >= int(b)?),
            Expr::And(terms) => {
                let mut acc = true;
                for t in terms {
                    acc &= boolean(t)?;
                }
                Bool(acc)
            }
            Expr::Or(terms) => {
                let mut acc = false;
                for t in terms {
                    acc |= boolean(t)?;
                }
                Bool(acc)
            }
            Expr::Not(a) => Bool(!boolean(a)?),
        })
    }

    /// Collect every variable referenced by this term.
    pub fn collect_vars(&self, out: &mut Vec<SymId>) {
        match self {
            Expr::Var(id) => {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            Expr::IntLit(_) | Expr::BoolLit(_) => {}
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Eq(a, b)
            | Expr::Ne(a, b)
            | Expr::Lt(a, b)
            | Expr::Le(a, b)
            | Expr::Gt(a, b)
            | Expr::Ge(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Expr::Neg(a) | Expr::Not(a) => a.collect_vars(out),
            Expr::And(terms) | Expr::Or(terms) => {
                for t in terms {
                    t.collect_vars(out);
                }
            }
        }
    }
}

/// Result of evaluating a term under an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalValue {
    Int(i64),
    Bool(bool),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(id) => write!(f, "{id}"),
            Expr::IntLit(n) => write!(f, "{n}"),
            Expr::BoolLit(b) => write!(f, "{b}"),
            Expr::Add(a, b) => write!(f, "({a} + {b})"),
            Expr::Sub(a, b) => write!(f, "({a} - {b})"),
            Expr::Mul(a, b) => write!(f, "({a} * {b})"),
            Expr::Neg(a) => write!(f, "-{a}"),
            Expr::Eq(a, b) => write!(f, "({a} == {b})"),
            Expr::Ne(a, b) => write!(f, "({a} != {b})"),
            Expr::Lt(a, b) => write!(f, "({a} < {b})"),
            Expr::Le(a, b) => write!(f, "({a} <= {b})"),
            Expr::Gt(a, b) => write!(f, "({a} > {b})"),
            Expr::Ge(a, b) => write!(f, "({a} >= {b})"),
            Expr::And(terms) => {
                write!(f, "(")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Expr::Or(terms) => {
                write!(f, "(")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Expr::Not(a) => write!(f, "!{a}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::var(SymId(0))
    }

    #[test]
    fn builders_compose() {
        let e = x().add(Expr::int(1)).gt(Expr::int(5));
        assert_eq!(e.to_string(), "((s0 + 1) > 5)");
        assert!(e.is_boolean());
        assert!(!x().add(Expr::int(1)).is_boolean());
    }

    #[test]
    fn eval_under_assignment() {
        let e = x().add(Expr::int(1)).gt(Expr::int(5));
        let at = |v: i64| e.eval(&move |_| Some(v));
        assert_eq!(at(5), Some(EvalValue::Bool(true)));
        assert_eq!(at(4), Some(EvalValue::Bool(false)));
        assert_eq!(e.eval(&|_| None), None);
    }

    #[test]
    fn eval_wraps_on_overflow() {
        let e = Expr::int(i64::MAX).add(Expr::int(1));
        assert_eq!(e.eval(&|_| None), Some(EvalValue::Int(i64::MIN)));
    }

    #[test]
    fn collect_vars_deduplicates() {
        let e = x().add(x()).lt(Expr::var(SymId(3)));
        let mut vars = Vec::new();
        e.collect_vars(&mut vars);
        assert_eq!(vars, vec![SymId(0), SymId(3)]);
    }
}
