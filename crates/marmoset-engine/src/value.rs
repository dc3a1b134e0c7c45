//! Runtime values of the symbolic store.

use marmoset_solver::Expr;

use crate::store::ObjId;

/// A value held in a register or memory cell: a concrete integer, a
/// symbolic integer term, or a pointer into the object table.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Int(i64),
    Sym(Expr),
    Ptr(Pointer),
}

/// A pointer is an object identity plus a cell offset; raw addresses never
/// exist in the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub obj: ObjId,
    pub offset: Offset,
}

/// A pointer offset, concrete or symbolic (in cells).
#[derive(Debug, Clone, PartialEq)]
pub enum Offset {
    Const(i64),
    Sym(Expr),
}

impl Offset {
    pub fn to_expr(&self) -> Expr {
        match self {
            Offset::Const(n) => Expr::int(*n),
            Offset::Sym(e) => e.clone(),
        }
    }

    /// Offset arithmetic: `self + index`. Stays concrete when both sides
    /// are concrete.
    pub fn add(&self, index: &Val) -> Option<Offset> {
        match (self, index) {
            (Offset::Const(a), Val::Int(b)) => Some(Offset::Const(a.wrapping_add(*b))),
            (_, Val::Ptr(_)) => None,
            (a, b) => {
                let b = b.to_expr()?;
                Some(Offset::Sym(a.to_expr().add(b)))
            }
        }
    }
}

/// Truth value of an integer used as a branch condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Truth {
    True,
    False,
    /// Data-dependent: a boolean constraint that may go either way.
    Symbolic(Expr),
}

impl Val {
    /// Integer view of this value as a constraint term. Pointers have no
    /// integer denotation.
    pub fn to_expr(&self) -> Option<Expr> {
        match self {
            Val::Int(n) => Some(Expr::int(*n)),
            Val::Sym(e) => Some(e.clone()),
            Val::Ptr(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Val::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret as a branch condition (zero = false). A pointer is
    /// non-null by construction and therefore true.
    pub fn truth(&self) -> Truth {
        match self {
            Val::Int(0) => Truth::False,
            Val::Int(_) => Truth::True,
            Val::Ptr(_) => Truth::True,
            Val::Sym(e) => {
                if e.is_boolean() {
                    Truth::Symbolic(e.clone())
                } else {
                    Truth::Symbolic(e.clone().ne(Expr::int(0)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marmoset_solver::SymId;

    #[test]
    fn concrete_truth() {
        assert_eq!(Val::Int(0).truth(), Truth::False);
        assert_eq!(Val::Int(-3).truth(), Truth::True);
        let p = Val::Ptr(Pointer { obj: ObjId(0), offset: Offset::Const(0) });
        assert_eq!(p.truth(), Truth::True);
    }

    #[test]
    fn symbolic_int_condition_becomes_nonzero_test() {
        let v = Val::Sym(Expr::var(SymId(0)));
        match v.truth() {
            Truth::Symbolic(e) => assert_eq!(e, Expr::var(SymId(0)).ne(Expr::int(0))),
            other => panic!("expected symbolic truth, got {other:?}"),
        }
    }

    #[test]
    fn boolean_condition_is_kept_as_is() {
        let c = Expr::var(SymId(0)).gt(Expr::int(5));
        match Val::Sym(c.clone()).truth() {
            Truth::Symbolic(e) => assert_eq!(e, c),
            other => panic!("expected symbolic truth, got {other:?}"),
        }
    }

    #[test]
    fn offset_addition() {
        let base = Offset::Const(2);
        assert_eq!(base.add(&Val::Int(3)), Some(Offset::Const(5)));
        match base.add(&Val::Sym(Expr::var(SymId(1)))) {
            Some(Offset::Sym(_)) => {}
            other => panic!("expected symbolic offset, got {other:?}"),
        }
        let p = Val::Ptr(Pointer { obj: ObjId(1), offset: Offset::Const(0) });
        assert_eq!(base.add(&p), None);
    }
}
