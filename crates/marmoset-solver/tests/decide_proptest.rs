//! Property tests pitting the decision procedure against brute force.
//!
//! For random small constraint systems over two variables, an exhaustive
//! search over a window of the integer grid gives ground truth:
//! `Unsat` must mean the window holds no solution, and a `Sat` model must
//! actually satisfy the constraints.

use proptest::prelude::*;

use marmoset_solver::terms::{Expr, EvalValue, SymId};
use marmoset_solver::{check_with_model, SatResult};

const WINDOW: i64 = 12;

#[derive(Debug, Clone)]
enum AtomShape {
    Cmp { pred: u8, var: u8, coeff: i64, konst: i64 },
    TwoVar { pred: u8, konst: i64 },
}

fn atom_strategy() -> impl Strategy<Value = AtomShape> {
    prop_oneof![
        (0u8..6, 0u8..2, 1i64..=3, -8i64..=8).prop_map(|(pred, var, coeff, konst)| {
            AtomShape::Cmp { pred, var, coeff, konst }
        }),
        (0u8..6, -8i64..=8).prop_map(|(pred, konst)| AtomShape::TwoVar { pred, konst }),
    ]
}

fn apply_pred(pred: u8, lhs: Expr, rhs: Expr) -> Expr {
    match pred {
        0 => lhs.eq(rhs),
        1 => lhs.ne(rhs),
        2 => lhs.lt(rhs),
        3 => lhs.le(rhs),
        4 => lhs.gt(rhs),
        _ => lhs.ge(rhs),
    }
}

fn build(shape: &AtomShape) -> Expr {
    match shape {
        AtomShape::Cmp { pred, var, coeff, konst } => {
            let lhs = Expr::int(*coeff).mul(Expr::var(SymId(*var as u32)));
            apply_pred(*pred, lhs, Expr::int(*konst))
        }
        AtomShape::TwoVar { pred, konst } => {
            let lhs = Expr::var(SymId(0)).add(Expr::var(SymId(1)));
            apply_pred(*pred, lhs, Expr::int(*konst))
        }
    }
}

fn holds(e: &Expr, x: i64, y: i64) -> bool {
    let lookup = move |id: SymId| match id.0 {
        0 => Some(x),
        1 => Some(y),
        _ => None,
    };
    matches!(e.eval(&lookup), Some(EvalValue::Bool(true)))
}

fn brute_force(exprs: &[Expr]) -> Option<(i64, i64)> {
    for x in -WINDOW..=WINDOW {
        for y in -WINDOW..=WINDOW {
            if exprs.iter().all(|e| holds(e, x, y)) {
                return Some((x, y));
            }
        }
    }
    None
}

proptest! {
    #[test]
    fn decide_agrees_with_brute_force(shapes in prop::collection::vec(atom_strategy(), 1..5)) {
        let exprs: Vec<Expr> = shapes.iter().map(build).collect();
        let witness = brute_force(&exprs);
        let (result, model) = check_with_model(&exprs);

        match result {
            SatResult::Unsat => {
                prop_assert!(
                    witness.is_none(),
                    "decide said Unsat but {witness:?} satisfies the system"
                );
            }
            SatResult::Sat => {
                let m = model.expect("Sat must carry a model");
                let x = m.get(SymId(0)).unwrap_or(0);
                let y = m.get(SymId(1)).unwrap_or(0);
                prop_assert!(
                    exprs.iter().all(|e| holds(e, x, y)),
                    "reported model ({x}, {y}) does not satisfy the system"
                );
            }
            SatResult::Unknown(_) => {
                // Inconclusive answers are allowed; soundness is what the
                // other arms pin down.
            }
        }
    }

    #[test]
    fn negation_flips_single_atoms(shape in atom_strategy()) {
        let e = build(&shape);
        let (pos, _) = check_with_model(std::slice::from_ref(&e));
        let (neg, _) = check_with_model(&[e.clone().not()]);
        // An atom and its negation can never both be Unsat.
        prop_assert!(
            !(pos == SatResult::Unsat && neg == SatResult::Unsat),
            "both {e} and its negation reported Unsat"
        );
    }
}
