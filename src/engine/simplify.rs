//! Bottom-up formula rewriting.
//!
//! [`unroll`] rebuilds a formula through the folding constructors of [`SymbolicExpr`], so
//! identities that only became visible after later instructions (for instance a byte-wise
//! store followed by a wide reload) are applied across the whole DAG. [`rewrite`] is the
//! general form used by the synthesizer to substitute sub-formulas.

use rustc_hash::FxHashMap;

use crate::engine::{
    expr::{ExprKind, SymbolicExpr},
    ops::SymbolicOp,
};

/// Rebuilds `expr` bottom-up, giving `replace` the chance to substitute every rebuilt node.
///
/// Each unique node is rebuilt once; sharing in the input is preserved in the output.
pub fn rewrite<F>(expr: &SymbolicExpr, mut replace: F) -> SymbolicExpr
where
    F: FnMut(&SymbolicExpr) -> Option<SymbolicExpr>,
{
    let mut rebuilt: FxHashMap<usize, SymbolicExpr> = FxHashMap::default();

    for node in expr.post_order() {
        let get = |e: &SymbolicExpr| rebuilt.get(&e.node_id()).cloned().unwrap_or_else(|| e.clone());
        let fresh = match node.kind() {
            ExprKind::Constant(_) | ExprKind::Variable(_) => node.clone(),
            ExprKind::Unary { op, operand } => SymbolicExpr::unary(*op, get(operand)),
            ExprKind::Binary { op, left, right } => simplify_binary(*op, get(left), get(right)),
            ExprKind::Extract { high, low, operand } => {
                SymbolicExpr::extract(*high, *low, get(operand))
            }
            ExprKind::ZeroExtend(operand) => SymbolicExpr::zero_extend(get(operand), node.bits()),
            ExprKind::SignExtend(operand) => SymbolicExpr::sign_extend(get(operand), node.bits()),
            ExprKind::Concat { high, low } => SymbolicExpr::concat(get(high), get(low)),
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => simplify_ite(get(cond), get(then), get(otherwise)),
        };
        let fresh = replace(&fresh).unwrap_or(fresh);
        rebuilt.insert(node.node_id(), fresh);
    }

    rebuilt
        .remove(&expr.node_id())
        .unwrap_or_else(|| expr.clone())
}

/// Flattens and re-folds a formula.
#[must_use]
pub fn unroll(expr: &SymbolicExpr) -> SymbolicExpr {
    rewrite(expr, |_| None)
}

/// Binary rebuild with a few rewrites that are too costly to check on every construction.
fn simplify_binary(op: SymbolicOp, left: SymbolicExpr, right: SymbolicExpr) -> SymbolicExpr {
    // (x op c1) op c2 => x op (c1 op c2) for associative operations
    if matches!(
        op,
        SymbolicOp::Add | SymbolicOp::Xor | SymbolicOp::And | SymbolicOp::Or | SymbolicOp::Mul
    ) {
        if let (
            ExprKind::Binary {
                op: inner,
                left: x,
                right: c1,
            },
            Some(c2),
        ) = (left.kind(), right.as_constant())
        {
            if *inner == op {
                if let Some(c1) = c1.as_constant() {
                    let folded = SymbolicExpr::constant(op.apply(c1, c2, left.bits()), left.bits());
                    return SymbolicExpr::binary(op, x.clone(), folded);
                }
            }
        }
    }

    // x - c => x + (-c)
    if op == SymbolicOp::Sub {
        if let Some(c) = right.as_constant() {
            let negated = SymbolicOp::Neg.apply_unary(c, right.bits());
            return simplify_binary(
                SymbolicOp::Add,
                left,
                SymbolicExpr::constant(negated, right.bits()),
            );
        }
    }

    SymbolicExpr::binary(op, left, right)
}

/// `ite(c, 1, 0)` over a 1-bit result is `c` itself.
fn simplify_ite(cond: SymbolicExpr, then: SymbolicExpr, otherwise: SymbolicExpr) -> SymbolicExpr {
    if then.bits() == 1 {
        match (then.as_constant(), otherwise.as_constant()) {
            (Some(1), Some(0)) => return cond,
            (Some(0), Some(1)) => return SymbolicExpr::unary(SymbolicOp::Not, cond),
            _ => {}
        }
    }
    SymbolicExpr::ite(cond, then, otherwise)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_constant_chains() {
        let x = SymbolicExpr::variable(0, 32);
        let expr = SymbolicExpr::binary(
            SymbolicOp::Sub,
            SymbolicExpr::binary(SymbolicOp::Add, x.clone(), SymbolicExpr::constant(10, 32)),
            SymbolicExpr::constant(3, 32),
        );
        let expected = SymbolicExpr::binary(SymbolicOp::Add, x, SymbolicExpr::constant(7, 32));
        assert_eq!(unroll(&expr), expected);
    }

    #[test]
    fn cancels_to_identity() {
        let x = SymbolicExpr::variable(0, 8);
        let expr = SymbolicExpr::binary(
            SymbolicOp::Xor,
            SymbolicExpr::binary(SymbolicOp::Xor, x.clone(), SymbolicExpr::constant(0x5a, 8)),
            SymbolicExpr::constant(0x5a, 8),
        );
        assert_eq!(unroll(&expr), x);
    }

    #[test]
    fn ite_of_booleans_collapses() {
        let x = SymbolicExpr::variable(0, 8);
        let cond = SymbolicExpr::equal(x, SymbolicExpr::constant(1, 8));
        let expr = SymbolicExpr::ite(cond.clone(), SymbolicExpr::bool(true), SymbolicExpr::bool(false));
        assert_eq!(unroll(&expr), cond);
    }

    #[test]
    fn rewrite_substitutes_nodes() {
        let x = SymbolicExpr::variable(0, 8);
        let y = SymbolicExpr::variable(1, 8);
        let expr = SymbolicExpr::binary(SymbolicOp::Add, x.clone(), y.clone());
        let swapped = rewrite(&expr, |node| (node == &x).then(|| y.clone()));
        assert_eq!(swapped, SymbolicExpr::binary(SymbolicOp::Add, y.clone(), y));
    }
}
