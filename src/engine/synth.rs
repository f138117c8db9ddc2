//! Oracle-guided formula synthesis.
//!
//! The synthesizer treats a formula as a black box over its (at most two) input variables:
//! it samples the formula on a fixed set of inputs, filters a catalogue of small candidate
//! formulas against those samples, and asks [`Z3Solver`] to prove the survivors equivalent.
//! When the formula as a whole has no small equivalent, every sub-formula is tried instead,
//! bottom-up, and proven replacements are substituted.
//!
//! Synthesis is best effort. [`Synthesizer::synthesize`] returns `None` when nothing
//! strictly smaller than the input was found.

use std::collections::BTreeMap;

use crate::engine::{
    expr::SymbolicExpr,
    ops::{mask, SymbolicOp},
    simplify,
    solver::Z3Solver,
};

/// Number of random input samples per candidate check, on top of the edge values.
const RANDOM_SAMPLES: usize = 24;

/// Sub-formulas larger than this are not sampled individually.
const MAX_SUBFORMULA_NODES: usize = 4096;

/// Binary operations tried between two inputs, or between one input and a learned constant.
const BINARY_TEMPLATES: [SymbolicOp; 6] = [
    SymbolicOp::Add,
    SymbolicOp::Sub,
    SymbolicOp::Xor,
    SymbolicOp::And,
    SymbolicOp::Or,
    SymbolicOp::Mul,
];

/// Template-based synthesizer for formulas over one or two variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synthesizer {
    solver: Z3Solver,
}

impl Synthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            solver: Z3Solver::new(),
        }
    }

    /// Searches for a smaller formula equivalent to `expr`.
    ///
    /// # Returns
    ///
    /// `Some` with a proven-equivalent formula that has fewer unique nodes than `expr`,
    /// or `None` when no such formula was found.
    #[must_use]
    pub fn synthesize(&self, expr: &SymbolicExpr) -> Option<SymbolicExpr> {
        if expr.is_constant() {
            return None;
        }
        let original_size = expr.node_count();

        if let Some(found) = self.synthesize_node(expr) {
            if found.node_count() < original_size {
                return Some(found);
            }
        }

        let rewritten = simplify::rewrite(expr, |node| {
            if node.is_constant() || node.node_count() > MAX_SUBFORMULA_NODES {
                return None;
            }
            self.synthesize_node(node)
                .filter(|found| found.node_count() < node.node_count())
        });

        (rewritten.node_count() < original_size).then_some(rewritten)
    }

    /// Tries every template against a single formula.
    fn synthesize_node(&self, expr: &SymbolicExpr) -> Option<SymbolicExpr> {
        let variables: Vec<(usize, u32)> = expr.variables().into_iter().collect();
        if variables.is_empty() || variables.len() > 2 {
            return None;
        }

        let samples = sample_inputs(&variables);
        let expected: Vec<u64> = samples
            .iter()
            .map(|sample| expr.evaluate(sample))
            .collect::<crate::Result<_>>()
            .ok()?;

        let matches = |candidate: &SymbolicExpr| {
            samples
                .iter()
                .zip(&expected)
                .all(|(sample, want)| candidate.evaluate(sample).ok() == Some(*want))
        };

        let mut candidates = candidates(expr, &variables, &samples);
        candidates.sort_by_key(SymbolicExpr::node_count);

        candidates
            .into_iter()
            .filter(|candidate| candidate.node_count() < expr.node_count())
            .filter(|candidate| matches(candidate))
            .find(|candidate| self.solver.equivalent(expr, candidate))
    }
}

/// Builds the candidate catalogue for `expr`.
fn candidates(
    expr: &SymbolicExpr,
    variables: &[(usize, u32)],
    samples: &[BTreeMap<usize, u64>],
) -> Vec<SymbolicExpr> {
    let bits = expr.bits();
    let mut out = Vec::new();

    // A formula that does not depend on its inputs is a constant.
    if let Some(first) = samples.first().and_then(|s| expr.evaluate(s).ok()) {
        out.push(SymbolicExpr::constant(first, bits));
    }

    let leaves: Vec<Vec<SymbolicExpr>> = variables
        .iter()
        .map(|(id, var_bits)| casts(SymbolicExpr::variable(*id, *var_bits), bits))
        .collect();

    for leaf in leaves.iter().flatten() {
        out.push(leaf.clone());
        out.push(SymbolicExpr::unary(SymbolicOp::Not, leaf.clone()));
        out.push(SymbolicExpr::unary(SymbolicOp::Neg, leaf.clone()));
        out.extend(constant_templates(expr, leaf, variables));
    }

    if let [first, second] = leaves.as_slice() {
        for a in first {
            for b in second {
                for op in BINARY_TEMPLATES {
                    out.push(SymbolicExpr::binary(op, a.clone(), b.clone()));
                }
                out.push(SymbolicExpr::binary(SymbolicOp::Sub, b.clone(), a.clone()));
            }
        }
    }

    out
}

/// `leaf op c` templates whose constant is learned by probing `expr`.
///
/// With the variable behind `leaf` set to a neutral input (other variables at 0), the
/// formula's output is the constant each template would need.
fn constant_templates(
    expr: &SymbolicExpr,
    leaf: &SymbolicExpr,
    variables: &[(usize, u32)],
) -> Vec<SymbolicExpr> {
    let bits = expr.bits();
    let Some((&id, _)) = leaf.variables().iter().next() else {
        return Vec::new();
    };
    let try_constant = |value: u64| {
        let assignment: BTreeMap<usize, u64> = variables
            .iter()
            .map(|(var, var_bits)| (*var, if *var == id { value & mask(*var_bits) } else { 0 }))
            .collect();
        expr.evaluate(&assignment).ok()
    };

    let mut out = Vec::new();
    for op in BINARY_TEMPLATES {
        let neutral = match op {
            SymbolicOp::And => u64::MAX,
            SymbolicOp::Mul => 1,
            _ => 0,
        };
        if let Some(c) = try_constant(neutral) {
            let constant = SymbolicExpr::constant(c, bits);
            out.push(SymbolicExpr::binary(op, leaf.clone(), constant));
        }
    }
    if let Some(c) = try_constant(0) {
        // c - leaf
        out.push(SymbolicExpr::binary(
            SymbolicOp::Sub,
            SymbolicExpr::constant(c, bits),
            leaf.clone(),
        ));
    }
    out
}

/// Ways of bringing `var` to `bits` bits.
fn casts(var: SymbolicExpr, bits: u32) -> Vec<SymbolicExpr> {
    let var_bits = var.bits();
    if var_bits == bits {
        vec![var]
    } else if var_bits < bits {
        vec![
            SymbolicExpr::zero_extend(var.clone(), bits),
            SymbolicExpr::sign_extend(var, bits),
        ]
    } else {
        vec![SymbolicExpr::extract(bits - 1, 0, var)]
    }
}

/// Deterministic input samples: edge values first, then a xorshift sequence.
fn sample_inputs(variables: &[(usize, u32)]) -> Vec<BTreeMap<usize, u64>> {
    const EDGES: [u64; 6] = [0, 1, 2, u64::MAX, 0x8000_0000_0000_0000, 0x7f];

    let mut samples = Vec::new();
    for (i, a) in EDGES.iter().enumerate() {
        let b = EDGES[(i + 3) % EDGES.len()];
        samples.push(assign(variables, [*a, b]));
        samples.push(assign(variables, [b, *a]));
    }

    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    for _ in 0..RANDOM_SAMPLES {
        let values = [next(), next()];
        samples.push(assign(variables, values));
    }
    samples
}

fn assign(variables: &[(usize, u32)], values: [u64; 2]) -> BTreeMap<usize, u64> {
    variables
        .iter()
        .zip(values)
        .map(|((id, bits), value)| (*id, value & mask(*bits)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> SymbolicExpr {
        SymbolicExpr::variable(0, 32)
    }

    fn y() -> SymbolicExpr {
        SymbolicExpr::variable(1, 32)
    }

    #[test]
    fn mixed_boolean_arithmetic_to_add() {
        // (x ^ y) + 2 * (x & y) == x + y
        let xor = SymbolicExpr::binary(SymbolicOp::Xor, x(), y());
        let and = SymbolicExpr::binary(SymbolicOp::And, x(), y());
        let twice = SymbolicExpr::binary(SymbolicOp::Mul, and, SymbolicExpr::constant(2, 32));
        let expr = SymbolicExpr::binary(SymbolicOp::Add, xor, twice);

        let synthesized = Synthesizer::new().synthesize(&expr).expect("synthesizable");
        assert_eq!(synthesized, SymbolicExpr::binary(SymbolicOp::Add, x(), y()));
    }

    #[test]
    fn hidden_constant() {
        // (x ^ 0x1234) ^ x is not cancelled by the constructors
        let inner = SymbolicExpr::binary(SymbolicOp::Xor, x(), SymbolicExpr::constant(0x1234, 32));
        let expr = SymbolicExpr::binary(SymbolicOp::Xor, inner, x());

        let synthesized = Synthesizer::new().synthesize(&expr).expect("constant");
        assert_eq!(synthesized.as_constant(), Some(0x1234));
    }

    #[test]
    fn learned_constant_template() {
        // ~(~x + 0x10) == x - 0x10
        let not_x = SymbolicExpr::unary(SymbolicOp::Not, x());
        let sum = SymbolicExpr::binary(SymbolicOp::Add, not_x, SymbolicExpr::constant(0x10, 32));
        let expr = SymbolicExpr::unary(SymbolicOp::Not, sum);

        let synthesized = Synthesizer::new().synthesize(&expr).expect("synthesizable");
        assert_eq!(synthesized.node_count(), 3);
        assert!(Z3Solver::new().equivalent(&synthesized, &expr));
    }

    #[test]
    fn nothing_smaller_returns_none() {
        let expr = SymbolicExpr::binary(SymbolicOp::Add, x(), y());
        assert!(Synthesizer::new().synthesize(&expr).is_none());
        assert!(Synthesizer::new()
            .synthesize(&SymbolicExpr::constant(3, 32))
            .is_none());
    }

    #[test]
    fn narrow_inputs_are_extended() {
        // zx(a) + zx(b) computed through a detour
        let a = SymbolicExpr::zero_extend(SymbolicExpr::variable(0, 8), 32);
        let b = SymbolicExpr::zero_extend(SymbolicExpr::variable(1, 8), 32);
        let neg_b = SymbolicExpr::unary(SymbolicOp::Neg, b.clone());
        let expr = SymbolicExpr::binary(SymbolicOp::Sub, a.clone(), neg_b);

        let synthesized = Synthesizer::new().synthesize(&expr).expect("synthesizable");
        assert!(Z3Solver::new().equivalent(&synthesized, &expr));
        assert!(synthesized.node_count() < expr.node_count());
    }
}
