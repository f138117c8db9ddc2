//! Z3-based constraint solver for symbolic formulas.
//!
//! This module provides [`Z3Solver`], which translates [`SymbolicExpr`] DAGs to Z3
//! bit-vectors and uses Z3's SMT solver to decide 1-bit constraints. Comparisons and other
//! 1-bit nodes are kept as 1-bit vectors on the Z3 side too; conversions to Z3 booleans only
//! happen at `ite` conditions and at the top-level assertion.

use std::{collections::BTreeMap, fmt};

use rustc_hash::FxHashMap;

use crate::engine::{
    expr::{ExprKind, SymbolicExpr},
    ops::SymbolicOp,
};

/// A satisfying assignment of symbolic variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: BTreeMap<usize, u64>,
}

impl Model {
    /// Creates a model from `variable id -> value` pairs.
    #[must_use]
    pub fn new(values: BTreeMap<usize, u64>) -> Self {
        Self { values }
    }

    /// Value assigned to variable `id`, if the constraint referenced it.
    #[must_use]
    pub fn get(&self, id: usize) -> Option<u64> {
        self.values.get(&id).copied()
    }

    /// All assignments, ordered by variable id.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<usize, u64> {
        &self.values
    }

    /// Returns `true` if the model assigns no variable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (id, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "SymVar_{id} = {value:#x}")?;
        }
        f.write_str("}")
    }
}

/// Result of a satisfiability query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverOutcome {
    /// The constraint is satisfiable; one model is attached.
    Sat(Model),
    /// The constraint has no solution.
    Unsat,
    /// The solver gave up.
    Unknown,
}

impl SolverOutcome {
    /// Returns the model of a satisfiable outcome.
    #[must_use]
    pub fn model(&self) -> Option<&Model> {
        match self {
            SolverOutcome::Sat(model) => Some(model),
            _ => None,
        }
    }

    /// Returns `true` for [`SolverOutcome::Sat`].
    #[must_use]
    pub fn is_sat(&self) -> bool {
        matches!(self, SolverOutcome::Sat(_))
    }
}

/// Z3-based constraint solver for symbolic formulas.
///
/// The solver is stateless; every query creates a fresh Z3 solver.
///
/// # Example
///
/// ```rust,no_run
/// use vmscope::engine::{SymbolicExpr, SymbolicOp, Z3Solver};
///
/// // Find x such that x + 5 == 10 (8-bit)
/// let x = SymbolicExpr::variable(0, 8);
/// let sum = SymbolicExpr::binary(SymbolicOp::Add, x, SymbolicExpr::constant(5, 8));
/// let constraint = SymbolicExpr::equal(sum, SymbolicExpr::constant(10, 8));
///
/// let outcome = Z3Solver::new().check(&constraint);
/// assert_eq!(outcome.model().and_then(|m| m.get(0)), Some(5));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Z3Solver;

impl Z3Solver {
    /// Creates a new Z3 solver instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decides whether a 1-bit constraint can be 1.
    ///
    /// # Arguments
    ///
    /// * `constraint` - A 1-bit formula.
    ///
    /// # Returns
    ///
    /// [`SolverOutcome::Sat`] with values for every variable referenced by `constraint`,
    /// [`SolverOutcome::Unsat`], or [`SolverOutcome::Unknown`].
    #[must_use]
    pub fn check(&self, constraint: &SymbolicExpr) -> SolverOutcome {
        debug_assert_eq!(constraint.bits(), 1);
        match constraint.as_constant() {
            Some(0) => return SolverOutcome::Unsat,
            Some(_) => return SolverOutcome::Sat(Model::default()),
            None => {}
        }

        let solver = z3::Solver::new();
        let z3_expr = self.translate_to_z3(constraint);
        solver.assert(z3_expr.eq(&z3::ast::BV::from_u64(1, 1)));

        match solver.check() {
            z3::SatResult::Sat => {
                let Some(model) = solver.get_model() else {
                    return SolverOutcome::Unknown;
                };
                let mut values = BTreeMap::new();
                for (id, bits) in constraint.variables() {
                    let var = z3::ast::BV::new_const(variable_name(id), bits);
                    let value = model
                        .eval(&var, true)
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    values.insert(id, value);
                }
                SolverOutcome::Sat(Model::new(values))
            }
            z3::SatResult::Unsat => SolverOutcome::Unsat,
            z3::SatResult::Unknown => SolverOutcome::Unknown,
        }
    }

    /// Proves that two formulas of equal width agree on every input.
    ///
    /// Returns `false` when the solver finds a counterexample or cannot decide.
    #[must_use]
    pub fn equivalent(&self, left: &SymbolicExpr, right: &SymbolicExpr) -> bool {
        if left.bits() != right.bits() {
            return false;
        }
        let differs = SymbolicExpr::not_equal(left.clone(), right.clone());
        matches!(self.check(&differs), SolverOutcome::Unsat)
    }

    /// Translates a formula to a Z3 bit-vector, visiting each shared node once.
    fn translate_to_z3(&self, expr: &SymbolicExpr) -> z3::ast::BV {
        let mut memo: FxHashMap<usize, z3::ast::BV> = FxHashMap::default();

        for node in expr.post_order() {
            let get = |e: &SymbolicExpr| -> z3::ast::BV {
                match memo.get(&e.node_id()) {
                    Some(bv) => bv.clone(),
                    None => z3::ast::BV::from_u64(0, e.bits()),
                }
            };
            let bits = node.bits();

            let translated = match node.kind() {
                ExprKind::Constant(value) => z3::ast::BV::from_u64(*value, bits),
                ExprKind::Variable(id) => z3::ast::BV::new_const(variable_name(*id), bits),
                ExprKind::Unary { op, operand } => {
                    let operand_z3 = get(operand);
                    match op {
                        SymbolicOp::Neg => operand_z3.bvneg(),
                        SymbolicOp::Not => operand_z3.bvnot(),
                        _ => operand_z3, // Shouldn't happen for valid unary ops
                    }
                }
                ExprKind::Binary { op, left, right } => {
                    let left_z3 = get(left);
                    let right_z3 = get(right);
                    let width = left.bits();
                    let one = || z3::ast::BV::from_u64(1, 1);
                    let zero = || z3::ast::BV::from_u64(0, 1);

                    match op {
                        SymbolicOp::Add => left_z3.bvadd(&right_z3),
                        SymbolicOp::Sub => left_z3.bvsub(&right_z3),
                        SymbolicOp::Mul => left_z3.bvmul(&right_z3),
                        SymbolicOp::And => left_z3.bvand(&right_z3),
                        SymbolicOp::Or => left_z3.bvor(&right_z3),
                        SymbolicOp::Xor => left_z3.bvxor(&right_z3),
                        SymbolicOp::Shl => left_z3.bvshl(&right_z3),
                        SymbolicOp::ShrS => left_z3.bvashr(&right_z3),
                        SymbolicOp::ShrU => left_z3.bvlshr(&right_z3),
                        SymbolicOp::Rotl | SymbolicOp::Rotr => {
                            let size = z3::ast::BV::from_u64(u64::from(width), width);
                            let amount = right_z3.bvurem(&size);
                            let back = size.bvsub(&amount);
                            if matches!(op, SymbolicOp::Rotl) {
                                left_z3.bvshl(&amount).bvor(&left_z3.bvlshr(&back))
                            } else {
                                left_z3.bvlshr(&amount).bvor(&left_z3.bvshl(&back))
                            }
                        }
                        // Comparisons return a 1-bit vector
                        SymbolicOp::Eq => left_z3.eq(&right_z3).ite(&one(), &zero()),
                        SymbolicOp::Ne => left_z3.eq(&right_z3).not().ite(&one(), &zero()),
                        SymbolicOp::LtU => left_z3.bvult(&right_z3).ite(&one(), &zero()),
                        SymbolicOp::LeU => left_z3.bvule(&right_z3).ite(&one(), &zero()),
                        SymbolicOp::LtS => left_z3.bvslt(&right_z3).ite(&one(), &zero()),
                        SymbolicOp::LeS => left_z3.bvsle(&right_z3).ite(&one(), &zero()),
                        // Unary ops shouldn't appear in binary context
                        SymbolicOp::Neg | SymbolicOp::Not => left_z3,
                    }
                }
                ExprKind::Extract { high, low, operand } => get(operand).extract(*high, *low),
                ExprKind::ZeroExtend(operand) => get(operand).zero_ext(bits - operand.bits()),
                ExprKind::SignExtend(operand) => get(operand).sign_ext(bits - operand.bits()),
                ExprKind::Concat { high, low } => get(high).concat(&get(low)),
                ExprKind::Ite {
                    cond,
                    then,
                    otherwise,
                } => get(cond)
                    .eq(&z3::ast::BV::from_u64(1, 1))
                    .ite(&get(then), &get(otherwise)),
            };
            memo.insert(node.node_id(), translated);
        }

        memo.remove(&expr.node_id())
            .unwrap_or_else(|| z3::ast::BV::from_u64(0, expr.bits()))
    }
}

/// Name of the Z3 constant standing for variable `id`.
fn variable_name(id: usize) -> String {
    format!("SymVar_{id}")
}
