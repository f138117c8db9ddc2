//! Symbolic formula representation.
//!
//! This module defines [`SymbolicExpr`], a shared, immutable DAG of fixed-width bit-vector
//! operations. Formulas are produced by the x86 engine while it replays instructions and are
//! consumed by the branch detector, the solver, the synthesizer, and the LLVM-IR lifter.
//!
//! # Widths
//!
//! Every node carries a width between 1 and 64 bits. Comparisons produce 1-bit vectors, which
//! double as booleans: `ite` conditions and branch predicates are 1-bit formulas.
//!
//! # Folding
//!
//! All constructors fold constant operands and apply a small set of local identities
//! (`x + 0`, `x ^ x`, extract of concat, concat of adjacent extracts, ...). A formula whose
//! inputs are all concrete therefore collapses to a single [`ExprKind::Constant`] node, which
//! is how the engine tells concrete data apart from symbolic data.
//!
//! # Traversal
//!
//! Formulas built from long traces share sub-trees heavily. Whole-formula traversals
//! ([`SymbolicExpr::post_order`] and everything built on it) visit each unique node once and
//! use an explicit stack.

use std::{
    collections::BTreeMap,
    fmt::{self, Write},
    sync::Arc,
};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    engine::ops::{mask, sign_extend, SymbolicOp},
    Error, Result,
};

/// The operation stored in a formula node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// A concrete value, already masked to the node width.
    Constant(u64),
    /// Reference to symbolic variable `SymVar_<id>`.
    Variable(usize),
    /// A unary operation (`Not`, `Neg`).
    Unary {
        /// The operation to perform.
        op: SymbolicOp,
        /// The operand.
        operand: SymbolicExpr,
    },
    /// A binary operation. Comparisons yield a 1-bit node.
    Binary {
        /// The operation to perform.
        op: SymbolicOp,
        /// The left operand.
        left: SymbolicExpr,
        /// The right operand.
        right: SymbolicExpr,
    },
    /// Bits `high..=low` of the operand.
    Extract {
        /// Highest extracted bit (inclusive).
        high: u32,
        /// Lowest extracted bit.
        low: u32,
        /// The operand.
        operand: SymbolicExpr,
    },
    /// Zero-extension of the operand to the node width.
    ZeroExtend(SymbolicExpr),
    /// Sign-extension of the operand to the node width.
    SignExtend(SymbolicExpr),
    /// Concatenation, `high` occupying the upper bits.
    Concat {
        /// Upper part.
        high: SymbolicExpr,
        /// Lower part.
        low: SymbolicExpr,
    },
    /// `cond ? then : otherwise` with a 1-bit condition.
    Ite {
        /// 1-bit condition.
        cond: SymbolicExpr,
        /// Value when the condition is 1.
        then: SymbolicExpr,
        /// Value when the condition is 0.
        otherwise: SymbolicExpr,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct ExprNode {
    bits: u32,
    kind: ExprKind,
}

/// A fixed-width symbolic bit-vector formula.
///
/// Cloning is cheap (reference counted); equality is structural.
#[derive(Clone, PartialEq, Eq)]
pub struct SymbolicExpr(Arc<ExprNode>);

impl SymbolicExpr {
    fn make(bits: u32, kind: ExprKind) -> Self {
        debug_assert!((1..=64).contains(&bits), "invalid formula width {bits}");
        Self(Arc::new(ExprNode { bits, kind }))
    }

    /// Creates a constant of the given width. The value is masked to `bits`.
    #[must_use]
    pub fn constant(value: u64, bits: u32) -> Self {
        Self::make(bits, ExprKind::Constant(value & mask(bits)))
    }

    /// Creates a 1-bit constant from a boolean.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::constant(u64::from(value), 1)
    }

    /// Creates a reference to symbolic variable `id`.
    #[must_use]
    pub fn variable(id: usize, bits: u32) -> Self {
        Self::make(bits, ExprKind::Variable(id))
    }

    /// Width of the formula in bits.
    #[inline]
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.0.bits
    }

    /// The node's operation.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Returns the value if this formula is a constant.
    #[inline]
    #[must_use]
    pub fn as_constant(&self) -> Option<u64> {
        match self.kind() {
            ExprKind::Constant(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns `true` if this formula is a constant.
    #[inline]
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    /// Returns `true` if this formula references at least one symbolic variable.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        !self.is_constant()
    }

    /// Identity of the underlying node, used to memoize DAG traversals.
    #[inline]
    pub(crate) fn node_id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Builds a unary operation.
    #[must_use]
    pub fn unary(op: SymbolicOp, operand: SymbolicExpr) -> Self {
        debug_assert!(op.is_unary());
        let bits = operand.bits();
        if let Some(value) = operand.as_constant() {
            return Self::constant(op.apply_unary(value, bits), bits);
        }
        if let ExprKind::Unary { op: inner, operand: x } = operand.kind() {
            if *inner == op {
                return x.clone();
            }
        }
        Self::make(bits, ExprKind::Unary { op, operand })
    }

    /// Builds a binary operation. Both operands must have the same width.
    ///
    /// Comparison operations produce a 1-bit formula; all others keep the operand width.
    #[must_use]
    pub fn binary(op: SymbolicOp, left: SymbolicExpr, right: SymbolicExpr) -> Self {
        debug_assert!(!op.is_unary());
        debug_assert_eq!(left.bits(), right.bits(), "width mismatch in {op:?}");
        let bits = left.bits();
        let out_bits = if op.is_comparison() { 1 } else { bits };

        match (left.as_constant(), right.as_constant()) {
            (Some(l), Some(r)) => return Self::constant(op.apply(l, r, bits), out_bits),
            (Some(_), None) if op.is_commutative() => {
                return Self::binary_simplified(op, right, left, bits, out_bits)
            }
            _ => {}
        }
        Self::binary_simplified(op, left, right, bits, out_bits)
    }

    fn binary_simplified(
        op: SymbolicOp,
        left: SymbolicExpr,
        right: SymbolicExpr,
        bits: u32,
        out_bits: u32,
    ) -> Self {
        let all_ones = mask(bits);
        let same = left == right;
        match (op, right.as_constant()) {
            (
                SymbolicOp::Add
                | SymbolicOp::Sub
                | SymbolicOp::Or
                | SymbolicOp::Xor
                | SymbolicOp::Shl
                | SymbolicOp::ShrU
                | SymbolicOp::ShrS
                | SymbolicOp::Rotl
                | SymbolicOp::Rotr,
                Some(0),
            ) => return left,
            (SymbolicOp::And | SymbolicOp::Mul, Some(0)) => return Self::constant(0, bits),
            (SymbolicOp::Mul, Some(1)) => return left,
            (SymbolicOp::And, Some(c)) if c == all_ones => return left,
            (SymbolicOp::Or, Some(c)) if c == all_ones => return Self::constant(all_ones, bits),
            _ => {}
        }
        if same {
            match op {
                SymbolicOp::Sub | SymbolicOp::Xor => return Self::constant(0, bits),
                SymbolicOp::And | SymbolicOp::Or => return left,
                SymbolicOp::Eq | SymbolicOp::LeU | SymbolicOp::LeS => return Self::bool(true),
                SymbolicOp::Ne | SymbolicOp::LtU | SymbolicOp::LtS => return Self::bool(false),
                _ => {}
            }
        }
        Self::make(out_bits, ExprKind::Binary { op, left, right })
    }

    /// `left == right` as a 1-bit formula.
    #[must_use]
    pub fn equal(left: SymbolicExpr, right: SymbolicExpr) -> Self {
        Self::binary(SymbolicOp::Eq, left, right)
    }

    /// `left != right` as a 1-bit formula.
    #[must_use]
    pub fn not_equal(left: SymbolicExpr, right: SymbolicExpr) -> Self {
        Self::binary(SymbolicOp::Ne, left, right)
    }

    /// Extracts bits `high..=low`.
    #[must_use]
    pub fn extract(high: u32, low: u32, operand: SymbolicExpr) -> Self {
        debug_assert!(low <= high && high < operand.bits());
        let width = high - low + 1;
        if low == 0 && width == operand.bits() {
            return operand;
        }
        if let Some(value) = operand.as_constant() {
            return Self::constant(value >> low, width);
        }
        match operand.kind() {
            ExprKind::Extract {
                low: inner_low,
                operand: inner,
                ..
            } => return Self::extract(high + inner_low, low + inner_low, inner.clone()),
            ExprKind::ZeroExtend(inner) => {
                let inner_bits = inner.bits();
                if high < inner_bits {
                    return Self::extract(high, low, inner.clone());
                }
                if low >= inner_bits {
                    return Self::constant(0, width);
                }
            }
            ExprKind::SignExtend(inner) if high < inner.bits() => {
                return Self::extract(high, low, inner.clone());
            }
            ExprKind::Concat { high: hi, low: lo } => {
                let split = lo.bits();
                if high < split {
                    return Self::extract(high, low, lo.clone());
                }
                if low >= split {
                    return Self::extract(high - split, low - split, hi.clone());
                }
            }
            _ => {}
        }
        Self::make(
            width,
            ExprKind::Extract {
                high,
                low,
                operand,
            },
        )
    }

    /// Zero-extends the operand to `bits` bits.
    #[must_use]
    pub fn zero_extend(operand: SymbolicExpr, bits: u32) -> Self {
        debug_assert!(bits >= operand.bits());
        if bits == operand.bits() {
            return operand;
        }
        if let Some(value) = operand.as_constant() {
            return Self::constant(value, bits);
        }
        if let ExprKind::ZeroExtend(inner) = operand.kind() {
            return Self::zero_extend(inner.clone(), bits);
        }
        Self::make(bits, ExprKind::ZeroExtend(operand))
    }

    /// Sign-extends the operand to `bits` bits.
    #[must_use]
    pub fn sign_extend(operand: SymbolicExpr, bits: u32) -> Self {
        debug_assert!(bits >= operand.bits());
        if bits == operand.bits() {
            return operand;
        }
        if let Some(value) = operand.as_constant() {
            return Self::constant(sign_extend(value, operand.bits()).cast_unsigned(), bits);
        }
        Self::make(bits, ExprKind::SignExtend(operand))
    }

    /// Concatenates `high` above `low`. The combined width must not exceed 64 bits.
    #[must_use]
    pub fn concat(high: SymbolicExpr, low: SymbolicExpr) -> Self {
        let bits = high.bits() + low.bits();
        debug_assert!(bits <= 64);
        if let (Some(h), Some(l)) = (high.as_constant(), low.as_constant()) {
            return Self::constant((h << low.bits()) | l, bits);
        }
        if high.as_constant() == Some(0) {
            return Self::zero_extend(low, bits);
        }
        if let (
            ExprKind::Extract {
                high: h_high,
                low: h_low,
                operand: h_operand,
            },
            ExprKind::Extract {
                high: l_high,
                low: l_low,
                operand: l_operand,
            },
        ) = (high.kind(), low.kind())
        {
            if *h_low == l_high + 1 && h_operand == l_operand {
                return Self::extract(*h_high, *l_low, h_operand.clone());
            }
        }
        Self::make(bits, ExprKind::Concat { high, low })
    }

    /// `cond ? then : otherwise`. `cond` must be 1 bit wide and both branches equally wide.
    #[must_use]
    pub fn ite(cond: SymbolicExpr, then: SymbolicExpr, otherwise: SymbolicExpr) -> Self {
        debug_assert_eq!(cond.bits(), 1);
        debug_assert_eq!(then.bits(), otherwise.bits());
        match cond.as_constant() {
            Some(0) => return otherwise,
            Some(_) => return then,
            None => {}
        }
        if then == otherwise {
            return then;
        }
        let bits = then.bits();
        Self::make(
            bits,
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            },
        )
    }

    /// Direct children of this node, left to right.
    pub fn children(&self) -> impl Iterator<Item = &SymbolicExpr> {
        let slots: [Option<&SymbolicExpr>; 3] = match self.kind() {
            ExprKind::Constant(_) | ExprKind::Variable(_) => [None, None, None],
            ExprKind::Unary { operand, .. }
            | ExprKind::Extract { operand, .. }
            | ExprKind::ZeroExtend(operand)
            | ExprKind::SignExtend(operand) => [Some(operand), None, None],
            ExprKind::Binary { left, right, .. } => [Some(left), Some(right), None],
            ExprKind::Concat { high, low } => [Some(high), Some(low), None],
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => [Some(cond), Some(then), Some(otherwise)],
        };
        slots.into_iter().flatten()
    }

    /// Unique nodes of the DAG, every node listed after all of its children.
    #[must_use]
    pub fn post_order(&self) -> Vec<&SymbolicExpr> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack: Vec<(&SymbolicExpr, bool)> = vec![(self, false)];

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if !seen.insert(node.node_id()) {
                continue;
            }
            stack.push((node, true));
            for child in node.children() {
                if !seen.contains(&child.node_id()) {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    /// Number of unique nodes in the DAG.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.post_order().len()
    }

    /// Distinct symbolic variables referenced by the formula, as `id -> width`.
    #[must_use]
    pub fn variables(&self) -> BTreeMap<usize, u32> {
        self.post_order()
            .into_iter()
            .filter_map(|node| match node.kind() {
                ExprKind::Variable(id) => Some((*id, node.bits())),
                _ => None,
            })
            .collect()
    }

    /// Evaluates the formula, resolving variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnboundVariable`] if `lookup` has no value for a referenced variable.
    pub fn evaluate_with<F>(&self, lookup: F) -> Result<u64>
    where
        F: Fn(usize) -> Option<u64>,
    {
        if let Some(value) = self.as_constant() {
            return Ok(value);
        }

        let mut values: FxHashMap<usize, u64> = FxHashMap::default();
        for node in self.post_order() {
            let get = |expr: &SymbolicExpr| values.get(&expr.node_id()).copied().unwrap_or(0);
            let value = match node.kind() {
                ExprKind::Constant(value) => *value,
                ExprKind::Variable(id) => {
                    lookup(*id).ok_or(Error::UnboundVariable(*id))? & mask(node.bits())
                }
                ExprKind::Unary { op, operand } => op.apply_unary(get(operand), node.bits()),
                ExprKind::Binary { op, left, right } => op.apply(get(left), get(right), left.bits()),
                ExprKind::Extract { high, low, operand } => {
                    (get(operand) >> low) & mask(high - low + 1)
                }
                ExprKind::ZeroExtend(operand) => get(operand),
                ExprKind::SignExtend(operand) => {
                    sign_extend(get(operand), operand.bits()).cast_unsigned() & mask(node.bits())
                }
                ExprKind::Concat { high, low } => (get(high) << low.bits()) | get(low),
                ExprKind::Ite {
                    cond,
                    then,
                    otherwise,
                } => {
                    if get(cond) != 0 {
                        get(then)
                    } else {
                        get(otherwise)
                    }
                }
            };
            values.insert(node.node_id(), value);
        }

        values
            .get(&self.node_id())
            .copied()
            .ok_or_else(|| Error::Engine("formula evaluation lost its root".to_string()))
    }

    /// Evaluates the formula with fixed variable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnboundVariable`] if a referenced variable is missing from `values`.
    pub fn evaluate(&self, values: &BTreeMap<usize, u64>) -> Result<u64> {
        self.evaluate_with(|id| values.get(&id).copied())
    }

    /// Renders at most roughly `limit` characters of the formula.
    ///
    /// Returns the text and whether it was cut short. Rendering stops as soon as the limit is
    /// passed, so previews of very large formulas stay cheap.
    #[must_use]
    pub fn render(&self, limit: usize) -> (String, bool) {
        let mut out = String::new();
        let complete = self.render_into(&mut out, limit);
        (out, !complete)
    }

    /// Preview used in reports: the full text when shorter than `limit` characters,
    /// otherwise `In: <first limit characters> ...`.
    #[must_use]
    pub fn preview(&self, limit: usize) -> String {
        let (text, truncated) = self.render(limit);
        if !truncated && text.chars().count() < limit {
            text
        } else {
            let head: String = text.chars().take(limit).collect();
            format!("In: {head} ...")
        }
    }

    fn render_into(&self, out: &mut String, limit: usize) -> bool {
        if out.len() > limit {
            return false;
        }
        // Writing to a String cannot fail.
        match self.kind() {
            ExprKind::Constant(value) => {
                let _ = write!(out, "(_ bv{value} {})", self.bits());
                true
            }
            ExprKind::Variable(id) => {
                let _ = write!(out, "SymVar_{id}");
                true
            }
            ExprKind::Unary { op, operand } => {
                let _ = write!(out, "({} ", op.smt_name());
                operand.render_into(out, limit) && close(out)
            }
            ExprKind::Binary { op, left, right } => {
                let _ = write!(out, "({} ", op.smt_name());
                left.render_into(out, limit)
                    && space(out)
                    && right.render_into(out, limit)
                    && close(out)
            }
            ExprKind::Extract { high, low, operand } => {
                let _ = write!(out, "((_ extract {high} {low}) ");
                operand.render_into(out, limit) && close(out)
            }
            ExprKind::ZeroExtend(operand) => {
                let _ = write!(out, "((_ zero_extend {}) ", self.bits() - operand.bits());
                operand.render_into(out, limit) && close(out)
            }
            ExprKind::SignExtend(operand) => {
                let _ = write!(out, "((_ sign_extend {}) ", self.bits() - operand.bits());
                operand.render_into(out, limit) && close(out)
            }
            ExprKind::Concat { high, low } => {
                out.push_str("(concat ");
                high.render_into(out, limit)
                    && space(out)
                    && low.render_into(out, limit)
                    && close(out)
            }
            ExprKind::Ite {
                cond,
                then,
                otherwise,
            } => {
                out.push_str("(ite ");
                cond.render_into(out, limit)
                    && space(out)
                    && then.render_into(out, limit)
                    && space(out)
                    && otherwise.render_into(out, limit)
                    && close(out)
            }
        }
    }
}

fn space(out: &mut String) -> bool {
    out.push(' ');
    true
}

fn close(out: &mut String) -> bool {
    out.push(')');
    true
}

impl fmt::Display for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (text, _) = self.render(usize::MAX);
        f.write_str(&text)
    }
}

impl fmt::Debug for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (text, truncated) = self.render(512);
        if truncated {
            write!(f, "{text}...")
        } else {
            f.write_str(&text)
        }
    }
}
