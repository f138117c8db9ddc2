//! Symbolic operation types.
//!
//! This module defines [`SymbolicOp`], the set of bit-vector operations supported in
//! symbolic formulas, together with their concrete semantics. The x86 engine computes
//! concrete results through [`SymbolicOp::apply`], and formula evaluation uses the same
//! function, so a register's concrete value always equals the evaluation of its formula.
//!
//! Operations are categorized as:
//! - **Arithmetic**: Add, Sub, Mul, Neg
//! - **Bitwise**: And, Or, Xor, Not, Shl, ShrU, ShrS, Rotl, Rotr
//! - **Comparison**: Eq, Ne, LtU, LeU, LtS, LeS (1-bit results)

use std::fmt;

/// Mask selecting the low `bits` bits of a `u64`.
#[inline]
#[must_use]
pub const fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Sign-extends the low `bits` bits of `value` to a full `i64`.
#[inline]
#[must_use]
pub const fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits >= 64 {
        value.cast_signed()
    } else {
        let shift = 64 - bits;
        (value << shift).cast_signed() >> shift
    }
}

/// A symbolic operation in a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolicOp {
    // Arithmetic operations
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication (low half).
    Mul,
    /// Two's complement negation.
    Neg,

    // Bitwise operations
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Bitwise NOT.
    Not,
    /// Shift left.
    Shl,
    /// Arithmetic shift right (preserves sign).
    ShrS,
    /// Logical shift right (zero-fill).
    ShrU,
    /// Rotate left.
    Rotl,
    /// Rotate right.
    Rotr,

    // Comparison operations (1-bit results)
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Unsigned less than.
    LtU,
    /// Unsigned less than or equal.
    LeU,
    /// Signed less than.
    LtS,
    /// Signed less than or equal.
    LeS,
}

impl SymbolicOp {
    /// Checks if this operation is commutative.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor | Self::Eq | Self::Ne
        )
    }

    /// Checks if this operation is a comparison producing a 1-bit result.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::LtU | Self::LeU | Self::LtS | Self::LeS
        )
    }

    /// Checks if this is a unary operation.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Not)
    }

    /// SMT-LIB name of the operation, used when rendering formulas.
    #[must_use]
    pub const fn smt_name(self) -> &'static str {
        match self {
            Self::Add => "bvadd",
            Self::Sub => "bvsub",
            Self::Mul => "bvmul",
            Self::Neg => "bvneg",
            Self::And => "bvand",
            Self::Or => "bvor",
            Self::Xor => "bvxor",
            Self::Not => "bvnot",
            Self::Shl => "bvshl",
            Self::ShrS => "bvashr",
            Self::ShrU => "bvlshr",
            Self::Rotl => "bvrol",
            Self::Rotr => "bvror",
            Self::Eq => "=",
            Self::Ne => "distinct",
            Self::LtU => "bvult",
            Self::LeU => "bvule",
            Self::LtS => "bvslt",
            Self::LeS => "bvsle",
        }
    }

    /// Applies a unary operation to a `bits`-wide value.
    #[must_use]
    pub const fn apply_unary(self, value: u64, bits: u32) -> u64 {
        let result = match self {
            Self::Neg => value.wrapping_neg(),
            Self::Not => !value,
            _ => value,
        };
        result & mask(bits)
    }

    /// Applies a binary operation to two `bits`-wide operands.
    ///
    /// Shift amounts of at least `bits` yield 0 for logical shifts and the sign fill for
    /// arithmetic shifts, matching SMT-LIB bit-vector semantics. Rotations reduce the
    /// amount modulo `bits`. Comparisons return 0 or 1.
    #[must_use]
    pub fn apply(self, left: u64, right: u64, bits: u32) -> u64 {
        let m = mask(bits);
        let (l, r) = (left & m, right & m);
        let result = match self {
            Self::Add => l.wrapping_add(r),
            Self::Sub => l.wrapping_sub(r),
            Self::Mul => l.wrapping_mul(r),
            Self::And => l & r,
            Self::Or => l | r,
            Self::Xor => l ^ r,
            Self::Shl => {
                if r >= u64::from(bits) {
                    0
                } else {
                    l << r
                }
            }
            Self::ShrU => {
                if r >= u64::from(bits) {
                    0
                } else {
                    l >> r
                }
            }
            Self::ShrS => {
                let amount = r.min(u64::from(bits) - 1);
                (sign_extend(l, bits) >> amount).cast_unsigned()
            }
            Self::Rotl | Self::Rotr => {
                let amount = (r % u64::from(bits)) as u32;
                if amount == 0 {
                    l
                } else {
                    let back = bits - amount;
                    if matches!(self, Self::Rotl) {
                        (l << amount) | (l >> back)
                    } else {
                        (l >> amount) | (l << back)
                    }
                }
            }
            Self::Eq => u64::from(l == r),
            Self::Ne => u64::from(l != r),
            Self::LtU => u64::from(l < r),
            Self::LeU => u64::from(l <= r),
            Self::LtS => u64::from(sign_extend(l, bits) < sign_extend(r, bits)),
            Self::LeS => u64::from(sign_extend(l, bits) <= sign_extend(r, bits)),
            Self::Neg | Self::Not => return self.apply_unary(l, bits),
        };
        if self.is_comparison() {
            result
        } else {
            result & m
        }
    }
}

impl fmt::Display for SymbolicOp {
    #[allow(clippy::match_same_arms)] // Sub and Neg are semantically different (binary vs unary)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Neg => write!(f, "-"),
            Self::And => write!(f, "&"),
            Self::Or => write!(f, "|"),
            Self::Xor => write!(f, "^"),
            Self::Not => write!(f, "~"),
            Self::Shl => write!(f, "<<"),
            Self::ShrS => write!(f, ">>"),
            Self::ShrU => write!(f, ">>>"),
            Self::Rotl => write!(f, "rol"),
            Self::Rotr => write!(f, "ror"),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
            Self::LtU => write!(f, "<u"),
            Self::LeU => write!(f, "<=u"),
            Self::LtS => write!(f, "<"),
            Self::LeS => write!(f, "<="),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_and_sign_extension() {
        assert_eq!(mask(1), 1);
        assert_eq!(mask(32), 0xffff_ffff);
        assert_eq!(mask(64), u64::MAX);
        assert_eq!(sign_extend(0x80, 8), -128);
        assert_eq!(sign_extend(0x7f, 8), 127);
    }

    #[test]
    fn wrapping_arithmetic() {
        assert_eq!(SymbolicOp::Add.apply(0xff, 1, 8), 0);
        assert_eq!(SymbolicOp::Sub.apply(0, 1, 16), 0xffff);
        assert_eq!(SymbolicOp::Mul.apply(0x10, 0x10, 8), 0);
        assert_eq!(SymbolicOp::Neg.apply_unary(1, 32), 0xffff_ffff);
    }

    #[test]
    fn shifts_and_rotates() {
        assert_eq!(SymbolicOp::Shl.apply(1, 8, 8), 0);
        assert_eq!(SymbolicOp::ShrU.apply(0x80, 7, 8), 1);
        assert_eq!(SymbolicOp::ShrS.apply(0x80, 7, 8), 0xff);
        assert_eq!(SymbolicOp::ShrS.apply(0x80, 100, 8), 0xff);
        assert_eq!(SymbolicOp::Rotl.apply(0x81, 1, 8), 0x03);
        assert_eq!(SymbolicOp::Rotr.apply(0x81, 1, 8), 0xc0);
        assert_eq!(SymbolicOp::Rotl.apply(0x81, 8, 8), 0x81);
    }

    #[test]
    fn comparisons() {
        assert_eq!(SymbolicOp::LtU.apply(1, 0xff, 8), 1);
        assert_eq!(SymbolicOp::LtS.apply(1, 0xff, 8), 0);
        assert_eq!(SymbolicOp::LeS.apply(0xff, 0xff, 8), 1);
        assert_eq!(SymbolicOp::Ne.apply(3, 3, 64), 0);
    }
}
