//! Machine state of the x86 engine.
//!
//! Every storage location holds a [`Tracked`] value: the concrete bits observed along the
//! trace plus, when the location depends on a symbolic variable, the formula computing them.
//! Both halves are updated together by every operation, so the concrete value always equals
//! the formula evaluated under the current variable seeds.
//!
//! Memory is a sparse byte map. Bytes never written read as concrete zero.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::engine::{
    expr::SymbolicExpr,
    ops::{mask, SymbolicOp},
    registers::{Flag, RegisterFile, RegisterSlice},
};

bitflags! {
    /// Layout of the RFLAGS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rflags: u64 {
        /// Carry
        const CF = 1 << 0;
        /// Always set
        const RESERVED = 1 << 1;
        /// Parity
        const PF = 1 << 2;
        /// Auxiliary carry
        const AF = 1 << 4;
        /// Zero
        const ZF = 1 << 6;
        /// Sign
        const SF = 1 << 7;
        /// Trap
        const TF = 1 << 8;
        /// Interrupt enable
        const IF = 1 << 9;
        /// Direction
        const DF = 1 << 10;
        /// Overflow
        const OF = 1 << 11;

        /// Bits stored as individually tracked flags.
        const TRACKED = Self::CF.bits()
            | Self::PF.bits()
            | Self::AF.bits()
            | Self::ZF.bits()
            | Self::SF.bits()
            | Self::DF.bits()
            | Self::OF.bits();
    }
}

impl Default for Rflags {
    fn default() -> Self {
        Rflags::RESERVED | Rflags::IF
    }
}

/// A concrete value with an optional formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked {
    value: u64,
    bits: u32,
    expr: Option<SymbolicExpr>,
}

impl Tracked {
    /// A concrete value of `bits` bits.
    #[must_use]
    pub fn concrete(value: u64, bits: u32) -> Self {
        Self {
            value: value & mask(bits),
            bits,
            expr: None,
        }
    }

    /// A value computed by `expr`, whose evaluation is `value`.
    #[must_use]
    pub fn symbolic(expr: SymbolicExpr, value: u64) -> Self {
        let bits = expr.bits();
        let expr = (!expr.is_constant()).then_some(expr);
        Self {
            value: value & mask(bits),
            bits,
            expr,
        }
    }

    /// A 1-bit value.
    #[must_use]
    pub fn bit(value: bool) -> Self {
        Self::concrete(u64::from(value), 1)
    }

    /// Concrete value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Width in bits.
    #[inline]
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Whether the value depends on a symbolic variable.
    #[inline]
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        self.expr.is_some()
    }

    /// The formula, or a constant when the value is concrete.
    #[must_use]
    pub fn expr(&self) -> SymbolicExpr {
        match &self.expr {
            Some(expr) => expr.clone(),
            None => SymbolicExpr::constant(self.value, self.bits),
        }
    }

    /// A constant of the same width as `self`.
    #[must_use]
    pub fn same_width(&self, value: u64) -> Self {
        Self::concrete(value, self.bits)
    }

    /// Applies a unary operation.
    #[must_use]
    pub fn unary(&self, op: SymbolicOp) -> Self {
        let value = op.apply_unary(self.value, self.bits);
        match &self.expr {
            Some(expr) => Self::symbolic(SymbolicExpr::unary(op, expr.clone()), value),
            None => Self::concrete(value, self.bits),
        }
    }

    /// Applies `op`; comparisons produce 1-bit values.
    #[must_use]
    pub fn binary(&self, op: SymbolicOp, other: &Tracked) -> Self {
        debug_assert_eq!(self.bits, other.bits);
        let value = op.apply(self.value, other.value, self.bits);
        let bits = if op.is_comparison() { 1 } else { self.bits };
        if self.expr.is_none() && other.expr.is_none() {
            return Self::concrete(value, bits);
        }
        Self::symbolic(SymbolicExpr::binary(op, self.expr(), other.expr()), value)
    }

    /// Extracts bits `high..=low`.
    #[must_use]
    pub fn extract(&self, high: u32, low: u32) -> Self {
        let bits = high - low + 1;
        let value = (self.value >> low) & mask(bits);
        match &self.expr {
            Some(expr) => Self::symbolic(SymbolicExpr::extract(high, low, expr.clone()), value),
            None => Self::concrete(value, bits),
        }
    }

    /// Bit `index` as a 1-bit value.
    #[must_use]
    pub fn bit_at(&self, index: u32) -> Self {
        self.extract(index, index)
    }

    /// Most significant bit.
    #[must_use]
    pub fn msb(&self) -> Self {
        self.bit_at(self.bits - 1)
    }

    /// Zero-extends to `bits` wide.
    #[must_use]
    pub fn zero_extend(&self, bits: u32) -> Self {
        match &self.expr {
            Some(expr) => Self::symbolic(SymbolicExpr::zero_extend(expr.clone(), bits), self.value),
            None => Self::concrete(self.value, bits),
        }
    }

    /// Sign-extends to `bits` wide.
    #[must_use]
    pub fn sign_extend(&self, bits: u32) -> Self {
        let value = crate::engine::ops::sign_extend(self.value, self.bits).cast_unsigned();
        match &self.expr {
            Some(expr) => Self::symbolic(SymbolicExpr::sign_extend(expr.clone(), bits), value),
            None => Self::concrete(value, bits),
        }
    }

    /// Truncates or zero-extends to `bits` bits.
    #[must_use]
    pub fn resize(&self, bits: u32) -> Self {
        if bits < self.bits {
            self.extract(bits - 1, 0)
        } else {
            self.zero_extend(bits)
        }
    }

    /// `self` above `low`.
    #[must_use]
    pub fn concat(&self, low: &Tracked) -> Self {
        let value = (self.value << low.bits) | low.value;
        if self.expr.is_none() && low.expr.is_none() {
            return Self::concrete(value, self.bits + low.bits);
        }
        Self::symbolic(SymbolicExpr::concat(self.expr(), low.expr()), value)
    }

    /// `cond ? then : otherwise` for a 1-bit `cond`.
    #[must_use]
    pub fn select(cond: &Tracked, then: &Tracked, otherwise: &Tracked) -> Self {
        let chosen = if cond.value != 0 { then } else { otherwise };
        if cond.expr.is_none() {
            return chosen.clone();
        }
        Self::symbolic(
            SymbolicExpr::ite(cond.expr(), then.expr(), otherwise.expr()),
            chosen.value,
        )
    }
}

/// Registers, flags, and memory of the emulated machine.
#[derive(Debug, Clone)]
pub struct MachineState {
    registers: RegisterFile<Tracked>,
    flags: [Tracked; Flag::ALL.len()],
    /// RFLAGS bits that are not tracked individually.
    rflags: Rflags,
    memory: FxHashMap<u64, Tracked>,
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineState {
    /// Creates a zeroed machine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registers: RegisterFile::from_array(std::array::from_fn(|_| Tracked::concrete(0, 64))),
            flags: std::array::from_fn(|_| Tracked::bit(false)),
            rflags: Rflags::default(),
            memory: FxHashMap::default(),
        }
    }

    /// Clears every register, flag, and memory byte.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Reads a register slice.
    #[must_use]
    pub fn register(&self, slice: RegisterSlice) -> Tracked {
        let full = &self.registers[slice.reg];
        if slice.offset == 0 && slice.bits == 64 {
            return full.clone();
        }
        full.extract(slice.high_bit(), slice.offset)
    }

    /// Writes a register slice with x86 semantics: 32-bit writes clear the upper half,
    /// 8- and 16-bit writes preserve the surrounding bits.
    pub fn set_register(&mut self, slice: RegisterSlice, value: Tracked) {
        debug_assert_eq!(slice.bits, value.bits());
        if slice.offset == 0 && slice.bits == 32 {
            self.registers[slice.reg] = value.zero_extend(64);
        } else {
            self.merge_register(slice, value);
        }
    }

    /// Writes a register slice, preserving every bit outside it.
    pub fn merge_register(&mut self, slice: RegisterSlice, value: Tracked) {
        if slice.offset == 0 && slice.bits == 64 {
            self.registers[slice.reg] = value;
            return;
        }
        let old = self.registers[slice.reg].clone();
        let mut merged = value;
        if slice.offset > 0 {
            merged = merged.concat(&old.extract(slice.offset - 1, 0));
        }
        if slice.high_bit() < 63 {
            merged = old.extract(63, slice.high_bit() + 1).concat(&merged);
        }
        self.registers[slice.reg] = merged;
    }

    /// Current value of a tracked flag.
    #[must_use]
    pub fn flag(&self, flag: Flag) -> Tracked {
        self.flags[flag.index()].clone()
    }

    /// Sets a tracked flag.
    pub fn set_flag(&mut self, flag: Flag, value: Tracked) {
        debug_assert_eq!(value.bits(), 1);
        self.flags[flag.index()] = value;
    }

    /// Full 64-bit RFLAGS, composed from the tracked flags.
    #[must_use]
    pub fn rflags(&self) -> Tracked {
        let base = (self.rflags - Rflags::TRACKED).bits();
        let mut value = Tracked::concrete(base, 64);
        for flag in Flag::ALL {
            let bit = Tracked::concrete(u64::from(flag.bit()), 64);
            let positioned = self.flag(flag).zero_extend(64).binary(SymbolicOp::Shl, &bit);
            value = value.binary(SymbolicOp::Or, &positioned);
        }
        value
    }

    /// Replaces RFLAGS; tracked flags take the corresponding bits of `value`.
    pub fn set_rflags(&mut self, value: &Tracked) {
        let value = value.resize(64);
        for flag in Flag::ALL {
            self.set_flag(flag, value.bit_at(flag.bit()));
        }
        self.rflags = (Rflags::from_bits_retain(value.value()) - Rflags::TRACKED) | Rflags::RESERVED;
    }

    /// Reads `size` bytes little-endian.
    #[must_use]
    pub fn memory(&self, address: u64, size: usize) -> Tracked {
        let mut value: Option<Tracked> = None;
        for offset in (0..size as u64).rev() {
            let byte = self.byte(address.wrapping_add(offset));
            value = Some(match value {
                Some(high) => high.concat(&byte),
                None => byte,
            });
        }
        value.unwrap_or_else(|| Tracked::concrete(0, 8))
    }

    /// Writes `value` little-endian; its width determines the number of bytes.
    pub fn set_memory(&mut self, address: u64, value: &Tracked) {
        for index in 0..value.bits() / 8 {
            let byte = value.extract(index * 8 + 7, index * 8);
            let at = address.wrapping_add(u64::from(index));
            if byte.is_symbolic() || byte.value() != 0 {
                self.memory.insert(at, byte);
            } else {
                self.memory.remove(&at);
            }
        }
    }

    fn byte(&self, address: u64) -> Tracked {
        self.memory
            .get(&address)
            .cloned()
            .unwrap_or_else(|| Tracked::concrete(0, 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GpRegister;

    fn var(id: usize, bits: u32, value: u64) -> Tracked {
        Tracked::symbolic(SymbolicExpr::variable(id, bits), value)
    }

    #[test]
    fn tracked_folds_constants() {
        let a = Tracked::concrete(0xff, 8);
        let b = Tracked::concrete(1, 8);
        let sum = a.binary(SymbolicOp::Add, &b);
        assert_eq!(sum.value(), 0);
        assert!(!sum.is_symbolic());

        let x = var(0, 8, 3);
        let masked = x.binary(SymbolicOp::And, &Tracked::concrete(0, 8));
        assert!(!masked.is_symbolic());
        assert_eq!(masked.value(), 0);
    }

    #[test]
    fn register_write_widths() {
        let mut state = MachineState::new();
        let rax = GpRegister::Rax;
        state.set_register(rax.full(), Tracked::concrete(0xffff_ffff_ffff_ffff, 64));

        state.set_register(rax.low(16), Tracked::concrete(0x1234, 16));
        assert_eq!(state.register(rax.full()).value(), 0xffff_ffff_ffff_1234);

        state.set_register(RegisterSlice::new(rax, 8, 8), Tracked::concrete(0xab, 8));
        assert_eq!(state.register(rax.full()).value(), 0xffff_ffff_ffff_ab34);

        state.set_register(rax.low(32), Tracked::concrete(0x5, 32));
        assert_eq!(state.register(rax.full()).value(), 0x5);
    }

    #[test]
    fn merge_keeps_symbolic_slice() {
        let mut state = MachineState::new();
        let rdi = GpRegister::Rdi;
        state.set_register(rdi.full(), Tracked::concrete(0xdead_0000_0000_0000, 64));
        state.merge_register(rdi.low(32), var(0, 32, 7));

        let full = state.register(rdi.full());
        assert_eq!(full.value(), 0xdead_0000_0000_0007);
        assert!(full.is_symbolic());
        assert_eq!(state.register(rdi.low(32)).expr(), SymbolicExpr::variable(0, 32));
    }

    #[test]
    fn memory_is_little_endian() {
        let mut state = MachineState::new();
        state.set_memory(0x1000, &Tracked::concrete(0x1122_3344, 32));
        assert_eq!(state.memory(0x1000, 1).value(), 0x44);
        assert_eq!(state.memory(0x1002, 2).value(), 0x1122);
        assert_eq!(state.memory(0x2000, 8).value(), 0);

        let x = var(0, 32, 9);
        state.set_memory(0x3000, &x.zero_extend(64));
        let back = state.memory(0x3000, 4);
        assert_eq!(back.expr(), SymbolicExpr::variable(0, 32));
        assert!(!state.memory(0x3004, 4).is_symbolic());
    }

    #[test]
    fn rflags_round_trip() {
        let mut state = MachineState::new();
        assert_eq!(state.rflags().value(), 0x202);

        state.set_rflags(&Tracked::concrete(0x8d5, 64));
        assert_eq!(state.flag(Flag::Cf).value(), 1);
        assert_eq!(state.flag(Flag::Zf).value(), 1);
        assert_eq!(state.flag(Flag::Of).value(), 1);
        assert_eq!(state.flag(Flag::Df).value(), 0);
        assert_eq!(state.rflags().value(), 0x8d7);
    }

    #[test]
    fn symbolic_rflags_split_into_flags() {
        let mut state = MachineState::new();
        let x = var(0, 64, 1);
        state.set_rflags(&x);
        let cf = state.flag(Flag::Cf);
        assert!(cf.is_symbolic());
        assert_eq!(cf.value(), 1);
        assert_eq!(cf.expr(), SymbolicExpr::extract(0, 0, SymbolicExpr::variable(0, 64)));
    }
}
