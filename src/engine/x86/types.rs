//! x86-64 instruction type definitions.
//!
//! This module provides the simplified instruction view the x86 engine executes. Operands
//! are reduced to register slices, immediates, and memory references; everything else about
//! an instruction (mnemonic, encoding length, side effects for unsupported instructions)
//! comes straight from iced-x86 at decode time.
//!
//! # Overview
//!
//! - [`X86Memory`] - Memory operands with base, index, scale, displacement
//! - [`X86Operand`] - Union of register, immediate, or memory operand
//! - [`X86Condition`] - Condition codes of `jcc`, `setcc`, and `cmovcc`
//! - [`DecodedInstruction`] - Decoded instruction with address, length, and operands

use iced_x86::Mnemonic;

use crate::engine::{
    registers::{Flag, GpRegister, RegisterSlice},
    InstructionClass,
};

/// Memory operand representing x86 addressing modes.
///
/// x86 memory operands use the formula: `[base + index*scale + displacement]`.
/// RIP-relative operands are decoded to an absolute displacement without base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X86Memory {
    /// Base register (optional). When `None`, uses absolute addressing.
    pub base: Option<RegisterSlice>,
    /// Index register (optional, for SIB addressing).
    pub index: Option<RegisterSlice>,
    /// Scale factor for index (1, 2, 4, or 8).
    pub scale: u8,
    /// Displacement added to the computed address.
    pub displacement: i64,
    /// Size of the memory access in bytes (0 for `lea`-style address-only operands).
    pub size: u8,
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum X86Operand {
    /// Register operand.
    Register(RegisterSlice),
    /// Immediate value, already sign- or zero-extended by the decoder.
    Immediate(i64),
    /// Memory operand.
    Memory(X86Memory),
}

impl X86Operand {
    /// Returns the register if this is a register operand.
    #[must_use]
    pub fn as_register(&self) -> Option<RegisterSlice> {
        match self {
            X86Operand::Register(reg) => Some(*reg),
            _ => None,
        }
    }

    /// Returns the memory reference if this is a memory operand.
    #[must_use]
    pub fn as_memory(&self) -> Option<&X86Memory> {
        match self {
            X86Operand::Memory(mem) => Some(mem),
            _ => None,
        }
    }

    /// Width of the operand in bits, if it has an intrinsic width.
    #[must_use]
    pub fn bits(&self) -> Option<u32> {
        match self {
            X86Operand::Register(reg) => Some(reg.bits),
            X86Operand::Memory(mem) if mem.size > 0 => Some(u32::from(mem.size) * 8),
            _ => None,
        }
    }
}

/// x86 condition codes.
///
/// | Condition | Flags Checked |
/// |-----------|---------------|
/// | `E`/`Ne` | ZF |
/// | `L`/`Ge`/`Le`/`G` | SF, OF, ZF |
/// | `B`/`Ae`/`Be`/`A` | CF, ZF |
/// | `S`/`Ns` | SF |
/// | `O`/`No` | OF |
/// | `P`/`Np` | PF |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum X86Condition {
    /// Equal (ZF=1)
    E,
    /// Not equal (ZF=0)
    Ne,
    /// Less than (SF!=OF)
    L,
    /// Greater than or equal (SF=OF)
    Ge,
    /// Less than or equal (ZF=1 or SF!=OF)
    Le,
    /// Greater than (ZF=0 and SF=OF)
    G,
    /// Below (CF=1)
    B,
    /// Above or equal (CF=0)
    Ae,
    /// Below or equal (CF=1 or ZF=1)
    Be,
    /// Above (CF=0 and ZF=0)
    A,
    /// Sign (SF=1)
    S,
    /// Not sign (SF=0)
    Ns,
    /// Overflow (OF=1)
    O,
    /// Not overflow (OF=0)
    No,
    /// Parity even (PF=1)
    P,
    /// Parity odd (PF=0)
    Np,
}

impl X86Condition {
    /// Returns the negation of this condition.
    #[must_use]
    pub fn negate(&self) -> Self {
        match self {
            X86Condition::E => X86Condition::Ne,
            X86Condition::Ne => X86Condition::E,
            X86Condition::L => X86Condition::Ge,
            X86Condition::Ge => X86Condition::L,
            X86Condition::Le => X86Condition::G,
            X86Condition::G => X86Condition::Le,
            X86Condition::B => X86Condition::Ae,
            X86Condition::Ae => X86Condition::B,
            X86Condition::Be => X86Condition::A,
            X86Condition::A => X86Condition::Be,
            X86Condition::S => X86Condition::Ns,
            X86Condition::Ns => X86Condition::S,
            X86Condition::O => X86Condition::No,
            X86Condition::No => X86Condition::O,
            X86Condition::P => X86Condition::Np,
            X86Condition::Np => X86Condition::P,
        }
    }

    /// Whether this condition is the negated form of its base condition.
    #[must_use]
    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            X86Condition::Ne
                | X86Condition::Ge
                | X86Condition::G
                | X86Condition::Ae
                | X86Condition::A
                | X86Condition::Ns
                | X86Condition::No
                | X86Condition::Np
        )
    }
}

/// A decoded x86-64 instruction ready for execution.
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    /// Address of the instruction.
    pub address: u64,
    /// Length of the encoded instruction in bytes (1-15).
    pub length: usize,
    /// The iced-x86 mnemonic.
    pub mnemonic: Mnemonic,
    /// Explicit operands in Intel order (destination first).
    pub operands: Vec<X86Operand>,
    /// Condition code of `jcc`/`setcc`/`cmovcc`.
    pub condition: Option<X86Condition>,
    /// Intel-syntax disassembly.
    pub text: String,
    /// Engine-neutral classification.
    pub class: InstructionClass,
    /// General-purpose registers the instruction may write.
    pub written_registers: Vec<GpRegister>,
    /// Tracked flags the instruction may modify.
    pub written_flags: Vec<Flag>,
    /// An operand lies outside the modeled register file (vector, segment, control
    /// registers); `operands` is empty and only the side effects above apply.
    pub opaque: bool,
}

impl DecodedInstruction {
    /// Address of the following instruction.
    #[inline]
    #[must_use]
    pub fn next_address(&self) -> u64 {
        self.address.wrapping_add(self.length as u64)
    }

    /// Operand at `index`.
    #[must_use]
    pub fn operand(&self, index: usize) -> Option<&X86Operand> {
        self.operands.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_negation_roundtrips() {
        let all = [
            X86Condition::E,
            X86Condition::L,
            X86Condition::Le,
            X86Condition::B,
            X86Condition::Be,
            X86Condition::S,
            X86Condition::O,
            X86Condition::P,
        ];
        for cond in all {
            assert!(!cond.is_negated());
            assert!(cond.negate().is_negated());
            assert_eq!(cond.negate().negate(), cond);
        }
    }

    #[test]
    fn operand_widths() {
        let reg = X86Operand::Register(GpRegister::Rax.low(16));
        assert_eq!(reg.bits(), Some(16));
        assert_eq!(X86Operand::Immediate(5).bits(), None);
        let mem = X86Operand::Memory(X86Memory {
            base: Some(GpRegister::Rsp.full()),
            index: None,
            scale: 1,
            displacement: 8,
            size: 4,
        });
        assert_eq!(mem.bits(), Some(32));
        assert!(mem.as_memory().is_some());
        assert!(mem.as_register().is_none());
    }
}
