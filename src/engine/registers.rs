//! Architectural register and flag identities.
//!
//! The 16 general-purpose registers form a closed enumeration whose discriminants follow the
//! canonical order used by trace register snapshots (accumulator, base, counter, data,
//! destination-index, source-index, frame-pointer, stack-pointer, then `r8`..`r15`). A
//! [`RegisterFile`] is a fixed 16-entry array indexed by that enumeration, so a snapshot can
//! never miss or duplicate a register.

use std::ops::{Index, IndexMut};

use strum::{Display, EnumString};

/// x86-64 general-purpose register, in canonical trace order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum GpRegister {
    /// Accumulator
    Rax = 0,
    /// Base
    Rbx = 1,
    /// Counter
    Rcx = 2,
    /// Data
    Rdx = 3,
    /// Destination index
    Rdi = 4,
    /// Source index
    Rsi = 5,
    /// Frame pointer
    Rbp = 6,
    /// Stack pointer
    Rsp = 7,
    /// Extended register 8
    R8 = 8,
    /// Extended register 9
    R9 = 9,
    /// Extended register 10
    R10 = 10,
    /// Extended register 11
    R11 = 11,
    /// Extended register 12
    R12 = 12,
    /// Extended register 13
    R13 = 13,
    /// Extended register 14
    R14 = 14,
    /// Extended register 15
    R15 = 15,
}

impl GpRegister {
    /// Number of general-purpose registers.
    pub const COUNT: usize = 16;

    /// All registers in canonical trace order.
    pub const CANONICAL: [GpRegister; GpRegister::COUNT] = [
        GpRegister::Rax,
        GpRegister::Rbx,
        GpRegister::Rcx,
        GpRegister::Rdx,
        GpRegister::Rdi,
        GpRegister::Rsi,
        GpRegister::Rbp,
        GpRegister::Rsp,
        GpRegister::R8,
        GpRegister::R9,
        GpRegister::R10,
        GpRegister::R11,
        GpRegister::R12,
        GpRegister::R13,
        GpRegister::R14,
        GpRegister::R15,
    ];

    /// Position of this register in the canonical order.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The full 64-bit view of this register.
    #[must_use]
    pub const fn full(self) -> RegisterSlice {
        RegisterSlice::new(self, 0, 64)
    }

    /// The low `bits` bits of this register.
    #[must_use]
    pub const fn low(self, bits: u32) -> RegisterSlice {
        RegisterSlice::new(self, 0, bits)
    }
}

// Every canonical slot must hold the register whose discriminant is that slot.
const _: () = {
    let mut i = 0;
    while i < GpRegister::COUNT {
        assert!(GpRegister::CANONICAL[i] as usize == i);
        i += 1;
    }
};

/// Fixed-size storage holding one value per general-purpose register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile<T>([T; GpRegister::COUNT]);

impl<T> RegisterFile<T> {
    /// Wraps an array whose entries are in canonical order.
    pub const fn from_array(values: [T; GpRegister::COUNT]) -> Self {
        Self(values)
    }

    /// Iterates `(register, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (GpRegister, &T)> {
        GpRegister::CANONICAL.iter().copied().zip(self.0.iter())
    }

    /// Returns the underlying canonical-order array.
    pub fn as_array(&self) -> &[T; GpRegister::COUNT] {
        &self.0
    }
}

impl<T: Default> Default for RegisterFile<T> {
    fn default() -> Self {
        Self(std::array::from_fn(|_| T::default()))
    }
}

impl<T> Index<GpRegister> for RegisterFile<T> {
    type Output = T;

    fn index(&self, reg: GpRegister) -> &T {
        &self.0[reg.index()]
    }
}

impl<T> IndexMut<GpRegister> for RegisterFile<T> {
    fn index_mut(&mut self, reg: GpRegister) -> &mut T {
        &mut self.0[reg.index()]
    }
}

/// A contiguous bit range of a general-purpose register (`edi`, `sil`, `ah`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterSlice {
    /// Containing 64-bit register.
    pub reg: GpRegister,
    /// Lowest bit of the slice (8 for the legacy high-byte registers, 0 otherwise).
    pub offset: u32,
    /// Width of the slice in bits.
    pub bits: u32,
}

impl RegisterSlice {
    /// Creates a slice of `bits` bits starting at bit `offset`.
    #[must_use]
    pub const fn new(reg: GpRegister, offset: u32, bits: u32) -> Self {
        Self { reg, offset, bits }
    }

    /// Highest bit covered by the slice.
    #[must_use]
    pub const fn high_bit(&self) -> u32 {
        self.offset + self.bits - 1
    }
}

impl std::fmt::Display for RegisterSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const LEGACY: [[&str; 4]; 8] = [
            ["al", "ax", "eax", "rax"],
            ["bl", "bx", "ebx", "rbx"],
            ["cl", "cx", "ecx", "rcx"],
            ["dl", "dx", "edx", "rdx"],
            ["dil", "di", "edi", "rdi"],
            ["sil", "si", "esi", "rsi"],
            ["bpl", "bp", "ebp", "rbp"],
            ["spl", "sp", "esp", "rsp"],
        ];
        let size_index = match self.bits {
            8 => 0,
            16 => 1,
            32 => 2,
            _ => 3,
        };
        let index = self.reg.index();
        if self.offset == 8 && self.bits == 8 && index < 4 {
            return write!(f, "{}h", &LEGACY[index][0][..1]);
        }
        if self.offset != 0 || !matches!(self.bits, 8 | 16 | 32 | 64) {
            return write!(f, "{}[{}:{}]", self.reg, self.high_bit(), self.offset);
        }
        if index < 8 {
            f.write_str(LEGACY[index][size_index])
        } else {
            let suffix = ["b", "w", "d", ""][size_index];
            write!(f, "{}{suffix}", self.reg)
        }
    }
}

/// Status flag tracked symbolically by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Flag {
    /// Carry flag
    Cf,
    /// Parity flag
    Pf,
    /// Auxiliary carry flag
    Af,
    /// Zero flag
    Zf,
    /// Sign flag
    Sf,
    /// Direction flag
    Df,
    /// Overflow flag
    Of,
}

impl Flag {
    /// All tracked flags.
    pub const ALL: [Flag; 7] = [
        Flag::Cf,
        Flag::Pf,
        Flag::Af,
        Flag::Zf,
        Flag::Sf,
        Flag::Df,
        Flag::Of,
    ];

    /// Bit position of the flag inside RFLAGS.
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Flag::Cf => 0,
            Flag::Pf => 2,
            Flag::Af => 4,
            Flag::Zf => 6,
            Flag::Sf => 7,
            Flag::Df => 10,
            Flag::Of => 11,
        }
    }

    /// Dense index used for flag storage.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_matches_trace_layout() {
        let names: Vec<String> = GpRegister::CANONICAL.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            [
                "rax", "rbx", "rcx", "rdx", "rdi", "rsi", "rbp", "rsp", "r8", "r9", "r10", "r11",
                "r12", "r13", "r14", "r15"
            ]
        );
    }

    #[test]
    fn register_file_indexing() {
        let mut file: RegisterFile<u64> = RegisterFile::default();
        file[GpRegister::Rsi] = 7;
        assert_eq!(file.as_array()[5], 7);
        let (reg, value) = file.iter().nth(5).unwrap();
        assert_eq!(reg, GpRegister::Rsi);
        assert_eq!(*value, 7);
    }

    #[test]
    fn slice_names() {
        assert_eq!(GpRegister::Rdi.low(8).to_string(), "dil");
        assert_eq!(GpRegister::Rsi.low(16).to_string(), "si");
        assert_eq!(GpRegister::Rax.low(32).to_string(), "eax");
        assert_eq!(RegisterSlice::new(GpRegister::Rbx, 8, 8).to_string(), "bh");
        assert_eq!(GpRegister::R9.low(32).to_string(), "r9d");
        assert_eq!(GpRegister::R15.full().to_string(), "r15");
    }

    #[test]
    fn flag_parsing() {
        assert_eq!("cf".parse::<Flag>().unwrap(), Flag::Cf);
        assert_eq!("AF".parse::<Flag>().unwrap(), Flag::Af);
        assert!("xf".parse::<Flag>().is_err());
        assert_eq!(Flag::Of.bit(), 11);
    }
}
