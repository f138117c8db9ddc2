//! x86-64 instruction decoder using iced-x86.
//!
//! This module provides a thin wrapper around iced-x86 that converts its instruction
//! representation to the engine's [`DecodedInstruction`]. Besides operands, it records which
//! registers and flags an instruction may write, so instructions without modeled semantics
//! can still be handled conservatively.

use iced_x86::{
    ConditionCode, Decoder, DecoderOptions, Formatter, Instruction, InstructionInfoFactory,
    IntelFormatter, Mnemonic, OpAccess, OpKind, Register, RflagsBits,
};

use crate::{
    engine::{
        registers::{Flag, GpRegister, RegisterSlice},
        x86::types::{DecodedInstruction, X86Condition, X86Memory, X86Operand},
        InstructionClass,
    },
    Error, Result,
};

/// Decode a single 64-bit instruction.
///
/// # Arguments
///
/// * `bytes` - The machine code, starting with the instruction to decode
/// * `address` - The address the instruction executes at (used for RIP-relative operands)
///
/// # Returns
///
/// The decoded instruction.
///
/// # Errors
///
/// Returns [`Error::X86Error`] if `bytes` is empty, truncated, or does not encode a valid
/// instruction. Operands the engine does not model mark the instruction opaque instead.
pub fn decode_single(bytes: &[u8], address: u64) -> Result<DecodedInstruction> {
    if bytes.is_empty() {
        return Err(Error::X86Error(format!(
            "Empty instruction at 0x{address:x}"
        )));
    }

    let mut decoder = Decoder::with_ip(64, bytes, address, DecoderOptions::NONE);
    let instr = decoder.decode();
    if instr.is_invalid() {
        return Err(Error::X86Error(format!(
            "Invalid instruction at 0x{address:x}: {}",
            hex(bytes)
        )));
    }
    if instr.len() != bytes.len() {
        log::warn!(
            "Instruction at 0x{address:x} decodes to {} of {} bytes",
            instr.len(),
            bytes.len()
        );
    }

    let mut text = String::new();
    IntelFormatter::new().format(&instr, &mut text);

    let (operands, opaque) = match (0..instr.op_count())
        .map(|index| convert_operand(&instr, index))
        .collect::<Result<Vec<_>>>()
    {
        Ok(operands) => (operands, false),
        Err(e) => {
            log::debug!("Treating '{text}' at 0x{address:x} as opaque: {e}");
            (Vec::new(), true)
        }
    };

    let (written_registers, written_flags) = side_effects(&instr);

    Ok(DecodedInstruction {
        address,
        length: instr.len(),
        mnemonic: instr.mnemonic(),
        class: classify(&instr),
        condition: convert_condition(instr.condition_code()),
        operands,
        text,
        written_registers,
        written_flags,
        opaque,
    })
}

/// Classify an instruction for the branch heuristics.
fn classify(instr: &Instruction) -> InstructionClass {
    match instr.mnemonic() {
        Mnemonic::Popf | Mnemonic::Popfd | Mnemonic::Popfq => InstructionClass::FlagsRestore,
        Mnemonic::Cmp
            if instr.op_count() == 2
                && instr.op0_kind() == OpKind::Register
                && instr.op1_kind() == OpKind::Register =>
        {
            InstructionClass::RegisterCompare
        }
        _ => InstructionClass::Other,
    }
}

/// Registers and flags an instruction may write, from iced-x86's instruction info.
fn side_effects(instr: &Instruction) -> (Vec<GpRegister>, Vec<Flag>) {
    let mut factory = InstructionInfoFactory::new();
    let info = factory.info(instr);

    let mut registers: Vec<GpRegister> = Vec::new();
    for used in info.used_registers() {
        let writes = matches!(
            used.access(),
            OpAccess::Write | OpAccess::CondWrite | OpAccess::ReadWrite | OpAccess::ReadCondWrite
        );
        if !writes {
            continue;
        }
        if let Some(reg) = gp_register(used.register()) {
            if !registers.contains(&reg) {
                registers.push(reg);
            }
        }
    }

    let modified = instr.rflags_modified();
    let flags = [
        (RflagsBits::CF, Flag::Cf),
        (RflagsBits::PF, Flag::Pf),
        (RflagsBits::AF, Flag::Af),
        (RflagsBits::ZF, Flag::Zf),
        (RflagsBits::SF, Flag::Sf),
        (RflagsBits::DF, Flag::Df),
        (RflagsBits::OF, Flag::Of),
    ]
    .into_iter()
    .filter(|(bit, _)| modified & bit != 0)
    .map(|(_, flag)| flag)
    .collect();

    (registers, flags)
}

fn convert_condition(code: ConditionCode) -> Option<X86Condition> {
    match code {
        ConditionCode::e => Some(X86Condition::E),
        ConditionCode::ne => Some(X86Condition::Ne),
        ConditionCode::l => Some(X86Condition::L),
        ConditionCode::ge => Some(X86Condition::Ge),
        ConditionCode::le => Some(X86Condition::Le),
        ConditionCode::g => Some(X86Condition::G),
        ConditionCode::b => Some(X86Condition::B),
        ConditionCode::ae => Some(X86Condition::Ae),
        ConditionCode::be => Some(X86Condition::Be),
        ConditionCode::a => Some(X86Condition::A),
        ConditionCode::s => Some(X86Condition::S),
        ConditionCode::ns => Some(X86Condition::Ns),
        ConditionCode::o => Some(X86Condition::O),
        ConditionCode::no => Some(X86Condition::No),
        ConditionCode::p => Some(X86Condition::P),
        ConditionCode::np => Some(X86Condition::Np),
        ConditionCode::None => None,
    }
}

/// Convert the operand at the given index.
fn convert_operand(instr: &Instruction, index: u32) -> Result<X86Operand> {
    let op_kind = instr.op_kind(index);

    match op_kind {
        OpKind::Register => Ok(X86Operand::Register(convert_register(
            instr.op_register(index),
        )?)),
        OpKind::Immediate8 => Ok(X86Operand::Immediate(i64::from(instr.immediate8()))),
        OpKind::Immediate8_2nd => Ok(X86Operand::Immediate(i64::from(instr.immediate8_2nd()))),
        OpKind::Immediate16 => Ok(X86Operand::Immediate(i64::from(instr.immediate16()))),
        OpKind::Immediate32 => Ok(X86Operand::Immediate(i64::from(instr.immediate32()))),
        OpKind::Immediate64 => Ok(X86Operand::Immediate(instr.immediate64().cast_signed())),
        OpKind::Immediate8to16 => Ok(X86Operand::Immediate(i64::from(instr.immediate8to16()))),
        OpKind::Immediate8to32 => Ok(X86Operand::Immediate(i64::from(instr.immediate8to32()))),
        OpKind::Immediate8to64 => Ok(X86Operand::Immediate(instr.immediate8to64())),
        OpKind::Immediate32to64 => Ok(X86Operand::Immediate(instr.immediate32to64())),
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => Ok(
            X86Operand::Immediate(instr.near_branch_target().cast_signed()),
        ),
        OpKind::Memory => Ok(X86Operand::Memory(convert_memory_operand(instr)?)),
        _ => Err(Error::X86Error(format!(
            "Unsupported operand kind {op_kind:?} at 0x{:x}",
            instr.ip()
        ))),
    }
}

/// Convert the memory operand of an instruction.
fn convert_memory_operand(instr: &Instruction) -> Result<X86Memory> {
    let rip_relative = instr.is_ip_rel_memory_operand();

    let base = if rip_relative || instr.memory_base() == Register::None {
        None
    } else {
        Some(convert_register(instr.memory_base())?)
    };

    let index = if instr.memory_index() == Register::None {
        None
    } else {
        Some(convert_register(instr.memory_index())?)
    };

    #[allow(clippy::cast_possible_truncation)]
    let scale = instr.memory_index_scale() as u8;
    let displacement = if rip_relative {
        instr.ip_rel_memory_address().cast_signed()
    } else {
        instr.memory_displacement64().cast_signed()
    };
    #[allow(clippy::cast_possible_truncation)]
    let size = instr.memory_size().size() as u8;

    Ok(X86Memory {
        base,
        index,
        scale,
        displacement,
        size,
    })
}

/// Map an iced-x86 register to the general-purpose register containing it.
fn gp_register(reg: Register) -> Option<GpRegister> {
    match reg.full_register() {
        Register::RAX => Some(GpRegister::Rax),
        Register::RBX => Some(GpRegister::Rbx),
        Register::RCX => Some(GpRegister::Rcx),
        Register::RDX => Some(GpRegister::Rdx),
        Register::RDI => Some(GpRegister::Rdi),
        Register::RSI => Some(GpRegister::Rsi),
        Register::RBP => Some(GpRegister::Rbp),
        Register::RSP => Some(GpRegister::Rsp),
        Register::R8 => Some(GpRegister::R8),
        Register::R9 => Some(GpRegister::R9),
        Register::R10 => Some(GpRegister::R10),
        Register::R11 => Some(GpRegister::R11),
        Register::R12 => Some(GpRegister::R12),
        Register::R13 => Some(GpRegister::R13),
        Register::R14 => Some(GpRegister::R14),
        Register::R15 => Some(GpRegister::R15),
        _ => None,
    }
}

/// Convert an iced-x86 register to a register slice.
fn convert_register(reg: Register) -> Result<RegisterSlice> {
    let Some(full) = gp_register(reg) else {
        return Err(Error::X86Error(format!("Unsupported register: {reg:?}")));
    };

    let offset = if matches!(reg, Register::AH | Register::BH | Register::CH | Register::DH) {
        8
    } else {
        0
    };
    #[allow(clippy::cast_possible_truncation)]
    let bits = (reg.size() * 8) as u32;

    Ok(RegisterSlice::new(full, offset, bits))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
