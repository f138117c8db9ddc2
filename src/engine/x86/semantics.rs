//! Instruction semantics of the x86 engine.
//!
//! [`execute`] applies one [`DecodedInstruction`] to a [`MachineState`], computing concrete
//! values and formulas side by side. Instructions outside the modeled subset fall back to
//! their decoded side effects: registers and flags they may write keep their concrete value
//! but lose their formula, and the next trace synchronization restores the true values.

use iced_x86::Mnemonic;

use crate::{
    engine::{
        ops::{sign_extend, SymbolicOp},
        registers::{Flag, GpRegister, RegisterSlice},
        x86::{
            flags,
            state::{MachineState, Tracked},
            types::{DecodedInstruction, X86Memory, X86Operand},
        },
    },
    Error, Result,
};

/// Executes `insn` against `state`.
///
/// # Returns
///
/// Whether the instruction read any symbolic value (operands, address registers, or flags).
///
/// # Errors
///
/// Returns [`Error::X86Error`] if a modeled instruction lacks an operand it requires.
pub fn execute(state: &mut MachineState, insn: &DecodedInstruction) -> Result<bool> {
    let mut executor = Executor {
        state,
        insn,
        symbolized: false,
    };
    executor.run()?;
    Ok(executor.symbolized)
}

struct Executor<'a> {
    state: &'a mut MachineState,
    insn: &'a DecodedInstruction,
    symbolized: bool,
}

impl<'a> Executor<'a> {
    fn run(&mut self) -> Result<()> {
        if self.insn.opaque {
            self.unmodeled();
            return Ok(());
        }

        match self.insn.mnemonic {
            Mnemonic::Nop
            | Mnemonic::Fnop
            | Mnemonic::Pause
            | Mnemonic::Endbr64
            | Mnemonic::Lfence
            | Mnemonic::Mfence
            | Mnemonic::Sfence => Ok(()),
            Mnemonic::Mov => self.mov(),
            Mnemonic::Movzx => self.extend(false),
            Mnemonic::Movsx | Mnemonic::Movsxd => self.extend(true),
            Mnemonic::Lea => self.lea(),
            Mnemonic::Xchg => self.xchg(),
            Mnemonic::Push => self.push_operand(),
            Mnemonic::Pop => self.pop_operand(),
            Mnemonic::Pushf | Mnemonic::Pushfd | Mnemonic::Pushfq => self.pushf(),
            Mnemonic::Popf | Mnemonic::Popfd | Mnemonic::Popfq => self.popf(),
            Mnemonic::Lahf => self.lahf(),
            Mnemonic::Sahf => self.sahf(),
            Mnemonic::Stc => self.set_flag(Flag::Cf, Tracked::bit(true)),
            Mnemonic::Clc => self.set_flag(Flag::Cf, Tracked::bit(false)),
            Mnemonic::Std => self.set_flag(Flag::Df, Tracked::bit(true)),
            Mnemonic::Cld => self.set_flag(Flag::Df, Tracked::bit(false)),
            Mnemonic::Cmc => {
                let cf = self.flag(Flag::Cf).unary(SymbolicOp::Not);
                self.set_flag(Flag::Cf, cf)
            }
            Mnemonic::Add => self.arithmetic(SymbolicOp::Add, false, true),
            Mnemonic::Adc => self.arithmetic(SymbolicOp::Add, true, true),
            Mnemonic::Sub => self.arithmetic(SymbolicOp::Sub, false, true),
            Mnemonic::Sbb => self.arithmetic(SymbolicOp::Sub, true, true),
            Mnemonic::Cmp => self.arithmetic(SymbolicOp::Sub, false, false),
            Mnemonic::Inc => self.step(SymbolicOp::Add),
            Mnemonic::Dec => self.step(SymbolicOp::Sub),
            Mnemonic::Neg => self.neg(),
            Mnemonic::And => self.logic(SymbolicOp::And, true),
            Mnemonic::Or => self.logic(SymbolicOp::Or, true),
            Mnemonic::Xor => self.logic(SymbolicOp::Xor, true),
            Mnemonic::Test => self.logic(SymbolicOp::And, false),
            Mnemonic::Not => self.not(),
            Mnemonic::Shl | Mnemonic::Sal => self.shift(SymbolicOp::Shl),
            Mnemonic::Shr => self.shift(SymbolicOp::ShrU),
            Mnemonic::Sar => self.shift(SymbolicOp::ShrS),
            Mnemonic::Rol => self.shift(SymbolicOp::Rotl),
            Mnemonic::Ror => self.shift(SymbolicOp::Rotr),
            Mnemonic::Bswap => self.bswap(),
            Mnemonic::Cbw => self.widen_accumulator(8),
            Mnemonic::Cwde => self.widen_accumulator(16),
            Mnemonic::Cdqe => self.widen_accumulator(32),
            Mnemonic::Cwd => self.sign_fill_data(16),
            Mnemonic::Cdq => self.sign_fill_data(32),
            Mnemonic::Cqo => self.sign_fill_data(64),
            Mnemonic::Imul if self.insn.operands.len() > 1 => self.imul(),
            Mnemonic::Imul => self.widening_multiply(true),
            Mnemonic::Mul => self.widening_multiply(false),
            Mnemonic::Bt => self.bit_test(),
            Mnemonic::Jmp => self.jump(),
            Mnemonic::Call => self.call(),
            Mnemonic::Ret => self.ret(),
            Mnemonic::Leave => self.leave(),
            Mnemonic::Loop | Mnemonic::Loope | Mnemonic::Loopne => {
                self.unmodeled();
                Ok(())
            }
            _ if self.insn.condition.is_some() => self.conditional(),
            _ => {
                self.unmodeled();
                Ok(())
            }
        }
    }

    /// Records whether a value read by the instruction is symbolic.
    fn observe(&mut self, value: Tracked) -> Tracked {
        if value.is_symbolic() {
            self.symbolized = true;
        }
        value
    }

    fn operand(&self, index: usize) -> Result<&'a X86Operand> {
        let insn: &'a DecodedInstruction = self.insn;
        insn.operand(index).ok_or_else(|| {
            Error::X86Error(format!(
                "Missing operand {index} for '{}' at 0x{:x}",
                insn.text, insn.address
            ))
        })
    }

    /// Width of the destination, falling back to the source for immediates-only forms.
    fn destination_bits(&self) -> Result<u32> {
        let dst = self.operand(0)?;
        Ok(dst
            .bits()
            .or_else(|| self.insn.operand(1).and_then(X86Operand::bits))
            .unwrap_or(64))
    }

    fn register(&mut self, slice: RegisterSlice) -> Tracked {
        let value = self.state.register(slice);
        self.observe(value)
    }

    fn flag(&mut self, flag: Flag) -> Tracked {
        let value = self.state.flag(flag);
        self.observe(value)
    }

    fn set_flag(&mut self, flag: Flag, value: Tracked) -> Result<()> {
        self.state.set_flag(flag, value);
        Ok(())
    }

    /// Effective address `base + index * scale + displacement`.
    fn address(&mut self, mem: &X86Memory) -> Tracked {
        let mut address = Tracked::concrete(mem.displacement.cast_unsigned(), 64);
        if let Some(base) = mem.base {
            let base = self.register(base).resize(64);
            address = base.binary(SymbolicOp::Add, &address);
        }
        if let Some(index) = mem.index {
            let scale = Tracked::concrete(u64::from(mem.scale), 64);
            let scaled = self.register(index).resize(64).binary(SymbolicOp::Mul, &scale);
            address = address.binary(SymbolicOp::Add, &scaled);
        }
        address
    }

    /// Reads operand `index` as a `bits`-wide value.
    fn read(&mut self, index: usize, bits: u32) -> Result<Tracked> {
        match self.operand(index)? {
            X86Operand::Register(slice) => Ok(self.register(*slice).resize(bits)),
            X86Operand::Immediate(value) => Ok(Tracked::concrete(value.cast_unsigned(), bits)),
            X86Operand::Memory(mem) => {
                let address = self.address(mem);
                let value = self.state.memory(address.value(), (bits / 8) as usize);
                Ok(self.observe(value))
            }
        }
    }

    /// Writes operand `index`; the value is resized to the operand's width.
    fn write(&mut self, index: usize, value: Tracked) -> Result<()> {
        match self.operand(index)? {
            X86Operand::Register(slice) => {
                self.state.set_register(*slice, value.resize(slice.bits));
                Ok(())
            }
            X86Operand::Memory(mem) => {
                let address = self.address(mem);
                let value = match mem.size {
                    0 => value,
                    size => value.resize(u32::from(size) * 8),
                };
                self.state.set_memory(address.value(), &value);
                Ok(())
            }
            X86Operand::Immediate(_) => Err(Error::X86Error(format!(
                "Write to immediate operand in '{}' at 0x{:x}",
                self.insn.text, self.insn.address
            ))),
        }
    }

    fn push(&mut self, value: &Tracked) {
        let rsp = self.register(GpRegister::Rsp.full());
        let size = Tracked::concrete(u64::from(value.bits() / 8), 64);
        let top = rsp.binary(SymbolicOp::Sub, &size);
        self.state.set_register(GpRegister::Rsp.full(), top.clone());
        self.state.set_memory(top.value(), value);
    }

    fn pop(&mut self, bits: u32) -> Tracked {
        let rsp = self.register(GpRegister::Rsp.full());
        let value = self.state.memory(rsp.value(), (bits / 8) as usize);
        let size = Tracked::concrete(u64::from(bits / 8), 64);
        self.state
            .set_register(GpRegister::Rsp.full(), rsp.binary(SymbolicOp::Add, &size));
        self.observe(value)
    }

    fn mov(&mut self) -> Result<()> {
        let bits = self.destination_bits()?;
        let value = self.read(1, bits)?;
        self.write(0, value)
    }

    fn extend(&mut self, signed: bool) -> Result<()> {
        let bits = self.destination_bits()?;
        let src_bits = self.operand(1)?.bits().unwrap_or(bits);
        let value = self.read(1, src_bits)?;
        let value = if signed {
            value.sign_extend(bits.max(src_bits))
        } else {
            value.zero_extend(bits.max(src_bits))
        };
        self.write(0, value)
    }

    fn lea(&mut self) -> Result<()> {
        let X86Operand::Memory(mem) = self.operand(1)? else {
            return Err(Error::X86Error(format!(
                "lea without memory operand at 0x{:x}",
                self.insn.address
            )));
        };
        let address = self.address(mem);
        self.write(0, address)
    }

    fn xchg(&mut self) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let b = self.read(1, bits)?;
        self.write(0, b)?;
        self.write(1, a)
    }

    fn push_operand(&mut self) -> Result<()> {
        let bits = self.operand(0)?.bits().unwrap_or(64);
        let value = self.read(0, bits)?;
        self.push(&value);
        Ok(())
    }

    fn pop_operand(&mut self) -> Result<()> {
        let bits = self.operand(0)?.bits().unwrap_or(64);
        let value = self.pop(bits);
        self.write(0, value)
    }

    fn flags_width(&self) -> u32 {
        if matches!(self.insn.mnemonic, Mnemonic::Pushf | Mnemonic::Popf) {
            16
        } else {
            64
        }
    }

    fn pushf(&mut self) -> Result<()> {
        let rflags = self.state.rflags();
        let rflags = self.observe(rflags);
        let value = rflags.resize(self.flags_width());
        self.push(&value);
        Ok(())
    }

    fn popf(&mut self) -> Result<()> {
        let bits = self.flags_width();
        let value = self.pop(bits);
        let value = if bits < 64 {
            self.state.rflags().extract(63, bits).concat(&value)
        } else {
            value
        };
        self.state.set_rflags(&value);
        Ok(())
    }

    fn lahf(&mut self) -> Result<()> {
        let rflags = self.state.rflags();
        let low = self.observe(rflags).extract(7, 0);
        self.state
            .set_register(RegisterSlice::new(GpRegister::Rax, 8, 8), low);
        Ok(())
    }

    fn sahf(&mut self) -> Result<()> {
        let ah = self.register(RegisterSlice::new(GpRegister::Rax, 8, 8));
        let merged = self.state.rflags().extract(63, 8).concat(&ah);
        let of = self.state.flag(Flag::Of);
        let df = self.state.flag(Flag::Df);
        self.state.set_rflags(&merged);
        // sahf loads SF, ZF, AF, PF, CF only
        self.state.set_flag(Flag::Of, of);
        self.state.set_flag(Flag::Df, df);
        Ok(())
    }

    fn arithmetic(&mut self, op: SymbolicOp, with_carry: bool, store: bool) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let b = self.read(1, bits)?;
        let carry = if with_carry {
            Some(self.flag(Flag::Cf))
        } else {
            None
        };

        let mut result = a.binary(op, &b);
        if let Some(cin) = &carry {
            result = result.binary(op, &cin.zero_extend(bits));
        }

        if op == SymbolicOp::Add {
            flags::set_add_flags(self.state, &a, &b, carry.as_ref(), &result);
        } else {
            flags::set_sub_flags(self.state, &a, &b, carry.as_ref(), &result);
        }

        if store {
            self.write(0, result)?;
        }
        Ok(())
    }

    /// `inc`/`dec`: like `add`/`sub` with 1, leaving CF untouched.
    fn step(&mut self, op: SymbolicOp) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let one = a.same_width(1);
        let result = a.binary(op, &one);

        let cf = self.state.flag(Flag::Cf);
        if op == SymbolicOp::Add {
            flags::set_add_flags(self.state, &a, &one, None, &result);
        } else {
            flags::set_sub_flags(self.state, &a, &one, None, &result);
        }
        self.state.set_flag(Flag::Cf, cf);

        self.write(0, result)
    }

    fn neg(&mut self) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let zero = a.same_width(0);
        let result = a.unary(SymbolicOp::Neg);
        // CF = (a != 0), which is the borrow of 0 - a
        flags::set_sub_flags(self.state, &zero, &a, None, &result);
        self.write(0, result)
    }

    fn logic(&mut self, op: SymbolicOp, store: bool) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let b = self.read(1, bits)?;
        let result = a.binary(op, &b);
        flags::set_logic_flags(self.state, &result);
        if store {
            self.write(0, result)?;
        }
        Ok(())
    }

    fn not(&mut self) -> Result<()> {
        let bits = self.destination_bits()?;
        let result = self.read(0, bits)?.unary(SymbolicOp::Not);
        self.write(0, result)
    }

    fn shift(&mut self, op: SymbolicOp) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let count = if self.insn.operands.len() > 1 {
            self.read(1, 8)?
        } else {
            Tracked::concrete(1, 8)
        };
        let count_mask = if bits == 64 { 0x3f } else { 0x1f };
        let count = count.binary(SymbolicOp::And, &Tracked::concrete(count_mask, 8));
        let result = a.binary(op, &count.resize(bits));

        #[allow(clippy::cast_possible_truncation)]
        let n = count.value() as u32;
        if n != 0 {
            let zero = Tracked::bit(false);
            let (cf, of) = match op {
                SymbolicOp::Shl => {
                    let cf = if n <= bits { a.bit_at(bits - n) } else { zero };
                    let of = result.msb().binary(SymbolicOp::Xor, &cf);
                    (cf, of)
                }
                SymbolicOp::ShrU => {
                    let cf = if n <= bits { a.bit_at(n - 1) } else { zero };
                    (cf, a.msb())
                }
                SymbolicOp::ShrS => (a.bit_at((n - 1).min(bits - 1)), zero),
                SymbolicOp::Rotl => {
                    let cf = result.bit_at(0);
                    let of = result.msb().binary(SymbolicOp::Xor, &cf);
                    (cf, of)
                }
                _ => {
                    let cf = result.msb();
                    let of = cf.binary(SymbolicOp::Xor, &result.bit_at(bits - 2));
                    (cf, of)
                }
            };
            self.state.set_flag(Flag::Cf, cf);
            self.state.set_flag(Flag::Of, of);
            if matches!(op, SymbolicOp::Shl | SymbolicOp::ShrU | SymbolicOp::ShrS) {
                self.state.set_flag(Flag::Af, Tracked::bit(false));
                flags::set_result_flags(self.state, &result);
            }
        }

        self.write(0, result)
    }

    fn bswap(&mut self) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let mut swapped = a.extract(7, 0);
        for byte in 1..bits / 8 {
            swapped = swapped.concat(&a.extract(byte * 8 + 7, byte * 8));
        }
        self.write(0, swapped)
    }

    /// `cbw`/`cwde`/`cdqe`: sign-extends the low `from` bits of the accumulator.
    fn widen_accumulator(&mut self, from: u32) -> Result<()> {
        let value = self.register(GpRegister::Rax.low(from));
        self.state
            .set_register(GpRegister::Rax.low(from * 2), value.sign_extend(from * 2));
        Ok(())
    }

    /// `cwd`/`cdq`/`cqo`: fills the data register with the accumulator's sign.
    fn sign_fill_data(&mut self, bits: u32) -> Result<()> {
        let value = self.register(GpRegister::Rax.low(bits));
        let fill = value.binary(SymbolicOp::ShrS, &value.same_width(u64::from(bits - 1)));
        self.state.set_register(GpRegister::Rdx.low(bits), fill);
        Ok(())
    }

    /// Two- and three-operand `imul`.
    fn imul(&mut self) -> Result<()> {
        let bits = self.destination_bits()?;
        let (a, b) = if self.insn.operands.len() > 2 {
            (self.read(1, bits)?, self.read(2, bits)?)
        } else {
            (self.read(0, bits)?, self.read(1, bits)?)
        };
        let result = a.binary(SymbolicOp::Mul, &b);

        let overflow = if bits <= 32 {
            let wide = a
                .sign_extend(bits * 2)
                .binary(SymbolicOp::Mul, &b.sign_extend(bits * 2));
            wide.binary(SymbolicOp::Ne, &result.sign_extend(bits * 2))
        } else {
            let full = i128::from(sign_extend(a.value(), 64)) * i128::from(sign_extend(b.value(), 64));
            Tracked::bit(full != i128::from(sign_extend(result.value(), 64)))
        };
        self.set_multiply_flags(&overflow, &result);
        self.write(0, result)
    }

    /// One-operand `mul`/`imul` into `dx:ax`-style register pairs.
    #[allow(clippy::cast_possible_truncation)]
    fn widening_multiply(&mut self, signed: bool) -> Result<()> {
        let bits = self.destination_bits()?;
        let src = self.read(0, bits)?;
        let acc = self.register(GpRegister::Rax.low(bits));

        let (low, high, overflow) = if bits <= 32 {
            let widen = |v: &Tracked| {
                if signed {
                    v.sign_extend(bits * 2)
                } else {
                    v.zero_extend(bits * 2)
                }
            };
            let product = widen(&acc).binary(SymbolicOp::Mul, &widen(&src));
            let low = product.extract(bits - 1, 0);
            let high = product.extract(bits * 2 - 1, bits);
            let overflow = if signed {
                product.binary(SymbolicOp::Ne, &low.sign_extend(bits * 2))
            } else {
                high.binary(SymbolicOp::Ne, &high.same_width(0))
            };
            (low, high, overflow)
        } else {
            // 128-bit products are only tracked concretely
            let (lo, hi) = if signed {
                let full = i128::from(sign_extend(acc.value(), 64))
                    * i128::from(sign_extend(src.value(), 64));
                let full = full.cast_unsigned();
                (full as u64, (full >> 64) as u64)
            } else {
                let full = u128::from(acc.value()) * u128::from(src.value());
                (full as u64, (full >> 64) as u64)
            };
            let overflow = if signed {
                hi != (sign_extend(lo, 64) >> 63).cast_unsigned()
            } else {
                hi != 0
            };
            (
                Tracked::concrete(lo, 64),
                Tracked::concrete(hi, 64),
                Tracked::bit(overflow),
            )
        };

        if bits == 8 {
            let product = high.concat(&low);
            self.state.set_register(GpRegister::Rax.low(16), product);
        } else {
            self.state.set_register(GpRegister::Rax.low(bits), low.clone());
            self.state.set_register(GpRegister::Rdx.low(bits), high);
        }
        self.set_multiply_flags(&overflow, &low);
        Ok(())
    }

    fn set_multiply_flags(&mut self, overflow: &Tracked, result: &Tracked) {
        self.state.set_flag(Flag::Cf, overflow.clone());
        self.state.set_flag(Flag::Of, overflow.clone());
        self.state.set_flag(Flag::Af, Tracked::bit(false));
        flags::set_result_flags(self.state, result);
    }

    fn bit_test(&mut self) -> Result<()> {
        let bits = self.destination_bits()?;
        let a = self.read(0, bits)?;
        let offset = self.read(1, bits)?;
        #[allow(clippy::cast_possible_truncation)]
        let index = (offset.value() % u64::from(bits)) as u32;
        self.state.set_flag(Flag::Cf, a.bit_at(index));
        Ok(())
    }

    /// `jcc`, `setcc`, and `cmovcc`.
    fn conditional(&mut self) -> Result<()> {
        let Some(cond) = self.insn.condition else {
            return Ok(());
        };
        for flag in flags::condition_flags(cond) {
            self.flag(*flag);
        }
        let taken = flags::condition(self.state, cond);

        let insn = self.insn;
        match insn.operands.as_slice() {
            // jcc
            [X86Operand::Immediate(_)] => Ok(()),
            // setcc
            [_] => self.write(0, taken.zero_extend(8)),
            // cmovcc
            [_, _] => {
                let bits = self.destination_bits()?;
                let dst = self.read(0, bits)?;
                let src = self.read(1, bits)?;
                self.write(0, Tracked::select(&taken, &src, &dst))
            }
            _ => {
                self.unmodeled();
                Ok(())
            }
        }
    }

    fn jump(&mut self) -> Result<()> {
        if !matches!(self.operand(0)?, X86Operand::Immediate(_)) {
            self.read(0, 64)?;
        }
        Ok(())
    }

    fn call(&mut self) -> Result<()> {
        self.jump()?;
        let ret = Tracked::concrete(self.insn.next_address(), 64);
        self.push(&ret);
        Ok(())
    }

    fn ret(&mut self) -> Result<()> {
        self.pop(64);
        if let Some(X86Operand::Immediate(extra)) = self.insn.operand(0) {
            let rsp = self.state.register(GpRegister::Rsp.full());
            let extra = Tracked::concrete(extra.cast_unsigned(), 64);
            self.state
                .set_register(GpRegister::Rsp.full(), rsp.binary(SymbolicOp::Add, &extra));
        }
        Ok(())
    }

    fn leave(&mut self) -> Result<()> {
        let rbp = self.register(GpRegister::Rbp.full());
        self.state.set_register(GpRegister::Rsp.full(), rbp);
        let saved = self.pop(64);
        self.state.set_register(GpRegister::Rbp.full(), saved);
        Ok(())
    }

    /// Conservative handling: written registers and flags keep their concrete value and
    /// drop their formulas.
    fn unmodeled(&mut self) {
        log::debug!(
            "No semantics for '{}' at 0x{:x}, concretizing its outputs",
            self.insn.text,
            self.insn.address
        );
        for reg in &self.insn.written_registers {
            let value = self.state.register(reg.full()).value();
            self.state
                .set_register(reg.full(), Tracked::concrete(value, 64));
        }
        for flag in &self.insn.written_flags {
            let value = self.state.flag(*flag).value();
            self.state.set_flag(*flag, Tracked::concrete(value, 1));
        }
    }
}
