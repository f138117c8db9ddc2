//! x86-64 symbolic execution engine.
//!
//! [`X86Engine`] implements [`SymbolicEngine`] for 64-bit x86 code: instructions are decoded
//! with iced-x86, executed against a [`MachineState`] that tracks concrete values and
//! formulas side by side, and formulas are decided through [`Z3Solver`].
//!
//! # Architecture
//!
//! - [`types`] - Simplified instruction and operand representation
//! - [`decoder`] - iced-x86 decoding into [`DecodedInstruction`]s
//! - [`state`] - Registers, flags, and memory as [`Tracked`] values
//! - [`flags`] - Status flag formulas
//! - [`semantics`] - Per-instruction execution
//!
//! # Example
//!
//! ```rust,no_run
//! use vmscope::engine::{GpRegister, SymbolicEngine, X86Engine};
//!
//! let mut engine = X86Engine::new();
//! engine.set_concrete_register(GpRegister::Rdi, 5);
//! let x = engine.symbolize_register(GpRegister::Rdi.low(32), "x")?;
//!
//! // lea eax, [rdi+rdi]
//! engine.process(0x1000, &[0x8d, 0x04, 0x3f])?;
//! let eax = engine.register_expr(GpRegister::Rax.low(32));
//! assert_eq!(engine.evaluate(&eax)?, 10);
//! assert_eq!(eax.variables().len(), 1);
//! # let _ = x;
//! # Ok::<(), vmscope::Error>(())
//! ```

pub mod decoder;
pub mod flags;
pub mod semantics;
pub mod state;
pub mod types;

pub use decoder::decode_single;
pub use state::{MachineState, Rflags, Tracked};
pub use types::{DecodedInstruction, X86Condition, X86Memory, X86Operand};

use crate::{
    engine::{
        expr::SymbolicExpr,
        lift,
        ops::mask,
        registers::{Flag, GpRegister, RegisterSlice},
        simplify,
        solver::{SolverOutcome, Z3Solver},
        synth::Synthesizer,
        ProcessedInstruction, SymbolicEngine, SymbolicVariable,
    },
    Error, Result,
};

/// Symbolic execution engine for x86-64.
#[derive(Debug, Clone, Default)]
pub struct X86Engine {
    state: MachineState,
    variables: Vec<SymbolicVariable>,
    solver: Z3Solver,
    synthesizer: Synthesizer,
}

impl X86Engine {
    /// Creates an engine with zeroed state and no variables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The machine state.
    #[must_use]
    pub fn state(&self) -> &MachineState {
        &self.state
    }
}

impl SymbolicEngine for X86Engine {
    fn concrete_register(&self, reg: GpRegister) -> u64 {
        self.state.register(reg.full()).value()
    }

    fn set_concrete_register(&mut self, reg: GpRegister, value: u64) {
        self.state
            .set_register(reg.full(), Tracked::concrete(value, 64));
    }

    fn concrete_memory(&self, address: u64, size: usize) -> u64 {
        self.state.memory(address, size).value()
    }

    fn set_concrete_memory(&mut self, address: u64, size: usize, value: u64) {
        #[allow(clippy::cast_possible_truncation)]
        let bits = (size * 8) as u32;
        self.state
            .set_memory(address, &Tracked::concrete(value, bits));
    }

    fn reset_concrete_state(&mut self) {
        self.state.reset();
    }

    fn process(&mut self, address: u64, bytes: &[u8]) -> Result<ProcessedInstruction> {
        let insn = decode_single(bytes, address)?;
        let symbolized = semantics::execute(&mut self.state, &insn)?;

        Ok(ProcessedInstruction {
            address,
            length: insn.length,
            text: insn.text,
            class: insn.class,
            symbolized,
        })
    }

    fn variables(&self) -> &[SymbolicVariable] {
        &self.variables
    }

    fn symbolize_register(&mut self, slice: RegisterSlice, alias: &str) -> Result<SymbolicVariable> {
        if !matches!(slice.bits, 8 | 16 | 32 | 64) || slice.high_bit() > 63 {
            return Err(Error::Engine(format!("Cannot symbolize register slice {slice}")));
        }

        let value = self.state.register(slice).value();
        let variable = SymbolicVariable {
            id: self.variables.len(),
            bits: slice.bits,
            alias: alias.to_string(),
            value,
        };
        self.state
            .merge_register(slice, Tracked::symbolic(variable.expr(), value));
        log::debug!("Symbolized {slice} as {variable} = 0x{value:x}");

        self.variables.push(variable.clone());
        Ok(variable)
    }

    fn set_variable_value(&mut self, id: usize, value: u64) -> Result<()> {
        let variable = self
            .variables
            .get_mut(id)
            .ok_or(Error::UnboundVariable(id))?;
        variable.value = value & mask(variable.bits);
        Ok(())
    }

    fn assign_register_expr(&mut self, reg: GpRegister, expr: SymbolicExpr) -> Result<()> {
        if expr.bits() != 64 {
            return Err(Error::Engine(format!(
                "Register {reg} needs a 64-bit formula, got {} bits",
                expr.bits()
            )));
        }
        let value = self.evaluate(&expr)?;
        self.state
            .set_register(reg.full(), Tracked::symbolic(expr, value));
        Ok(())
    }

    fn register_expr(&self, slice: RegisterSlice) -> SymbolicExpr {
        self.state.register(slice).expr()
    }

    fn flag_expr(&self, flag: Flag) -> SymbolicExpr {
        self.state.flag(flag).expr()
    }

    fn evaluate(&self, expr: &SymbolicExpr) -> Result<u64> {
        expr.evaluate_with(|id| self.variables.get(id).map(|variable| variable.value))
    }

    fn solve(&self, constraint: &SymbolicExpr) -> Result<SolverOutcome> {
        if constraint.bits() != 1 {
            return Err(Error::Engine(format!(
                "Constraints must be 1 bit wide, got {} bits",
                constraint.bits()
            )));
        }
        Ok(self.solver.check(constraint))
    }

    fn unroll(&self, expr: &SymbolicExpr) -> SymbolicExpr {
        simplify::unroll(expr)
    }

    fn synthesize(&self, expr: &SymbolicExpr) -> Option<SymbolicExpr> {
        self.synthesizer.synthesize(expr)
    }

    fn lift(&self, expr: &SymbolicExpr) -> Result<String> {
        lift::lift_to_llvm(expr)
    }
}
