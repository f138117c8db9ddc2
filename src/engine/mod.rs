//! Symbolic execution engine.
//!
//! The devirtualization pipeline in [`crate::devirt`] never touches instruction semantics or
//! the solver directly. It drives an execution context through the [`SymbolicEngine`] trait,
//! whose x86-64 implementation is [`X86Engine`].
//!
//! # Architecture
//!
//! - [`expr`] - Shared bit-vector formula DAG with constant folding
//! - [`ops`] - Operations and their concrete semantics
//! - [`registers`] - Closed register/flag enumerations and the fixed register file
//! - [`solver`] - Z3 bridge returning [`SolverOutcome`]s with [`Model`]s
//! - [`simplify`] - Bottom-up rebuilding (`unroll`)
//! - [`synth`] - Oracle-guided synthesis of smaller equivalent formulas
//! - [`lift`] - LLVM IR rendering
//! - [`x86`] - The x86-64 engine: decoder, machine state, instruction semantics

pub mod expr;
pub mod lift;
pub mod ops;
pub mod registers;
pub mod simplify;
pub mod solver;
pub mod synth;
pub mod x86;

use std::fmt;

pub use expr::{ExprKind, SymbolicExpr};
pub use ops::SymbolicOp;
pub use registers::{Flag, GpRegister, RegisterFile, RegisterSlice};
pub use solver::{Model, SolverOutcome, Z3Solver};
pub use synth::Synthesizer;
pub use x86::X86Engine;

use crate::Result;

/// A symbolic input created by [`SymbolicEngine::symbolize_register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicVariable {
    /// Dense identifier; formulas reference the variable as `SymVar_<id>`.
    pub id: usize,
    /// Width in bits.
    pub bits: u32,
    /// Human-readable alias (`x`, `y`).
    pub alias: String,
    /// Current concrete seed.
    pub value: u64,
}

impl SymbolicVariable {
    /// Name used in formulas, models, and lifted IR.
    #[must_use]
    pub fn name(&self) -> String {
        format!("SymVar_{}", self.id)
    }

    /// A formula referencing this variable.
    #[must_use]
    pub fn expr(&self) -> SymbolicExpr {
        SymbolicExpr::variable(self.id, self.bits)
    }
}

impl fmt::Display for SymbolicVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} bits)", self.name(), self.alias, self.bits)
    }
}

/// Engine-neutral classification of a processed instruction, used by branch heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionClass {
    /// Restores status flags from data (`popf`/`popfq`).
    FlagsRestore,
    /// Compares two registers (`cmp reg, reg`).
    RegisterCompare,
    /// Anything else.
    Other,
}

/// An instruction after the engine executed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedInstruction {
    /// Address the instruction was executed at.
    pub address: u64,
    /// Encoded length in bytes.
    pub length: usize,
    /// Disassembly text.
    pub text: String,
    /// Classification for branch heuristics.
    pub class: InstructionClass,
    /// Whether any value the instruction read was symbolic.
    pub symbolized: bool,
}

impl fmt::Display for ProcessedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.text)
    }
}

/// Operations the devirtualization pipeline needs from an execution context.
///
/// An implementation owns concrete state (registers, flags, memory), the symbolic formulas
/// bound to that state, and the symbolic variables. Formulas are plain [`SymbolicExpr`]
/// values, so callers build equalities, extensions, and `ite`s with its constructors.
pub trait SymbolicEngine {
    /// Concrete value of a full register.
    fn concrete_register(&self, reg: GpRegister) -> u64;

    /// Overwrites a full register with a concrete value, dropping its formula.
    fn set_concrete_register(&mut self, reg: GpRegister, value: u64);

    /// Concrete little-endian value of `size` bytes at `address` (`size` in 1..=8).
    fn concrete_memory(&self, address: u64, size: usize) -> u64;

    /// Overwrites `size` bytes at `address`, dropping their formulas.
    fn set_concrete_memory(&mut self, address: u64, size: usize, value: u64);

    /// Clears concrete registers, flags, memory, and every formula bound to them.
    ///
    /// Symbolic variables survive, so formulas built before the reset stay meaningful.
    fn reset_concrete_state(&mut self);

    /// Decodes and executes one instruction, updating concrete and symbolic state.
    ///
    /// # Errors
    ///
    /// Fails if the bytes do not decode to a valid instruction.
    fn process(&mut self, address: u64, bytes: &[u8]) -> Result<ProcessedInstruction>;

    /// Symbolic variables created so far, ordered by id.
    fn variables(&self) -> &[SymbolicVariable];

    /// Binds a fresh variable to a register slice, seeded with the slice's concrete value.
    ///
    /// # Errors
    ///
    /// Fails for slices the engine cannot symbolize.
    fn symbolize_register(&mut self, slice: RegisterSlice, alias: &str) -> Result<SymbolicVariable>;

    /// Changes the concrete seed of variable `id`.
    ///
    /// # Errors
    ///
    /// Fails if no variable `id` exists.
    fn set_variable_value(&mut self, id: usize, value: u64) -> Result<()>;

    /// Binds a 64-bit formula to a full register; its concrete value becomes the formula's
    /// evaluation.
    ///
    /// # Errors
    ///
    /// Fails if the formula is not 64 bits wide or cannot be evaluated.
    fn assign_register_expr(&mut self, reg: GpRegister, expr: SymbolicExpr) -> Result<()>;

    /// Formula currently bound to a register slice (a constant when concrete).
    fn register_expr(&self, slice: RegisterSlice) -> SymbolicExpr;

    /// 1-bit formula currently bound to a flag.
    fn flag_expr(&self, flag: Flag) -> SymbolicExpr;

    /// Evaluates a formula under the current variable seeds.
    ///
    /// # Errors
    ///
    /// Fails if the formula references an unknown variable.
    fn evaluate(&self, expr: &SymbolicExpr) -> Result<u64>;

    /// Decides a 1-bit constraint.
    ///
    /// # Errors
    ///
    /// Fails if the constraint is not 1 bit wide.
    fn solve(&self, constraint: &SymbolicExpr) -> Result<SolverOutcome>;

    /// Flattens and re-folds a formula.
    fn unroll(&self, expr: &SymbolicExpr) -> SymbolicExpr;

    /// Best-effort search for a smaller equivalent formula.
    fn synthesize(&self, expr: &SymbolicExpr) -> Option<SymbolicExpr>;

    /// Renders a formula as an LLVM IR module.
    ///
    /// # Errors
    ///
    /// Fails if the formula cannot be lifted.
    fn lift(&self, expr: &SymbolicExpr) -> Result<String>;
}
