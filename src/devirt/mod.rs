//! Trace-driven devirtualization pipeline.
//!
//! A run replays one or two execution traces of a virtualized function through a
//! [`SymbolicEngine`](crate::engine::SymbolicEngine), turning the function's two inputs into
//! symbolic variables, and reports the resulting return formula.
//!
//! # Pipeline
//!
//! 1. [`DevirtConfig`] validation, before any trace is opened
//! 2. First replay ([`replay`]): snapshots are synchronized ([`sync`]), the inputs are
//!    symbolized ([`symbolize`]) and every instruction is executed; heuristics
//!    ([`detect`]) report candidate virtual branches
//! 3. Optional second replay over a trace that took the other side of the hidden branch;
//!    the inputs are reseeded and the branch predicate is captured at the configured target
//! 4. [`merge`] combines both return formulas under the predicate
//! 5. [`DevirtReport`] unrolls, synthesizes, evaluates and lifts the result
//!
//! [`Devirtualizer`] drives all steps.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod merge;
pub mod replay;
pub mod report;
pub mod symbolize;
pub mod sync;

pub use analysis::Devirtualizer;
pub use config::{BranchTarget, DevirtConfig, DevirtOptions, ReplayPhase, SymbolWidth};
pub use detect::{
    AuxCarryViaRegisterCompare, BranchCandidate, BranchDetector, BranchHeuristic,
    BranchPredicate, CarryViaFlagsRestore, DetectionResult,
};
pub use merge::merge;
pub use replay::{replay, ReplayOutcome, ReplayStats};
pub use report::DevirtReport;
pub use symbolize::{symbolize_inputs, Inputs};
pub use sync::{sync_memory, sync_registers};
