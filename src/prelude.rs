//! # vmscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the vmscope library.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all vmscope operations
pub use crate::Error;

/// The result type used throughout vmscope
pub use crate::Result;

// ================================================================================================
// Configuration and Entry Points
// ================================================================================================

/// Analysis configuration
pub use crate::devirt::{BranchTarget, DevirtConfig, DevirtOptions, SymbolWidth};

/// End-to-end driver and its output
pub use crate::devirt::{DevirtReport, Devirtualizer};

// ================================================================================================
// Traces
// ================================================================================================

/// Trace parsing
pub use crate::trace::{TraceEvent, TraceReader, TraceSummary};

// ================================================================================================
// Symbolic Engine
// ================================================================================================

/// Engine abstraction and the x86-64 implementation
pub use crate::engine::{
    Flag, GpRegister, Model, SolverOutcome, SymbolicEngine, SymbolicExpr, X86Engine,
};

// ================================================================================================
// Virtual Branches
// ================================================================================================

/// Detection results and pluggable heuristics
pub use crate::devirt::{BranchCandidate, BranchHeuristic, BranchPredicate, DetectionResult};
