// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # vmscope
//!
//! Trace-driven devirtualization of code protected by x86-64 virtualizing obfuscators.
//!
//! A virtualizer replaces a function's machine code with bytecode for a private virtual
//! machine. `vmscope` does not reverse the VM. It replays an execution trace of the protected
//! function through a symbolic execution engine, with the function's two inputs (`rdi` and
//! `rsi`) turned into symbolic variables, and reads the formula left in `eax` at the end.
//! Everything the VM did to compute that value collapses into one bit-vector formula, which is
//! then simplified, synthesized into a smaller equivalent, and lifted to LLVM IR.
//!
//! Branches inside the virtualized function are also hidden by the VM: they become data flow
//! on a status flag. Given a second trace that took the other side of such a branch, `vmscope`
//! captures the flag's formula as a predicate and merges both paths into one
//! `ite(predicate, path2, path1)` formula.
//!
//! ## Features
//!
//! - **Trace input** - Lazy parsing of register snapshots, memory observations and executed
//!   instructions
//! - **Symbolic x86-64 engine** - iced-x86 decoding, paired concrete and symbolic state
//! - **Z3 solving** - Satisfiability checks and models through the `z3` crate
//! - **Virtual-branch detection** - Pluggable heuristics on the first replay, predicate
//!   capture on the second
//! - **Output** - Unrolled and synthesized formulas, LLVM IR text
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vmscope::prelude::*;
//!
//! let config = DevirtConfig::single("add.trace", SymbolWidth::Dword);
//! let report = Devirtualizer::new().run(&config)?;
//! println!("Return value: {:#x}", report.return_value);
//! println!("{}", report.ir);
//! # Ok::<(), vmscope::Error>(())
//! ```
//!
//! ### Merging two paths
//!
//! ```rust,no_run
//! use vmscope::{BranchTarget, DevirtConfig, Devirtualizer, SymbolWidth};
//! use vmscope::engine::Flag;
//!
//! let target = BranchTarget { address: 0x1400_1234, flag: Flag::Cf };
//! let config = DevirtConfig::dual("path1.trace", "path2.trace", SymbolWidth::Qword, target);
//! let report = Devirtualizer::new().run(&config)?;
//! println!("{report}");
//! # Ok::<(), vmscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`trace`] - Trace events, reader and summary
//! - [`engine`] - The [`engine::SymbolicEngine`] abstraction and its x86-64 implementation
//! - [`devirt`] - Synchronization, symbolization, replay, detection, merging and reporting
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Trace format
//!
//! One event per line, hexadecimal numbers with or without `0x`:
//!
//! ```text
//! r:<rax>:<rbx>:<rcx>:<rdx>:<rdi>:<rsi>:<rbp>:<rsp>:<r8>:...:<r15>
//! mr:<address>:<size>:<value>
//! i:<address>:<size>:<bytes>
//! ```
//!
//! Any other line is ignored.
//!
//! ## Logging
//!
//! The library logs through the [`log`] facade. Pipeline milestones (instruction counts,
//! detected virtual branches) are logged at `info`, state synchronization and unmodeled
//! instructions at `debug`.
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo bench --bench replay
//! cargo +nightly fuzz run trace_reader --release
//! ```

pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use vmscope::prelude::*;
///
/// let summary = TraceSummary::from_path("add.trace")?;
/// println!("{summary}");
/// # Ok::<(), vmscope::Error>(())
/// ```
pub mod prelude;

/// Execution trace events and parsing.
///
/// # Key Types
///
/// - [`trace::TraceEvent`] - One parsed trace line
/// - [`trace::TraceReader`] - Iterator over the events of a trace
/// - [`trace::TraceSummary`] - Event counts and instruction footprint
///
/// # Examples
///
/// ```rust,no_run
/// use vmscope::trace::{TraceEvent, TraceReader};
///
/// for event in TraceReader::from_path("add.trace")? {
///     if let TraceEvent::Instruction { address, bytes } = event? {
///         println!("{address:#x}: {} bytes", bytes.len());
///     }
/// }
/// # Ok::<(), vmscope::Error>(())
/// ```
pub mod trace;

/// Symbolic execution engine.
///
/// # Key Types
///
/// - [`engine::SymbolicEngine`] - Operations the pipeline needs from an execution context
/// - [`engine::X86Engine`] - x86-64 implementation
/// - [`engine::SymbolicExpr`] - Shared bit-vector formula
/// - [`engine::Z3Solver`] - Satisfiability checks
pub mod engine;

/// The devirtualization pipeline.
///
/// See [`devirt::Devirtualizer`] for the end-to-end driver.
pub mod devirt;

/// `vmscope` Result type.
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use vmscope::{DevirtConfig, Devirtualizer, Result, SymbolWidth};
///
/// fn return_value(path: &str) -> Result<u64> {
///     let config = DevirtConfig::single(path, SymbolWidth::Qword);
///     Ok(Devirtualizer::new().run(&config)?.return_value)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `vmscope` Error type.
pub use error::Error;

/// Main entry point for an analysis run.
pub use devirt::{
    BranchTarget, DevirtConfig, DevirtOptions, DevirtReport, Devirtualizer, SymbolWidth,
};
