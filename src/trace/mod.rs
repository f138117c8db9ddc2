//! Execution trace input.
//!
//! Traces are recorded by an external instrumentation tool while the protected function runs
//! natively. They interleave register snapshots, memory observations, and the executed
//! instructions, and are consumed exactly once, front to back, by a replay.
//!
//! - [`TraceEvent`] - One typed trace line
//! - [`TraceReader`] - Lazy, fused parser over any buffered input
//! - [`TraceSummary`] - Event counts and instruction footprint of a trace

mod event;
mod reader;
mod summary;

pub use event::TraceEvent;
pub use reader::TraceReader;
pub use summary::TraceSummary;
