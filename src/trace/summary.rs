//! Aggregate statistics over a whole trace.

use std::{collections::BTreeSet, fmt, io::BufRead, path::Path};

use crate::{
    trace::{TraceEvent, TraceReader},
    Result,
};

/// Per-kind event counts and the instruction address footprint of a trace.
///
/// Used to pick a virtual-branch target address before a dual-trace run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceSummary {
    /// Number of register snapshots.
    pub register_syncs: usize,
    /// Number of memory observations.
    pub memory_syncs: usize,
    /// Number of executed instructions.
    pub instructions: usize,
    /// Distinct instruction addresses.
    pub addresses: BTreeSet<u64>,
}

impl TraceSummary {
    /// Summarizes a trace file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be read, or
    /// [`crate::Error::TraceFormat`] for the first malformed line.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(TraceReader::from_path(path)?)
    }

    /// Summarizes the events of a reader.
    ///
    /// # Errors
    ///
    /// Propagates the first read or parse error.
    pub fn from_reader<R: BufRead>(reader: TraceReader<R>) -> Result<Self> {
        let mut summary = Self::default();
        for event in reader {
            summary.record(&event?);
        }
        Ok(summary)
    }

    /// Adds one event.
    pub fn record(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::RegisterSync(_) => self.register_syncs += 1,
            TraceEvent::MemorySync { .. } => self.memory_syncs += 1,
            TraceEvent::Instruction { address, .. } => {
                self.instructions += 1;
                self.addresses.insert(*address);
            }
        }
    }

    /// Lowest and highest instruction address.
    #[must_use]
    pub fn address_range(&self) -> Option<(u64, u64)> {
        Some((*self.addresses.first()?, *self.addresses.last()?))
    }
}

impl fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instructions ({} distinct), {} register syncs, {} memory syncs",
            self.instructions,
            self.addresses.len(),
            self.register_syncs,
            self.memory_syncs
        )?;
        if let Some((low, high)) = self.address_range() {
            write!(f, ", 0x{low:x}..=0x{high:x}")?;
        }
        Ok(())
    }
}
