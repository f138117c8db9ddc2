//! Typed trace events.

use std::fmt;

use crate::engine::RegisterFile;

/// One line of an execution trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Snapshot of all 16 general-purpose registers, in canonical order.
    RegisterSync(RegisterFile<u64>),
    /// Observed memory content.
    MemorySync {
        /// Start address.
        address: u64,
        /// Number of bytes, 1..=8.
        size: usize,
        /// Little-endian value of the bytes.
        value: u64,
    },
    /// An executed instruction.
    Instruction {
        /// Address the instruction executed at.
        address: u64,
        /// Raw instruction bytes.
        bytes: Vec<u8>,
    },
}

impl TraceEvent {
    /// The trace tag of this event kind (`r`, `mr`, `i`).
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            TraceEvent::RegisterSync(_) => "r",
            TraceEvent::MemorySync { .. } => "mr",
            TraceEvent::Instruction { .. } => "i",
        }
    }
}

/// Renders the event in trace-file syntax.
impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::RegisterSync(values) => {
                f.write_str("r")?;
                for (_, value) in values.iter() {
                    write!(f, ":{value:x}")?;
                }
                Ok(())
            }
            TraceEvent::MemorySync {
                address,
                size,
                value,
            } => write!(f, "mr:{address:x}:{size}:{value:x}"),
            TraceEvent::Instruction { address, bytes } => {
                write!(f, "i:{address:x}:{}:", bytes.len())?;
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}
