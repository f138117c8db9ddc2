//! Single-pass trace replay.

use crate::{
    devirt::{
        config::SymbolWidth,
        detect::BranchDetector,
        symbolize::{symbolize_inputs, Inputs},
        sync::{sync_memory, sync_registers},
    },
    engine::{GpRegister, SymbolicEngine, SymbolicExpr},
    trace::TraceEvent,
    Result,
};

/// Counters collected during one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Instruction events executed.
    pub instructions: usize,
    /// Executed instructions that read symbolic data.
    pub symbolized_instructions: usize,
    /// Registers corrected by snapshots.
    pub register_writes: usize,
    /// Memory ranges corrected by observations.
    pub memory_writes: usize,
}

/// Result of replaying one trace.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// Formula bound to `eax` after the last event.
    pub return_expr: SymbolicExpr,
    /// The symbolic inputs, when the trace contained at least one instruction.
    pub inputs: Option<Inputs>,
    /// Replay counters.
    pub stats: ReplayStats,
}

/// Replays `events` against `engine`.
///
/// Sync events correct concrete state; before the first instruction the inputs are
/// symbolized (or reseeded); every instruction is executed and then shown to `detector`.
///
/// # Arguments
///
/// * `engine` - The execution context, reused across replays
/// * `events` - Trace events in file order
/// * `width` - Width of the symbolic inputs
/// * `detector` - Observer of every processed instruction
///
/// # Errors
///
/// Stops at the first trace, decoding, or solver error.
pub fn replay<E, I>(
    engine: &mut E,
    events: I,
    width: SymbolWidth,
    detector: &mut BranchDetector,
) -> Result<ReplayOutcome>
where
    E: SymbolicEngine,
    I: IntoIterator<Item = Result<TraceEvent>>,
{
    let mut stats = ReplayStats::default();
    let mut inputs: Option<Inputs> = None;

    for event in events {
        match event? {
            TraceEvent::RegisterSync(values) => {
                stats.register_writes += sync_registers(engine, &values)?;
            }
            TraceEvent::MemorySync {
                address,
                size,
                value,
            } => {
                stats.memory_writes += sync_memory(engine, address, size, value);
            }
            TraceEvent::Instruction { address, bytes } => {
                if inputs.is_none() {
                    inputs = Some(symbolize_inputs(engine, width)?);
                }

                let processed = engine.process(address, &bytes)?;
                stats.instructions += 1;
                if processed.symbolized {
                    stats.symbolized_instructions += 1;
                }

                detector.observe(&processed, &*engine)?;
            }
        }
    }

    log::info!("Instruction executed: {}", stats.instructions);
    log::debug!(
        "Replay stats: {} symbolized, {} register syncs, {} memory syncs",
        stats.symbolized_instructions,
        stats.register_writes,
        stats.memory_writes
    );

    Ok(ReplayOutcome {
        return_expr: engine.register_expr(GpRegister::Rax.low(32)),
        inputs,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        devirt::config::ReplayPhase,
        engine::{RegisterFile, X86Engine},
        trace::TraceReader,
        Error,
    };

    fn run(text: &str, width: SymbolWidth) -> Result<ReplayOutcome> {
        let mut engine = X86Engine::new();
        let mut detector = BranchDetector::new(ReplayPhase::First, None);
        replay(
            &mut engine,
            TraceReader::new(text.as_bytes()),
            width,
            &mut detector,
        )
    }

    #[test]
    fn nop_returns_concrete_accumulator() -> Result<()> {
        let text = "r:2a:0:0:0:0:0:0:0:0:0:0:0:0:0:0:0\ni:1000:1:90\n";
        let outcome = run(text, SymbolWidth::Qword)?;
        assert_eq!(outcome.return_expr.as_constant(), Some(0x2a));
        assert_eq!(outcome.stats.instructions, 1);
        assert_eq!(outcome.stats.register_writes, 1);
        assert!(outcome.inputs.is_some_and(|inputs| inputs.created));
        Ok(())
    }

    #[test]
    fn symbolic_return_value() -> Result<()> {
        // mov eax, edi; add eax, esi
        let text = "r:0:0:0:0:5:3:0:0:0:0:0:0:0:0:0:0\n\
                    i:1000:2:89f8\n\
                    i:1002:2:01f0\n";
        let outcome = run(text, SymbolWidth::Dword)?;
        let vars = outcome.return_expr.variables();
        assert_eq!(vars.len(), 2);
        assert_eq!(outcome.stats.symbolized_instructions, 2);
        Ok(())
    }

    #[test]
    fn instruction_free_trace_has_no_inputs() -> Result<()> {
        let outcome = run("mr:10:1:1\n", SymbolWidth::Byte)?;
        assert!(outcome.inputs.is_none());
        assert_eq!(outcome.stats.memory_writes, 1);
        assert_eq!(outcome.stats.instructions, 0);
        Ok(())
    }

    #[test]
    fn errors_stop_the_replay() {
        assert!(matches!(
            run("i:1000:1:90\nr:1\n", SymbolWidth::Byte),
            Err(Error::TraceFormat { line: 2, .. })
        ));
        assert!(matches!(
            run("i:1000:1:0f\n", SymbolWidth::Byte),
            Err(Error::X86Error(_))
        ));
    }

    #[test]
    fn sync_before_symbolization_seeds_inputs() -> Result<()> {
        let mut engine = X86Engine::new();
        let mut values = [0u64; 16];
        values[GpRegister::Rdi.index()] = 0x11;
        sync_registers(&mut engine, &RegisterFile::from_array(values))?;
        let mut detector = BranchDetector::new(ReplayPhase::First, None);
        let outcome = replay(
            &mut engine,
            vec![Ok(TraceEvent::Instruction {
                address: 0,
                bytes: vec![0x90],
            })],
            SymbolWidth::Byte,
            &mut detector,
        )?;
        assert_eq!(outcome.inputs.map(|inputs| inputs.x.value), Some(0x11));
        Ok(())
    }
}
