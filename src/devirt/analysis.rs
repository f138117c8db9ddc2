//! End-to-end analysis driver.

use std::path::Path;

use crate::{
    devirt::{
        config::{BranchTarget, DevirtConfig, ReplayPhase, SymbolWidth},
        detect::{BranchDetector, DetectionResult},
        merge::merge,
        replay::{replay, ReplayOutcome},
        report::DevirtReport,
    },
    engine::{SymbolicEngine, X86Engine},
    trace::TraceReader,
    Result,
};

/// Runs the devirtualization pipeline over one or two traces.
///
/// The engine is reused across both replays, so the inputs created on the first trace are
/// the ones reseeded on the second and both return formulas share variables.
///
/// # Examples
///
/// ```rust,no_run
/// use vmscope::{DevirtConfig, Devirtualizer, SymbolWidth};
///
/// let config = DevirtConfig::single("add.trace", SymbolWidth::Dword);
/// let report = Devirtualizer::new().run(&config)?;
/// println!("{report}");
/// # Ok::<(), vmscope::Error>(())
/// ```
pub struct Devirtualizer<E: SymbolicEngine = X86Engine> {
    engine: E,
}

impl Devirtualizer<X86Engine> {
    /// Creates a driver backed by the x86-64 engine.
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(X86Engine::new())
    }
}

impl Default for Devirtualizer<X86Engine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: SymbolicEngine> Devirtualizer<E> {
    /// Creates a driver around an existing engine.
    pub fn with_engine(engine: E) -> Self {
        Self { engine }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runs the analysis described by `config`.
    ///
    /// # Errors
    ///
    /// Returns the first trace, decoding, or solver error. In dual-trace mode,
    /// [`crate::Error::SolverInconclusive`] is returned when no predicate was captured at the
    /// branch target.
    pub fn run(&mut self, config: &DevirtConfig) -> Result<DevirtReport> {
        log::info!("Replaying the VMP trace");
        let (first, detection) =
            self.replay_path(&config.trace1, config.symbol_width, ReplayPhase::First, None)?;
        let candidates = detection.candidates;
        let mut replays = vec![first.stats];

        let (merged, predicate) = match &config.trace2 {
            None => (first.return_expr, None),
            Some((trace2, target)) => {
                log::info!("A second trace has been provided");
                self.engine.reset_concrete_state();
                let (second, detection) = self.replay_path(
                    trace2,
                    config.symbol_width,
                    ReplayPhase::Second,
                    Some(*target),
                )?;
                replays.push(second.stats);

                log::info!("Merging expressions from trace1 and trace2");
                let merged = merge(
                    first.return_expr,
                    Some(second.return_expr),
                    detection.predicate.as_ref(),
                )?;
                (merged, detection.predicate)
            }
        };

        log::info!("Emulation done");
        DevirtReport::build(&self.engine, merged, candidates, predicate, replays)
    }

    fn replay_path(
        &mut self,
        path: &Path,
        width: SymbolWidth,
        phase: ReplayPhase,
        target: Option<BranchTarget>,
    ) -> Result<(ReplayOutcome, DetectionResult)> {
        let reader = TraceReader::from_path(path)?;
        let mut detector = BranchDetector::new(phase, target);
        let outcome = replay(&mut self.engine, reader, width, &mut detector)?;
        Ok((outcome, detector.finish()))
    }
}
