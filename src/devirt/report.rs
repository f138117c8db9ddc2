//! Final report of an analysis run.

use std::fmt;

use crate::{
    devirt::{
        detect::{BranchCandidate, BranchPredicate},
        replay::ReplayStats,
    },
    engine::{SymbolicEngine, SymbolicExpr},
    Result,
};

/// Formulas longer than this are shown truncated.
pub const PREVIEW_LIMIT: usize = 100;

/// Everything an analysis run produces.
#[derive(Debug, Clone)]
pub struct DevirtReport {
    /// The merged formula, as returned by the replays.
    pub merged: SymbolicExpr,
    /// Concrete value of the merged formula under the current seeds.
    pub return_value: u64,
    /// The merged formula after unrolling.
    pub unrolled: SymbolicExpr,
    /// A smaller equivalent formula, when synthesis found one.
    pub synthesized: Option<SymbolicExpr>,
    /// LLVM IR of the synthesized formula, or of the unrolled one without synthesis.
    pub ir: String,
    /// First-replay heuristic findings.
    pub candidates: Vec<BranchCandidate>,
    /// The predicate both paths were merged under.
    pub predicate: Option<BranchPredicate>,
    /// Per-replay counters, in replay order.
    pub replays: Vec<ReplayStats>,
}

impl DevirtReport {
    /// Builds the report for `merged`.
    ///
    /// The merged formula is unrolled and handed to synthesis; the synthesized formula is
    /// lifted when one was found, the unrolled formula otherwise.
    ///
    /// # Errors
    ///
    /// Fails if the formula cannot be evaluated or lifted.
    pub fn build<E: SymbolicEngine + ?Sized>(
        engine: &E,
        merged: SymbolicExpr,
        candidates: Vec<BranchCandidate>,
        predicate: Option<BranchPredicate>,
        replays: Vec<ReplayStats>,
    ) -> Result<Self> {
        let return_value = engine.evaluate(&merged)?;
        let unrolled = engine.unroll(&merged);
        let synthesized = engine.synthesize(&unrolled);
        if synthesized.is_none() {
            log::debug!("Synthesis found no smaller formula, lifting the unrolled one");
        }
        let ir = engine.lift(synthesized.as_ref().unwrap_or(&unrolled))?;

        Ok(Self {
            merged,
            return_value,
            unrolled,
            synthesized,
            ir,
            candidates,
            predicate,
            replays,
        })
    }

    /// Preview of the unrolled formula.
    #[must_use]
    pub fn devirt_preview(&self) -> String {
        self.unrolled.preview(PREVIEW_LIMIT)
    }

    /// Preview of the synthesized formula, `None` when synthesis failed.
    #[must_use]
    pub fn synth_preview(&self) -> String {
        self.synthesized
            .as_ref()
            .map_or_else(|| "None".to_string(), |expr| expr.preview(PREVIEW_LIMIT))
    }
}

impl fmt::Display for DevirtReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for candidate in &self.candidates {
            writeln!(f, "[+] {candidate}")?;
        }
        writeln!(f, "[+] Return value: {:#x}", self.return_value)?;
        writeln!(f, "[+] Devirt expr: {}", self.devirt_preview())?;
        writeln!(f, "[+] Synth expr: {}\n", self.synth_preview())?;
        writeln!(f, "[+] LLVM IR ==============================\n")?;
        writeln!(f, "{}", self.ir.trim_end())?;
        write!(f, "[+] EOF LLVM IR ============================== ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GpRegister, SymbolicOp, X86Engine};

    #[test]
    fn report_lines() -> Result<()> {
        let mut engine = X86Engine::new();
        engine.set_concrete_register(GpRegister::Rdi, 5);
        engine.set_concrete_register(GpRegister::Rsi, 3);
        let x = engine.symbolize_register(GpRegister::Rdi.low(32), "x")?;
        let y = engine.symbolize_register(GpRegister::Rsi.low(32), "y")?;
        let merged = SymbolicExpr::binary(SymbolicOp::Add, x.expr(), y.expr());

        let report = DevirtReport::build(&engine, merged, Vec::new(), None, Vec::new())?;
        assert_eq!(report.return_value, 8);
        assert!(report.ir.contains("define"));

        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[+] Return value: 0x8");
        assert!(lines[1].starts_with("[+] Devirt expr: (bvadd"));
        assert!(lines[2].starts_with("[+] Synth expr: "));
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "[+] LLVM IR ==============================");
        assert!(text.ends_with("[+] EOF LLVM IR ============================== "));
        Ok(())
    }

    #[test]
    fn constant_report() -> Result<()> {
        let engine = X86Engine::new();
        let report = DevirtReport::build(
            &engine,
            SymbolicExpr::constant(0x2a, 32),
            Vec::new(),
            None,
            Vec::new(),
        )?;
        assert_eq!(report.return_value, 0x2a);
        assert!(report.synthesized.is_none());
        assert_eq!(report.synth_preview(), "None");
        assert_eq!(report.devirt_preview(), "(_ bv42 32)");
        Ok(())
    }
}
