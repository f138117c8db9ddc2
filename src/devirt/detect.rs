//! Virtual-branch detection.
//!
//! Code virtualizers compile a conditional branch into data flow: a flag is computed from
//! the inputs and then used arithmetically to select the next handler, so no native
//! conditional jump remains. Such a point shows up as a flag whose formula depends on both
//! inputs and can take either value.
//!
//! During the first replay, [`BranchHeuristic`]s report candidate points. During the second
//! replay, the flag at a configured [`BranchTarget`] is captured as the [`BranchPredicate`]
//! used to merge both paths.

use std::fmt;

use crate::{
    devirt::config::{BranchTarget, ReplayPhase},
    engine::{
        Flag, InstructionClass, Model, ProcessedInstruction, SolverOutcome, SymbolicEngine,
        SymbolicExpr,
    },
    Result,
};

/// A heuristic finding from the first replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCandidate {
    /// Address of the instruction.
    pub address: u64,
    /// Disassembly of the instruction.
    pub text: String,
    /// Flag holding the suspected branch condition.
    pub flag: Flag,
    /// Name of the heuristic that fired.
    pub heuristic: &'static str,
    /// `flag != current value`, shown satisfiable.
    pub constraint: SymbolicExpr,
    /// Inputs that flip the flag.
    pub model: Model,
}

impl fmt::Display for BranchCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A potential symbolic jump found on {} flag: 0x{:x}: {} - Model: {}",
            self.flag.to_string().to_uppercase(),
            self.address,
            self.text,
            self.model
        )
    }
}

/// The condition of the hidden branch, captured on the second replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPredicate {
    /// Address the predicate was captured at.
    pub address: u64,
    /// Flag the predicate was read from.
    pub flag: Flag,
    /// `flag == value observed on the second path`, over exactly two variables.
    pub constraint: SymbolicExpr,
    /// A model of the constraint.
    pub model: Model,
}

/// Everything the detector found during one replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    /// Heuristic findings, in trace order.
    pub candidates: Vec<BranchCandidate>,
    /// The captured predicate, if any.
    pub predicate: Option<BranchPredicate>,
}

/// A pattern that may implement a hidden conditional branch.
pub trait BranchHeuristic {
    /// Short name used in reports.
    fn name(&self) -> &'static str;

    /// Inspects a symbolized instruction right after it was executed.
    ///
    /// # Errors
    ///
    /// Propagates engine failures while evaluating or solving the flag formula.
    fn detects(
        &self,
        insn: &ProcessedInstruction,
        engine: &dyn SymbolicEngine,
    ) -> Result<Option<BranchCandidate>>;
}

/// `popf`/`popfq` restoring a carry flag that depends on both inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CarryViaFlagsRestore;

impl BranchHeuristic for CarryViaFlagsRestore {
    fn name(&self) -> &'static str {
        "carry-via-flags-restore"
    }

    fn detects(
        &self,
        insn: &ProcessedInstruction,
        engine: &dyn SymbolicEngine,
    ) -> Result<Option<BranchCandidate>> {
        if insn.class != InstructionClass::FlagsRestore {
            return Ok(None);
        }
        flippable_flag(insn, engine, Flag::Cf, self.name())
    }
}

/// `cmp reg, reg` whose auxiliary carry depends on both inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuxCarryViaRegisterCompare;

impl BranchHeuristic for AuxCarryViaRegisterCompare {
    fn name(&self) -> &'static str {
        "aux-carry-via-register-compare"
    }

    fn detects(
        &self,
        insn: &ProcessedInstruction,
        engine: &dyn SymbolicEngine,
    ) -> Result<Option<BranchCandidate>> {
        if insn.class != InstructionClass::RegisterCompare {
            return Ok(None);
        }
        flippable_flag(insn, engine, Flag::Af, self.name())
    }
}

/// Reports `flag` if it references exactly two variables and can differ from its current
/// value.
fn flippable_flag(
    insn: &ProcessedInstruction,
    engine: &dyn SymbolicEngine,
    flag: Flag,
    heuristic: &'static str,
) -> Result<Option<BranchCandidate>> {
    let expr = engine.flag_expr(flag);
    if expr.variables().len() != 2 {
        return Ok(None);
    }

    let current = engine.evaluate(&expr)?;
    let constraint = SymbolicExpr::not_equal(expr, SymbolicExpr::constant(current, 1));
    match engine.solve(&constraint)? {
        SolverOutcome::Sat(model) => Ok(Some(BranchCandidate {
            address: insn.address,
            text: insn.text.clone(),
            flag,
            heuristic,
            constraint,
            model,
        })),
        SolverOutcome::Unsat | SolverOutcome::Unknown => Ok(None),
    }
}

/// Observer of processed instructions for one replay.
pub struct BranchDetector {
    phase: ReplayPhase,
    target: Option<BranchTarget>,
    heuristics: Vec<Box<dyn BranchHeuristic>>,
    result: DetectionResult,
}

impl BranchDetector {
    /// Creates a detector with the built-in heuristics.
    ///
    /// # Arguments
    ///
    /// * `phase` - Heuristics run in [`ReplayPhase::First`], predicate capture in
    ///   [`ReplayPhase::Second`]
    /// * `target` - Where to capture the predicate
    #[must_use]
    pub fn new(phase: ReplayPhase, target: Option<BranchTarget>) -> Self {
        Self {
            phase,
            target,
            heuristics: vec![
                Box::new(CarryViaFlagsRestore),
                Box::new(AuxCarryViaRegisterCompare),
            ],
            result: DetectionResult::default(),
        }
    }

    /// Adds a heuristic evaluated during the first replay.
    pub fn add_heuristic(&mut self, heuristic: Box<dyn BranchHeuristic>) {
        self.heuristics.push(heuristic);
    }

    /// Findings so far.
    #[must_use]
    pub fn result(&self) -> &DetectionResult {
        &self.result
    }

    /// Consumes the detector, returning its findings.
    #[must_use]
    pub fn finish(self) -> DetectionResult {
        self.result
    }

    /// Inspects one processed instruction.
    ///
    /// # Errors
    ///
    /// Propagates engine failures from heuristics or predicate capture.
    pub fn observe(
        &mut self,
        insn: &ProcessedInstruction,
        engine: &dyn SymbolicEngine,
    ) -> Result<()> {
        if !insn.symbolized {
            return Ok(());
        }

        match self.phase {
            ReplayPhase::First => {
                for heuristic in &self.heuristics {
                    if let Some(candidate) = heuristic.detects(insn, engine)? {
                        log::info!("{candidate}");
                        self.result.candidates.push(candidate);
                    }
                }
            }
            ReplayPhase::Second => {
                let Some(target) = self.target else {
                    return Ok(());
                };
                if self.result.predicate.is_none() && insn.address == target.address {
                    self.result.predicate = capture(insn, engine, target)?;
                }
            }
        }
        Ok(())
    }
}

fn capture(
    insn: &ProcessedInstruction,
    engine: &dyn SymbolicEngine,
    target: BranchTarget,
) -> Result<Option<BranchPredicate>> {
    let expr = engine.flag_expr(target.flag);
    let variables = expr.variables().len();
    if variables != 2 {
        log::debug!("{insn}: {} references {variables} variables, not a predicate", target.flag);
        return Ok(None);
    }

    let value = engine.evaluate(&expr)?;
    let constraint = SymbolicExpr::equal(expr, SymbolicExpr::constant(value, 1));
    match engine.solve(&constraint)? {
        SolverOutcome::Sat(model) => {
            log::info!("Captured virtual branch predicate on {target}: {model}");
            Ok(Some(BranchPredicate {
                address: insn.address,
                flag: target.flag,
                constraint,
                model,
            }))
        }
        SolverOutcome::Unsat | SolverOutcome::Unknown => {
            log::debug!("{insn}: predicate on {target} has no model");
            Ok(None)
        }
    }
}
