//! End-to-end devirtualization tests.
//!
//! Each test writes small hand-assembled traces to temporary files and runs the full pipeline
//! through the public API:
//! 1. Validate a configuration
//! 2. Replay the first trace (symbolization, heuristics)
//! 3. Optionally replay a second trace and capture the branch predicate
//! 4. Merge and report

use std::{collections::BTreeMap, io::Write};

use tempfile::NamedTempFile;
use vmscope::{
    engine::{Flag, SolverOutcome, SymbolicExpr, Z3Solver},
    BranchTarget, DevirtConfig, DevirtOptions, DevirtReport, Devirtualizer, Error, Result,
    SymbolWidth,
};

/// Writes `lines` to a temporary trace file.
fn trace_file(lines: &[&str]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    file.flush()?;
    Ok(file)
}

/// Register snapshot with `rdi`/`rsi` set and everything else zero.
fn snapshot(rdi: u64, rsi: u64) -> String {
    snapshot_with_rax(0, rdi, rsi)
}

fn snapshot_with_rax(rax: u64, rdi: u64, rsi: u64) -> String {
    format!("r:{rax:x}:0:0:0:{rdi:x}:{rsi:x}:0:7fff0000:0:0:0:0:0:0:0:0")
}

/// Evaluates `expr` with `x` and `y` bound to the given values.
fn eval_xy(expr: &SymbolicExpr, x: u64, y: u64) -> Result<u64> {
    expr.evaluate(&BTreeMap::from([(0, x), (1, y)]))
}

fn run_single(lines: &[&str], width: SymbolWidth) -> Result<DevirtReport> {
    let trace = trace_file(lines)?;
    Devirtualizer::new().run(&DevirtConfig::single(trace.path(), width))
}

#[test]
fn nop_trace_returns_concrete_accumulator() -> Result<()> {
    let report = run_single(
        &["r:2a:0:0:0:0:0:0:0:0:0:0:0:0:0:0:0", "i:1000:1:90"],
        SymbolWidth::Qword,
    )?;

    assert_eq!(report.return_value, 0x2a);
    assert_eq!(report.unrolled.as_constant(), Some(0x2a));
    assert!(report.candidates.is_empty());
    assert!(report.predicate.is_none());
    assert_eq!(report.replays.len(), 1);
    assert_eq!(report.replays[0].instructions, 1);
    Ok(())
}

#[test]
fn instruction_count_matches_trace() -> Result<()> {
    let regs = snapshot(5, 3);
    let report = run_single(
        &[
            regs.as_str(),
            "i:1000:2:89f8",
            "mr:7ffefff8:8:0",
            "; comment lines are ignored",
            "i:1002:2:01f0",
            "i:1004:1:90",
            "i:1005:2:31c9",
        ],
        SymbolWidth::Dword,
    )?;

    assert_eq!(report.replays[0].instructions, 4);
    assert_eq!(report.replays[0].memory_writes, 0);
    // mov eax, edi; add eax, esi
    assert_eq!(report.return_value, 8);
    assert_eq!(report.unrolled.variables().len(), 2);
    Ok(())
}

#[test]
fn replays_are_deterministic() -> Result<()> {
    let regs = snapshot(0x1234, 0x77);
    let lines = [
        regs.as_str(),
        "i:1000:3:4889f8",
        "i:1003:3:4831f0",
        "i:1006:3:4801f8",
        "i:1009:4:48c1e003",
    ];
    let first = run_single(&lines, SymbolWidth::Qword)?;
    let second = run_single(&lines, SymbolWidth::Qword)?;

    assert_eq!(first.merged, second.merged);
    assert_eq!(first.return_value, second.return_value);
    assert_eq!(first.ir, second.ir);
    Ok(())
}

#[test]
fn flags_restore_reports_carry_candidate() -> Result<()> {
    let regs = snapshot(0x10, 0x2);
    // mov rax, rdi; xor rax, rsi; push rax; popfq
    let report = run_single(
        &[
            regs.as_str(),
            "i:1000:3:4889f8",
            "i:1003:3:4831f0",
            "i:1006:1:50",
            "i:1007:1:9d",
        ],
        SymbolWidth::Qword,
    )?;

    let carry: Vec<_> = report
        .candidates
        .iter()
        .filter(|candidate| candidate.flag == Flag::Cf)
        .collect();
    assert_eq!(carry.len(), 1);
    assert_eq!(carry[0].address, 0x1007);
    assert!(report
        .to_string()
        .contains("[+] A potential symbolic jump found on CF flag: 0x1007: popfq"));
    Ok(())
}

#[test]
fn register_compare_reports_aux_carry_candidate() -> Result<()> {
    let regs = snapshot(5, 3);
    let report = run_single(&[regs.as_str(), "i:1000:2:39f7"], SymbolWidth::Dword)?;

    assert_eq!(report.candidates.len(), 1);
    let candidate = &report.candidates[0];
    assert_eq!(candidate.flag, Flag::Af);
    assert_eq!(candidate.text, "cmp edi,esi");
    assert_eq!(candidate.model.values().len(), 2);
    Ok(())
}

#[test]
fn dual_traces_merge_under_predicate() -> Result<()> {
    let regs1 = snapshot(5, 3);
    let regs2 = snapshot(1, 7);
    // mov eax, edi; cmp edi, esi; then sub eax, esi on one path and add eax, esi on the other
    let trace1 = trace_file(&[
        regs1.as_str(),
        "i:1000:2:89f8",
        "i:1002:2:39f7",
        "i:1004:2:29f0",
    ])?;
    let trace2 = trace_file(&[
        regs2.as_str(),
        "i:1000:2:89f8",
        "i:1002:2:39f7",
        "i:1004:2:01f0",
    ])?;

    let config = DevirtConfig::from_options(DevirtOptions {
        trace1: Some(trace1.path().to_path_buf()),
        trace2: Some(trace2.path().to_path_buf()),
        symbol_size: Some(4),
        branch_address: Some(0x1002),
        branch_flag: Some("cf".to_string()),
    })?;
    let report = Devirtualizer::new().run(&config)?;

    assert_eq!(report.replays.len(), 2);
    assert_eq!(report.replays[1].instructions, 3);
    // evaluated under the second trace's seeds: 1 + 7
    assert_eq!(report.return_value, 8);

    let predicate = report.predicate.clone().expect("predicate captured");
    assert_eq!(predicate.address, 0x1002);
    assert_eq!(predicate.constraint.variables().len(), 2);

    let solver = Z3Solver::new();
    let eval = |values: &BTreeMap<usize, u64>, expr: &SymbolicExpr| expr.evaluate(values);
    let sub = |x: u64, y: u64| x.wrapping_sub(y) & 0xffff_ffff;
    let add = |x: u64, y: u64| x.wrapping_add(y) & 0xffff_ffff;

    // under the predicate the second path is selected
    let taken = predicate.model.values().clone();
    let (x, y) = (taken[&0], taken[&1]);
    assert!(x < y);
    assert_eq!(eval(&taken, &report.merged)?, add(x, y));

    // under its negation the first path is selected
    let negated = SymbolicExpr::not_equal(predicate.constraint.clone(), SymbolicExpr::bool(true));
    let SolverOutcome::Sat(model) = solver.check(&negated) else {
        panic!("negated predicate must be satisfiable");
    };
    let other = model.values().clone();
    let (x, y) = (other[&0], other[&1]);
    assert!(x >= y);
    assert_eq!(eval(&other, &report.merged)?, sub(x, y));
    Ok(())
}

#[test]
fn dual_traces_keep_inputs_across_register_snapshots() -> Result<()> {
    const DIRTY1: u64 = 0x1234_5678_0000_0000;
    const DIRTY2: u64 = 0xdead_beef_0000_0000;
    let before1 = snapshot(DIRTY1 | 5, DIRTY1 | 3);
    let after1 = snapshot_with_rax(5, DIRTY1 | 5, DIRTY1 | 3);
    let before2 = snapshot(DIRTY2 | 1, DIRTY2 | 7);
    let after2 = snapshot_with_rax(1, DIRTY2 | 1, DIRTY2 | 7);

    // nop; cmp edi, esi; mov eax, edi; then sub eax, esi or add eax, esi
    let trace1 = trace_file(&[
        before1.as_str(),
        "i:ffe:1:90",
        before1.as_str(),
        "i:1000:2:39f7",
        before1.as_str(),
        "i:1002:2:89f8",
        after1.as_str(),
        "i:1004:2:29f0",
    ])?;
    let trace2 = trace_file(&[
        before2.as_str(),
        "i:ffe:1:90",
        before2.as_str(),
        "i:1000:2:39f7",
        before2.as_str(),
        "i:1002:2:89f8",
        after2.as_str(),
        "i:1004:2:01f0",
    ])?;

    let target = BranchTarget {
        address: 0x1000,
        flag: Flag::Cf,
    };
    let config = DevirtConfig::dual(trace1.path(), trace2.path(), SymbolWidth::Dword, target);
    let report = Devirtualizer::new().run(&config)?;

    let predicate = report.predicate.clone().expect("predicate captured");
    assert_eq!(predicate.address, 0x1000);
    assert_eq!(predicate.constraint.variables().len(), 2);
    assert_eq!(report.replays[1].symbolized_instructions, 3);
    assert_eq!(report.return_value, 8);

    assert_eq!(eval_xy(&report.merged, 1, 7)?, 8);
    assert_eq!(eval_xy(&report.merged, 5, 3)?, 2);
    Ok(())
}

#[test]
fn target_seen_only_in_second_trace() -> Result<()> {
    let regs1 = snapshot(5, 3);
    let regs2 = snapshot(1, 7);
    // mov eax, edi; sub eax, esi
    let trace1 = trace_file(&[regs1.as_str(), "i:2000:2:89f8", "i:2002:2:29f0"])?;
    // cmp edi, esi; mov eax, edi; add eax, esi
    let trace2 = trace_file(&[
        regs2.as_str(),
        "i:1000:2:39f7",
        "i:1002:2:89f8",
        "i:1004:2:01f0",
    ])?;

    let target = BranchTarget {
        address: 0x1000,
        flag: Flag::Cf,
    };
    let config = DevirtConfig::dual(trace1.path(), trace2.path(), SymbolWidth::Dword, target);
    let report = Devirtualizer::new().run(&config)?;

    assert!(report.candidates.is_empty());
    assert_eq!(report.predicate.as_ref().map(|p| p.address), Some(0x1000));
    assert_eq!(eval_xy(&report.merged, 1, 7)?, 8);
    assert_eq!(eval_xy(&report.merged, 5, 3)?, 2);
    assert_eq!(eval_xy(&report.merged, 2, 9)?, 11);
    Ok(())
}

#[test]
fn dual_traces_without_symbolic_flag_fail() -> Result<()> {
    let regs = snapshot(5, 3);
    let lines = [regs.as_str(), "i:1000:1:90", "i:1001:2:89f8"];
    let trace1 = trace_file(&lines)?;
    let trace2 = trace_file(&lines)?;

    let target = BranchTarget {
        address: 0x1001,
        flag: Flag::Cf,
    };
    let config = DevirtConfig::dual(trace1.path(), trace2.path(), SymbolWidth::Dword, target);
    let result = Devirtualizer::new().run(&config);
    assert!(matches!(result, Err(Error::SolverInconclusive(_))));
    Ok(())
}

#[test]
fn symbol_width_is_validated_everywhere() {
    for size in [0u8, 3, 5, 6, 7, 9, 16] {
        assert!(matches!(
            SymbolWidth::try_from(size),
            Err(Error::Configuration(_))
        ));
        let options = DevirtOptions {
            trace1: Some("unused.trace".into()),
            symbol_size: Some(size),
            ..DevirtOptions::default()
        };
        assert!(matches!(
            DevirtConfig::from_options(options),
            Err(Error::Configuration(_))
        ));
    }
}

#[test]
fn malformed_trace_stops_the_run() -> Result<()> {
    let regs = snapshot(5, 3);
    let result = run_single(
        &[regs.as_str(), "i:1000:2:89f8", "mr:zz:4:0"],
        SymbolWidth::Dword,
    );
    assert!(matches!(result, Err(Error::TraceFormat { line: 3, .. })));
    Ok(())
}

#[test]
fn missing_trace_file() {
    let config = DevirtConfig::single("/nonexistent/vmscope.trace", SymbolWidth::Byte);
    assert!(matches!(
        Devirtualizer::new().run(&config),
        Err(Error::FileError(_))
    ));
}
