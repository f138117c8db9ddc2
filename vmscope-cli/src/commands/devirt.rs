use std::{collections::BTreeMap, path::Path};

use anyhow::Context;
use serde::Serialize;
use vmscope::{
    devirt::{BranchCandidate, BranchPredicate, ReplayStats},
    engine::Model,
    DevirtConfig, DevirtOptions, DevirtReport, Devirtualizer, Error,
};

use crate::{
    app::GlobalOptions,
    output::{hex, print_output},
};

/// Raw `devirt` arguments as given on the command line.
pub struct DevirtArgs<'a> {
    pub trace1: Option<&'a Path>,
    pub trace2: Option<&'a Path>,
    pub symsize: Option<&'a str>,
    pub vbraddr: Option<&'a str>,
    pub vbrflag: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct DevirtOutput {
    pub return_value: String,
    pub devirt_expr: String,
    pub synth_expr: Option<String>,
    pub llvm_ir: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<CandidateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<PredicateInfo>,
    pub replays: Vec<ReplayInfo>,
}

#[derive(Debug, Serialize)]
pub struct CandidateInfo {
    pub address: String,
    pub instruction: String,
    pub flag: String,
    pub heuristic: String,
    pub model: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct PredicateInfo {
    pub address: String,
    pub flag: String,
    pub constraint: String,
    pub model: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ReplayInfo {
    pub instructions: usize,
    pub symbolized_instructions: usize,
    pub register_writes: usize,
    pub memory_writes: usize,
}

fn model_info(model: &Model) -> BTreeMap<String, String> {
    model
        .values()
        .iter()
        .map(|(id, value)| (format!("SymVar_{id}"), hex(*value)))
        .collect()
}

impl From<&BranchCandidate> for CandidateInfo {
    fn from(candidate: &BranchCandidate) -> Self {
        Self {
            address: hex(candidate.address),
            instruction: candidate.text.clone(),
            flag: candidate.flag.to_string(),
            heuristic: candidate.heuristic.to_string(),
            model: model_info(&candidate.model),
        }
    }
}

impl From<&BranchPredicate> for PredicateInfo {
    fn from(predicate: &BranchPredicate) -> Self {
        Self {
            address: hex(predicate.address),
            flag: predicate.flag.to_string(),
            constraint: predicate.constraint.to_string(),
            model: model_info(&predicate.model),
        }
    }
}

impl From<&ReplayStats> for ReplayInfo {
    fn from(stats: &ReplayStats) -> Self {
        Self {
            instructions: stats.instructions,
            symbolized_instructions: stats.symbolized_instructions,
            register_writes: stats.register_writes,
            memory_writes: stats.memory_writes,
        }
    }
}

impl From<&DevirtReport> for DevirtOutput {
    fn from(report: &DevirtReport) -> Self {
        Self {
            return_value: hex(report.return_value),
            devirt_expr: report.unrolled.to_string(),
            synth_expr: report.synthesized.as_ref().map(ToString::to_string),
            llvm_ir: report.ir.clone(),
            candidates: report.candidates.iter().map(CandidateInfo::from).collect(),
            predicate: report.predicate.as_ref().map(PredicateInfo::from),
            replays: report.replays.iter().map(ReplayInfo::from).collect(),
        }
    }
}

/// Print the reason and the expected syntax, then exit with status 1.
fn usage(reason: &str, dual: bool) -> ! {
    println!("[-] {reason}");
    if dual {
        println!(
            "[!] Syntax: vmscope devirt --trace1 <vmp trace> --trace2 <vmp trace> \
             --symsize <sym size> --vbraddr <vbraddr> --vbrflag <vbrflag>"
        );
    } else {
        println!("[!] Syntax: vmscope devirt --trace1 <vmp trace> --symsize <sym size>");
    }
    std::process::exit(1);
}

/// Parse an address supporting hex (0x...) and decimal.
fn parse_address(s: &str) -> anyhow::Result<u64> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex address: {s}"))
    } else {
        trimmed
            .parse::<u64>()
            .with_context(|| format!("invalid address: {s}"))
    }
}

fn options(args: &DevirtArgs<'_>) -> Result<DevirtOptions, String> {
    let symbol_size = match args.symsize {
        Some(size) => Some(size.trim().parse::<u8>().map_err(|_| {
            "Size of symbolic variables must be equal to: 1, 2, 4, or 8 bytes".to_string()
        })?),
        None => None,
    };
    let branch_address = match args.vbraddr {
        Some(address) => Some(parse_address(address).map_err(|e| format!("{e:#}"))?),
        None => None,
    };

    Ok(DevirtOptions {
        trace1: args.trace1.map(Path::to_path_buf),
        trace2: args.trace2.map(Path::to_path_buf),
        symbol_size,
        branch_address,
        branch_flag: args.vbrflag.map(str::to_string),
    })
}

pub fn run(args: &DevirtArgs<'_>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let dual = args.trace2.is_some();
    let options = options(args).unwrap_or_else(|reason| usage(&reason, dual));
    let config = match DevirtConfig::from_options(options) {
        Ok(config) => config,
        Err(Error::Configuration(reason)) => usage(&reason, dual),
        Err(e) => return Err(e.into()),
    };

    let report = Devirtualizer::new()
        .run(&config)
        .with_context(|| format!("failed to devirtualize {}", config.trace1.display()))?;

    let output = DevirtOutput::from(&report);
    print_output(&output, opts, |_| println!("{report}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_accept_hex_and_decimal() -> anyhow::Result<()> {
        assert_eq!(parse_address("0x1400_0000").ok(), None);
        assert_eq!(parse_address("0x14000a1b2")?, 0x1_4000_a1b2);
        assert_eq!(parse_address(" 0X10 ")?, 0x10);
        assert_eq!(parse_address("4096")?, 4096);
        assert!(parse_address("zz").is_err());
        Ok(())
    }

    #[test]
    fn symsize_must_be_numeric() {
        let args = DevirtArgs {
            trace1: Some(Path::new("a.trace")),
            trace2: None,
            symsize: Some("four"),
            vbraddr: None,
            vbrflag: None,
        };
        assert!(options(&args).is_err());

        let args = DevirtArgs {
            symsize: Some("4"),
            ..args
        };
        let options = options(&args).unwrap_or_default();
        assert_eq!(options.symbol_size, Some(4));
    }
}
