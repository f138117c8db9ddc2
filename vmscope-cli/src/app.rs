use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// vmscope - trace-driven devirtualization of x86-64 virtualized code
#[derive(Debug, Parser)]
#[command(name = "vmscope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// Devirt arguments are all optional here; their validation and usage message live in
// `commands::devirt`.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay one or two VM traces and print the devirtualized return formula.
    Devirt {
        /// Trace of the first path.
        #[arg(long, value_name = "FILE")]
        trace1: Option<PathBuf>,

        /// Trace of the second path. Requires --vbraddr and --vbrflag.
        #[arg(long, value_name = "FILE")]
        trace2: Option<PathBuf>,

        /// Size of the symbolic inputs in bytes: 1, 2, 4, or 8.
        #[arg(long, value_name = "N")]
        symsize: Option<String>,

        /// Address of the virtual branch (hex like 0x14000a1b2 or decimal).
        #[arg(long, value_name = "ADDR")]
        vbraddr: Option<String>,

        /// Flag holding the virtual branch condition (e.g. cf, af, zf).
        #[arg(long, value_name = "FLAG")]
        vbrflag: Option<String>,
    },

    /// Summarize a trace: event counts and instruction addresses.
    Stats {
        /// Path to the trace file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// List every distinct instruction address.
        #[arg(long)]
        addresses: bool,
    },
}
