mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show vmscope info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("vmscope", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Devirt {
            trace1,
            trace2,
            symsize,
            vbraddr,
            vbrflag,
        } => commands::devirt::run(
            &commands::devirt::DevirtArgs {
                trace1: trace1.as_deref(),
                trace2: trace2.as_deref(),
                symsize: symsize.as_deref(),
                vbraddr: vbraddr.as_deref(),
                vbrflag: vbrflag.as_deref(),
            },
            &cli.global,
        ),
        Command::Stats { path, addresses } => commands::stats::run(path, *addresses, &cli.global),
    }
}
