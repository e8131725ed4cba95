mod app;
mod output;
mod remap;

use std::process::ExitCode;

use anyhow::Context;
use clap::{error::ErrorKind, Parser};

use crate::app::Cli;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            // Usage goes to stderr, help and version to stdout
            let _ = error.print();
            return ExitCode::from(parse_exit_status(error.kind()));
        }
    };

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("{error:#}");
            ExitCode::from(1)
        }
    }
}

/// Exit status for a command line clap rejected: 0 for help and version, 1 otherwise.
fn parse_exit_status(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    // Argument problems are reported before anything else happens
    let request = match cli.request() {
        Ok(request) => request,
        Err(message) => {
            eprintln!("{message}");
            return Ok(false);
        }
    };

    // Show refremap info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.json {
        let level = if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("refremap", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    remap::run(&request, cli.json)
}
