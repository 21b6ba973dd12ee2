//! dewow command-line host

mod cli;
mod commands;
mod settings;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Tracing ───────────────────────────────────────────────────────────
    let default_filter = match cli.verbose {
        0 => "dewow=info,dewow_core=info",
        1 => "dewow=debug,dewow_core=debug",
        _ => "dewow=trace,dewow_core=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "dewow starting");
    match commands::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
