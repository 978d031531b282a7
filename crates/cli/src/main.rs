mod cli;
mod commands;

use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use loglens_core::config::{load_dotenv, Config};

use crate::cli::{CliArgs, Command};

fn main() {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(CliArgs::parse()) {
        error!(error = %format!("{:#}", e), "loglens failed");
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    load_dotenv();
    let config = match &args.profile {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    }
    .context("failed to load configuration")?;
    config.log_summary();

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    match &args.command {
        Command::Cluster(cmd) => commands::cluster(&config, cmd, &mut out)?,
        Command::Train(cmd) => commands::train(&config, cmd)?,
        Command::Score(cmd) => commands::score(&config, cmd, &mut out)?,
    }
    out.flush().context("failed to flush output")?;
    Ok(())
}
