//! layerdex -- container image layer indexer CLI.

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<CliError>()
                .map(CliError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let writer = OutputWriter::new(cli.output);
    let config_path = cli.config.as_deref();

    // `config` reports load errors itself.
    if let Commands::Config(args) = cli.command {
        commands::config::execute(args, config_path, &writer).await?;
        return Ok(());
    }

    let mut config = commands::load_config(config_path).await?;
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
        config.validate().map_err(CliError::from)?;
    }
    logging::init_tracing(&config.general)?;

    tracing::debug!(source = %commands::config_source(config_path), "configuration loaded");

    match cli.command {
        Commands::Index(args) => commands::index::execute(args, &config, &writer).await?,
        Commands::Report(args) => commands::report::execute(args, &config, &writer).await?,
        Commands::Scanners(args) => commands::scanners::execute(args, &config, &writer).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
