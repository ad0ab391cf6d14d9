//! flowbag CLI entry point
//!
//! Loads configuration, initializes logging, wires Ctrl-C to a cancellation
//! token and dispatches to the subcommand handlers.

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use flowbag_core::config::GeneralConfig;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let (config_path, explicit) = cli.config_path();
    let config_path = config_path.to_path_buf();

    // `config` reports configuration errors itself, so it runs before loading.
    let command = match cli.command {
        Commands::Config(args) => {
            let mut general = GeneralConfig::default();
            if let Some(level) = cli.log_level {
                general.log_level = level;
            }
            init_logging(&general)?;
            return commands::config::execute(args, &config_path, explicit, &writer).await;
        }
        other => other,
    };

    let mut config = commands::load_config(&config_path, explicit).await?;
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    init_logging(&config.general)?;
    flowbag_core::metrics::describe_all();

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    match command {
        Commands::Accumulate(args) => {
            commands::accumulate::execute(args, &config, &writer, &cancel).await
        }
        Commands::Build(args) => commands::build::execute(args, &config, &writer, &cancel).await,
        Commands::Tool(args) => commands::tool::execute(args, &config, &writer, &cancel).await,
        Commands::Cat(args) => commands::cat::execute(args, &config, &writer, &cancel).await,
        Commands::Config(_) => Ok(()),
    }
}

fn init_logging(general: &GeneralConfig) -> Result<(), CliError> {
    logging::init_tracing(general).map_err(|e| CliError::Config(format!("{:#}", e)))
}
