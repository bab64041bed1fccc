//! uiflow CLI - Main Entry Point
//!
//! Loads the harness configuration, discovers scenario files and runs them
//! against a live application through Playwright.
//!
//! Exit codes: 0 when every scenario passed, 1 when any failed, 2 when the
//! harness itself could not run.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{list, run, validate};

/// uiflow - resilient end-to-end UI scenarios
#[derive(Parser)]
#[command(name = "uiflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults apply if it does not exist)
    #[arg(short, long, default_value = "uiflow.toml", global = true, env = "UIFLOW_CONFIG")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios against the target application
    Run(run::RunArgs),

    /// List discovered scenarios
    List(list::ListArgs),

    /// Parse and validate scenario files without a browser
    Validate(validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new(log_level)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let outcome = match cli.command {
        Commands::Run(args) => run::execute(args, &cli.config, cli.format).await,
        Commands::List(args) => list::execute(args, &cli.config, cli.format),
        Commands::Validate(args) => validate::execute(args, &cli.config),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
