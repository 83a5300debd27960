//! execbox command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

/// execbox - run untrusted Python in an isolated worker
#[derive(Parser)]
#[command(name = "execbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "EXECBOX_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run Python source in a worker
    Run(commands::run::RunArgs),

    /// Run the static pre-check only
    Check(commands::check::CheckArgs),

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Run diagnostics
    Doctor(commands::doctor::DoctorArgs),

    /// Show version information
    Version,
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => commands::run::run(args, config_path).await,
        Commands::Check(args) => commands::check::run(args, config_path),
        Commands::Config(args) => commands::config::run(args, config_path).map(|_| ExitCode::SUCCESS),
        Commands::Doctor(args) => commands::doctor::run(args, config_path)
            .await
            .map(|_| ExitCode::SUCCESS),
        Commands::Version => {
            println!("execbox {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}
