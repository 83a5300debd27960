//! execbox CLI entry point.

use clap::Parser;
use execbox_cli::{run, Cli};
use execbox_core::config::{Config, LogFormat, LoggingConfig};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Logging settings come from the config file; a broken file is reported
    // by the command itself.
    let logging = Config::load_from(cli.config.as_deref())
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(cli.verbose, &logging);

    // Run the command
    run(cli).await
}

/// Initialize logging. Logs go to stderr so program output stays clean.
fn init_logging(verbose: u8, logging: &LoggingConfig) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("execbox={}", level).into());

    let json = logging.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}
