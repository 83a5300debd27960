//! Run Python source in a worker.

use super::{load_config, read_source};
use clap::Args;
use console::style;
use execbox_sandbox::{
    ExecutionId, ExecutionRequest, ExecutionResult, ExecutionService, ExecutionStatus,
    SandboxError,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;

/// How often a detached run is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run command arguments.
#[derive(Args)]
pub struct RunArgs {
    /// Python file to run, or `-` for stdin
    #[arg(default_value = "-")]
    pub file: PathBuf,

    /// Wall-clock timeout in seconds (defaults to the configured value)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Set an environment variable for this run
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Submit in the background and poll until the run finishes
    #[arg(short, long)]
    pub detach: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    execbox_core::env::parse_assignment(s)
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

/// Run the run command.
pub async fn run(args: RunArgs, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let source = read_source(&args.file)?;

    let timeout = args
        .timeout
        .unwrap_or(config.execution.default_timeout_secs);
    let request = ExecutionRequest::new(source)
        .with_timeout(Duration::from_secs(timeout))
        .with_envs(args.env.into_iter().collect());

    let service = ExecutionService::new(&config)?;
    let result = if args.detach {
        run_detached(&service, request, args.json).await?
    } else {
        run_attached(&service, request).await?
    };

    print_result(&result, args.json)?;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run and wait. Ctrl-C stops the run instead of abandoning the worker.
async fn run_attached(
    service: &ExecutionService,
    request: ExecutionRequest,
) -> anyhow::Result<ExecutionResult> {
    let execution = service.execute(request);
    tokio::pin!(execution);

    tokio::select! {
        result = &mut execution => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            service.shutdown().await;
            Ok(execution.await?)
        }
    }
}

/// Submit, then poll status until the run is terminal.
async fn run_detached(
    service: &ExecutionService,
    request: ExecutionRequest,
    quiet: bool,
) -> anyhow::Result<ExecutionResult> {
    let id = service.submit(request)?;
    if !quiet {
        eprintln!("{} {}", style("Submitted").cyan(), id);
    }

    let mut last = None;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                let report = service.stop(&id)?;
                debug!(execution_id = %id, "{}", report.message);
            }
        }

        let status = service.status(&id)?;
        if last != Some(status.status) {
            if !quiet {
                eprintln!(
                    "{} {} ({:.2}s)",
                    style("Status").cyan(),
                    status.status,
                    status.elapsed.as_secs_f64()
                );
            }
            last = Some(status.status);
        }
        if status.completed {
            break;
        }
    }

    fetch_result(service, &id).await
}

/// The status can turn terminal a moment before the result is readable.
async fn fetch_result(service: &ExecutionService, id: &ExecutionId) -> anyhow::Result<ExecutionResult> {
    loop {
        match service.result(id) {
            Err(SandboxError::InProgress(_)) => tokio::time::sleep(POLL_INTERVAL).await,
            other => return Ok(other?),
        }
    }
}

fn print_result(result: &ExecutionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    print!("{}", result.output);
    if let Some(error) = &result.error {
        eprintln!("{}", style(error.trim_end()).red());
    }
    let outcome = if result.success {
        style(ExecutionStatus::Completed.as_str()).green()
    } else {
        let kind = result
            .failure
            .map(|kind| kind.as_str())
            .unwrap_or(ExecutionStatus::Error.as_str());
        style(kind).red()
    };
    eprintln!(
        "{} {} in {:.2}s",
        style(&result.execution_id).dim(),
        outcome,
        result.elapsed.as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("A=1").unwrap(),
            ("A".to_string(), "1".to_string())
        );
        assert_eq!(
            parse_env("URL=a=b").unwrap(),
            ("URL".to_string(), "a=b".to_string())
        );
        assert!(parse_env("A").is_err());
    }

    #[tokio::test]
    async fn test_blocked_source_fails_without_worker() {
        let service = ExecutionService::new(&Default::default()).unwrap();
        let result = run_attached(&service, ExecutionRequest::new("import subprocess"))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Code validation error: Blocked import detected: subprocess")
        );
    }
}
