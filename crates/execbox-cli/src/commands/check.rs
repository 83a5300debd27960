//! Static pre-check without running anything.

use super::{load_config, read_source};
use clap::Args;
use console::{style, Emoji};
use execbox_sandbox::{Precheck, SandboxError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

static CHECK: Emoji = Emoji("✓", "+");
static CROSS: Emoji = Emoji("✗", "x");

/// Check command arguments.
#[derive(Args)]
pub struct CheckArgs {
    /// Python file to check, or `-` for stdin
    #[arg(default_value = "-")]
    pub file: PathBuf,

    /// Print the verdict as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct Verdict {
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked: Option<String>,
}

fn verdict(precheck: &Precheck, source: &str) -> anyhow::Result<Verdict> {
    match precheck.check(source) {
        Ok(_) => Ok(Verdict {
            passed: true,
            blocked: None,
        }),
        Err(SandboxError::Blocked { pattern }) => Ok(Verdict {
            passed: false,
            blocked: Some(pattern),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Run the check command.
pub fn run(args: CheckArgs, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let precheck = Precheck::from_config(&config.precheck)?;
    let source = read_source(&args.file)?;
    let verdict = verdict(&precheck, &source)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        match &verdict.blocked {
            None => println!("{} No blocked imports found", style(CHECK).green()),
            Some(pattern) => println!(
                "{} Blocked import detected: {}",
                style(CROSS).red(),
                style(pattern).bold()
            ),
        }
    }

    Ok(if verdict.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
