//! Diagnostic commands.

use clap::Args;
use console::{style, Emoji};
use execbox_core::config::Config;
use execbox_core::error::ConfigError;
use execbox_core::paths;
use execbox_sandbox::worker::interpreter_version;
use execbox_sandbox::{ExecutionRequest, ExecutionService, LimitStrategy};
use std::path::Path;
use std::time::Duration;

static CHECK: Emoji = Emoji("✓", "+");
static CROSS: Emoji = Emoji("✗", "x");
static WARN: Emoji = Emoji("⚠", "!");

/// Doctor command arguments.
#[derive(Args)]
pub struct DoctorArgs {
    /// Skip the smoke run
    #[arg(long)]
    pub quick: bool,
}

/// Run the doctor command.
pub async fn run(args: DoctorArgs, explicit: Option<&Path>) -> anyhow::Result<()> {
    println!("execbox Doctor\n");

    let mut errors = 0;
    let mut warnings = 0;

    // Check config
    println!("Checking configuration...");

    let path = match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => paths::config_file(),
    };
    let loaded = match &path {
        Ok(path) => Config::load(path),
        Err(e) => Err(ConfigError::Validation(e.to_string())),
    };

    let mut config = match loaded {
        Ok(config) => {
            println!("  {} Configuration loaded", style(CHECK).green());
            config
        }
        Err(ConfigError::NotFound(path)) => {
            println!(
                "  {} Configuration file not found: {:?} (using defaults)",
                style(WARN).yellow(),
                path
            );
            println!("    Run 'execbox config init' to create one");
            warnings += 1;
            Config::default()
        }
        Err(e) => {
            println!("  {} Configuration error: {}", style(CROSS).red(), e);
            errors += 1;
            Config::default()
        }
    };
    config.apply_env_overrides();

    match config.validate() {
        Ok(_) => println!("  {} Configuration valid", style(CHECK).green()),
        Err(e) => {
            println!("  {} Configuration invalid: {}", style(CROSS).red(), e);
            errors += 1;
        }
    }

    // Check interpreter
    println!("\nChecking interpreter...");

    let interpreter_ok = match interpreter_version(&config.worker.interpreter).await {
        Ok(version) => {
            println!(
                "  {} {} ({})",
                style(CHECK).green(),
                config.worker.interpreter,
                version
            );
            true
        }
        Err(e) => {
            println!("  {} {}", style(CROSS).red(), e);
            errors += 1;
            false
        }
    };

    // Check limit strategy
    println!("\nChecking resource limits...");

    match LimitStrategy::resolve(config.limits.strategy) {
        Ok(LimitStrategy::Unenforced) => {
            println!(
                "  {} CPU and memory caps are not enforced; only the timeout applies",
                style(WARN).yellow()
            );
            warnings += 1;
        }
        Ok(strategy) => {
            println!("  {} Limit strategy: {}", style(CHECK).green(), strategy);
            if !strategy.enforces_memory() {
                println!(
                    "  {} Memory cap is not enforced on this platform",
                    style(WARN).yellow()
                );
                warnings += 1;
            }
        }
        Err(e) => {
            println!("  {} {}", style(CROSS).red(), e);
            errors += 1;
        }
    }

    // Smoke run
    if !args.quick && interpreter_ok && errors == 0 {
        println!("\nRunning smoke test...");

        let request =
            ExecutionRequest::new("print('ok')").with_timeout(Duration::from_secs(10));
        let outcome = match ExecutionService::new(&config) {
            Ok(service) => service.execute(request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) if result.success && result.output.trim() == "ok" => {
                println!(
                    "  {} Smoke run completed in {:.2}s",
                    style(CHECK).green(),
                    result.elapsed.as_secs_f64()
                );
            }
            Ok(result) => {
                println!(
                    "  {} Smoke run failed: {}",
                    style(CROSS).red(),
                    result.error.as_deref().unwrap_or("unexpected output")
                );
                errors += 1;
            }
            Err(e) => {
                println!("  {} Smoke run could not start: {}", style(CROSS).red(), e);
                errors += 1;
            }
        }
    }

    // Summary
    println!("\n{}", style("Summary").bold());
    println!("  Errors: {}", if errors > 0 { style(errors).red() } else { style(errors).green() });
    println!("  Warnings: {}", if warnings > 0 { style(warnings).yellow() } else { style(warnings).green() });

    if errors > 0 {
        anyhow::bail!("{} error(s) found", errors);
    }

    Ok(())
}
