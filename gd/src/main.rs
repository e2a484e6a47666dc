//! gd - CLI entry point
//!
//! Wires logging, configuration, Ctrl-C cancellation, and a progress
//! printer around the executor and the recovery manager.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use graphdrive::cli::{Cli, Command};
use graphdrive::config::{Config, Manifest};
use graphdrive::domain::{DependencyGraph, ExecutionResult};
use graphdrive::events::PoolEvent;
use graphdrive::pool::{DynamicTaskPool, PoolError};
use graphdrive::recovery::{RecoveryManager, RecoveryOptions};
use graphdrive::runner::ShellOperation;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graphdrive")
        .join("logs");

    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(std::io::stderr)
        .init();

    info!("Logging initialized");
    Ok(())
}

fn load_graph(config: &Config, manifest_override: Option<&PathBuf>) -> Result<DependencyGraph> {
    let path = manifest_override.unwrap_or(&config.manifest);
    let manifest = Manifest::load(path)?;
    DependencyGraph::build(manifest.packages).context("Invalid package manifest")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            command,
            max_concurrency,
            continue_run,
            max_retries,
            manifest,
        } => run(&config, command, max_concurrency, continue_run, max_retries, manifest).await,
        Command::Status => status(&config).await,
        Command::Validate => validate(&config).await,
        Command::Recover {
            retry_failed,
            skip_failed,
            reset,
            mark_completed,
            skip,
        } => {
            let options = RecoveryOptions {
                reset_packages: reset,
                mark_completed,
                skip_packages: skip,
                retry_failed,
                skip_failed,
            };
            recover(&config, options).await
        }
        Command::Clean => clean(&config).await,
    }
}

async fn run(
    config: &Config,
    command: String,
    max_concurrency: Option<usize>,
    continue_run: bool,
    max_retries: Option<u32>,
    manifest: Option<PathBuf>,
) -> Result<()> {
    let graph = load_graph(config, manifest.as_ref())?;

    let mut pool_config = config.pool_config(&command, continue_run);
    if let Some(n) = max_concurrency {
        pool_config.max_concurrency = n;
    }
    if let Some(n) = max_retries {
        pool_config.max_retries = n;
    }

    let operation = Arc::new(ShellOperation::new(&command));
    let mut pool = DynamicTaskPool::new(graph, pool_config, operation);

    // Ctrl-C cancels the run; in-flight packages stay in the checkpoint
    let token = pool.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let printer = spawn_progress_printer(&pool);
    let outcome = pool.run().await;
    printer.abort();

    match outcome {
        Ok(result) => {
            print_summary(&result);
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(PoolError::Cancelled) => {
            eprintln!(
                "{} checkpoint retained, resume with --continue",
                "cancelled:".yellow()
            );
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}

fn spawn_progress_printer(pool: &DynamicTaskPool) -> tokio::task::JoinHandle<()> {
    let mut rx = pool.events().subscribe();

    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                PoolEvent::PackageStarted { name, attempt } if attempt > 1 => {
                    println!("{} {} (attempt {})", "run ".cyan(), name, attempt);
                }
                PoolEvent::PackageStarted { name, .. } => {
                    println!("{} {}", "run ".cyan(), name);
                }
                PoolEvent::PackageCompleted { name, duration_ms } => {
                    println!("{} {} ({} ms)", "done".green(), name, duration_ms);
                }
                PoolEvent::PackageRetrying { name, attempt, delay_ms, .. } => {
                    println!("{} {} (attempt {}, retry in {} ms)", "wait".yellow(), name, attempt, delay_ms);
                }
                PoolEvent::PackageFailed { name, error, .. } => {
                    println!("{} {}: {}", "fail".red(), name, error);
                }
                PoolEvent::PackageSkipped { name, reason } => {
                    println!("{} {}: {}", "skip".yellow(), name, reason);
                }
                PoolEvent::ExecutionCompleted { .. } => break,
                _ => {}
            }
        }
    })
}

fn print_summary(result: &ExecutionResult) {
    let verdict = if result.success {
        "OK".green().bold()
    } else {
        "FAILED".red().bold()
    };

    println!(
        "\n{} {}/{} completed, {} failed, {} skipped in {} ms (peak concurrency {})",
        verdict,
        result.completed.len(),
        result.total_packages,
        result.failed.len(),
        result.skipped.len(),
        result.metrics.total_duration_ms,
        result.metrics.peak_concurrency,
    );
}

async fn status(config: &Config) -> Result<()> {
    let graph = Arc::new(load_graph(config, None)?);

    match RecoveryManager::load(graph.clone(), &config.checkpoint_dir).await? {
        Some(manager) => {
            print!("{}", manager.show_status());

            let scheduler = graphdrive::scheduler::Scheduler::new(graph);
            let next = scheduler.predict_next_ready(&manager.checkpoint().state);
            if !next.is_empty() {
                println!("Next ready once running work drains: {}", next.join(", "));
            }
        }
        None => println!("No checkpoint found"),
    }
    Ok(())
}

async fn validate(config: &Config) -> Result<()> {
    let graph = Arc::new(load_graph(config, None)?);

    match RecoveryManager::load(graph, &config.checkpoint_dir).await? {
        Some(manager) => {
            let validation = manager.validate_state();
            if validation.valid {
                println!("{} checkpoint state is consistent", "ok:".green());
            } else {
                println!("{} {} issue(s) found", "invalid:".red(), validation.issues.len());
                for issue in validation.issues {
                    println!("  - {}", issue);
                }
                std::process::exit(1);
            }
        }
        None => println!("No checkpoint found"),
    }
    Ok(())
}

async fn recover(config: &Config, options: RecoveryOptions) -> Result<()> {
    let graph = Arc::new(load_graph(config, None)?);

    let Some(mut manager) = RecoveryManager::load(graph, &config.checkpoint_dir).await? else {
        println!("No checkpoint found");
        return Ok(());
    };

    manager.apply_recovery_options(&options).await?;
    print!("{}", manager.show_status());
    Ok(())
}

async fn clean(config: &Config) -> Result<()> {
    let manager = graphdrive::checkpoint::CheckpointManager::new(&config.checkpoint_dir);
    if manager.exists() {
        manager.cleanup().await?;
        println!("Checkpoint removed");
    } else {
        println!("No checkpoint found");
    }
    Ok(())
}
