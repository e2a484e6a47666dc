//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// GraphDrive - dependency-aware parallel command executor
#[derive(Parser)]
#[command(
    name = "gd",
    about = "Run a command against every package of a dependency graph, in parallel",
    version,
    after_help = "Logs are written to: ~/.local/share/graphdrive/logs/"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run a shell command against every package in dependency order
    Run {
        /// Shell command to run per package
        #[arg(value_name = "COMMAND")]
        command: String,

        /// Maximum concurrent packages
        #[arg(short = 'j', long)]
        max_concurrency: Option<usize>,

        /// Resume from an existing checkpoint
        #[arg(long = "continue")]
        continue_run: bool,

        /// Attempts per package before a failure is permanent
        #[arg(long)]
        max_retries: Option<u32>,

        /// Package manifest path (overrides config)
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Show the status of the persisted checkpoint
    Status,

    /// Validate the checkpoint against the manifest graph
    Validate,

    /// Apply recovery actions to the checkpoint
    Recover {
        /// Requeue retriable failures
        #[arg(long)]
        retry_failed: bool,

        /// Skip every failed package (cascades to dependents)
        #[arg(long)]
        skip_failed: bool,

        /// Reset a package to pending, forgetting its history
        #[arg(long, value_name = "PKG")]
        reset: Vec<String>,

        /// Force packages into completed
        #[arg(long, value_name = "PKG")]
        mark_completed: Vec<String>,

        /// Skip packages and their dependents
        #[arg(long, value_name = "PKG")]
        skip: Vec<String>,
    },

    /// Delete the checkpoint artifact
    Clean,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["gd", "run", "npm publish", "-j", "8", "--continue"]).unwrap();

        match cli.command {
            Command::Run {
                command,
                max_concurrency,
                continue_run,
                ..
            } => {
                assert_eq!(command, "npm publish");
                assert_eq!(max_concurrency, Some(8));
                assert!(continue_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_recover_flags() {
        let cli = Cli::try_parse_from([
            "gd",
            "recover",
            "--retry-failed",
            "--reset",
            "core",
            "--mark-completed",
            "util",
            "--mark-completed",
            "cli",
        ])
        .unwrap();

        match cli.command {
            Command::Recover {
                retry_failed,
                skip_failed,
                reset,
                mark_completed,
                skip,
            } => {
                assert!(retry_failed);
                assert!(!skip_failed);
                assert_eq!(reset, vec!["core"]);
                assert_eq!(mark_completed, vec!["util", "cli"]);
                assert!(skip.is_empty());
            }
            _ => panic!("expected recover"),
        }
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["gd"]).is_err());
    }
}
