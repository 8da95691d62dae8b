//! Locus CLI - Command-line interface
//!
//! Drives the locus position manager against a scripted simulated source.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::ladder::LadderArgs;
use commands::simulate::SimulateArgs;
use error::CliError;
use runner::{load_config, CliRunner};

#[derive(Parser)]
#[command(name = "locus")]
#[command(version = locus::VERSION)]
#[command(about = "Shared, coalescing position acquisition", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.locus/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent requests against a scripted position source
    Simulate(SimulateArgs),
    /// Print the degradation ladder for a tier and interval modifier
    Ladder(LadderArgs),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Simulate(args) => {
            // Keep stdout clean for JSON output
            let stdout_logging = cli.debug && !args.json;
            let runner = CliRunner::new(cli.config.as_deref(), cli.debug, stdout_logging)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(CliError::Runtime)?;
            runtime.block_on(commands::simulate::run(args, &runner))
        }
        Commands::Ladder(args) => {
            let config = load_config(cli.config.as_deref())?;
            commands::ladder::run(args, &config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_arguments() {
        let cli = Cli::try_parse_from([
            "locus",
            "simulate",
            "--callers",
            "5",
            "--fix",
            "1:50",
            "--fix",
            "2.5:4",
            "--desired-accuracy",
            "best",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.callers, 5);
                assert_eq!(args.fixes.len(), 2);
                assert_eq!(args.desired_accuracy, Some(locus::AccuracyTier::Best));
                assert!(args.json);
            }
            Commands::Ladder(_) => panic!("Expected simulate"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_tier() {
        assert!(Cli::try_parse_from(["locus", "ladder", "--tier", "exact"]).is_err());
    }
}
