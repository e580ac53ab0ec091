use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use crate::commands::purge::{self, PurgeOptions};
use crate::commands::run::{self, RunOptions};
use crate::commands::status::{self, StatusOptions};
use crate::commands::CommandReport;

#[derive(Debug, Parser)]
#[command(
    name = "restat",
    version,
    about = "Recovers statement PDFs from remote zip archives and files them by purchase-order code."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover unprocessed archives and run the recovery pipeline.
    Run {
        /// Override the configured archive key prefix for this run.
        #[arg(long)]
        prefix: Option<String>,
        /// Discovery only: report which archives would be processed.
        #[arg(long)]
        dry_run: bool,
    },
    /// Summarize the durable ledger, or export it line by line.
    Status {
        /// Print one archiveKey|token line per recovered document.
        #[arg(long)]
        export: bool,
    },
    /// Delete every recovered object under the by-po/ prefix.
    Purge {
        /// Actually delete; without this the command refuses to run.
        #[arg(long)]
        yes: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let report = match cli.command {
        Command::Run { prefix, dry_run } => {
            runtime.block_on(run::run(&RunOptions { prefix, dry_run }))?
        }
        Command::Status { export } => {
            runtime.block_on(status::run(&StatusOptions { export }))?
        }
        Command::Purge { yes } => runtime.block_on(purge::run(&PurgeOptions { yes }))?,
    };

    print_report(&report)
}

fn print_report(report: &CommandReport) -> Result<()> {
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        eprintln!("issue: {issue}");
    }
    if report.ok {
        Ok(())
    } else {
        Err(anyhow!(
            "{} completed with {} issue(s)",
            report.command,
            report.issues.len()
        ))
    }
}
