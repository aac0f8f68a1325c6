//! Tandem: keeps a document database and an issue tracker in step.
//!
//! # Usage
//!
//! ```text
//! tandem init [--documents <path>] [--tracker <path>]
//! tandem cycle [--dry-run] [--json]
//! tandem plan [--no-diff]
//! tandem status [--json]
//! tandem daemon start|stop|status|sync
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    cycle::CycleArgs, daemon::DaemonCommand, init::InitArgs, plan::PlanArgs, status::StatusArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Two-way sync between a document database and an issue tracker",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.tandem/config.yaml and create empty store files.
    Init(InitArgs),

    /// Run one reconciliation cycle in the foreground.
    Cycle(CycleArgs),

    /// Show what the next cycle would change, with description diffs.
    Plan(PlanArgs),

    /// Show the stored baseline and whether the daemon is running.
    Status(StatusArgs),

    /// Manage the background polling daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Cycle(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
