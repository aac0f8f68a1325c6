//! `tandem cycle [--dry-run] [--json]`: one reconciliation cycle.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tandem_sync::{Orchestrator, Reconciliation};

#[derive(Args, Debug)]
pub struct CycleArgs {
    /// Fetch and reconcile, but apply and persist nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the cycle summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl CycleArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let mut orchestrator = Orchestrator::from_config(&config, &home);

        if self.dry_run {
            let plan = orchestrator.plan().context("dry-run cycle failed")?;
            print_dry_run(&plan.reconciliation);
            return Ok(());
        }

        let report = orchestrator.run_cycle().context("cycle failed")?;
        let summary = report.summary();
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to serialize summary")?
            );
            return Ok(());
        }

        let mut note = String::new();
        if summary.seeded {
            note.push_str(" (seeded new baseline)");
        }
        println!("✓ cycle finished{note}: {summary}");
        for outcome in &report.outcomes {
            if let Err(err) = &outcome.result {
                println!("  {} {}: {err}", "✗".red().bold(), outcome.action);
            }
            if let Some(err) = &outcome.link_error {
                println!("  {} {}: link-back failed: {err}", "!".yellow().bold(), outcome.action);
            }
        }
        for anomaly in &report.reconciliation.anomalies {
            println!("  {} {anomaly}", "!".yellow().bold());
        }
        Ok(())
    }
}

fn print_dry_run(reconciliation: &Reconciliation) {
    let writes: Vec<_> = reconciliation.writes().collect();
    if writes.is_empty() {
        println!("[dry-run] ✓ nothing to do");
    }
    for action in writes {
        println!("[dry-run] {action}");
    }
    for anomaly in &reconciliation.anomalies {
        println!("[dry-run] {} {anomaly}", "!".yellow().bold());
    }
}
