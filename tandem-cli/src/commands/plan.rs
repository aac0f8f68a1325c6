//! `tandem plan`: preview the next cycle's writes.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tandem_sync::{preview, Orchestrator};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Hide description diffs.
    #[arg(long)]
    pub no_diff: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let plan = Orchestrator::from_config(&config, &home)
            .plan()
            .context("failed to compute plan")?;

        if plan.seeded {
            println!("{}", "No stored baseline; planning against a fresh seed.".dimmed());
        }

        let mut shown = 0usize;
        for action in plan.reconciliation.writes() {
            shown += 1;
            let current = plan.current(action.target, action.key());
            let described = preview::describe(action, current);
            println!("{}", described.headline.bold());
            for change in &described.changes {
                println!(
                    "    {}: {} → {}",
                    change.field,
                    change.from.red(),
                    change.to.green()
                );
            }
            if let (false, Some(diff)) = (self.no_diff, &described.description_diff) {
                for line in diff.lines() {
                    println!("    {line}");
                }
            }
        }
        for anomaly in &plan.reconciliation.anomalies {
            println!("{} {anomaly}", "!".yellow().bold());
        }

        if shown == 0 {
            println!("✓ Both systems agree with the baseline, nothing to do");
        } else {
            println!("{shown} write(s) pending. Run 'tandem cycle' to apply.");
        }
        Ok(())
    }
}
