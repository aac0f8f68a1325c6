//! `tandem status`: baseline contents and daemon visibility.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use tandem_core::{CanonicalItem, System};
use tandem_daemon::protocol::CMD_STATUS;
use tandem_daemon::{send_request, DaemonRequest};
use tandem_sync::{BaselineStore, JsonBaselineStore};

/// Arguments for `tandem status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let store = JsonBaselineStore::at(&home);
        let stored = store
            .load()
            .with_context(|| format!("failed to read baseline at {}", store.path().display()))?;

        let report = StatusJson {
            documents: config.store(System::Documents).path.display().to_string(),
            tracker: config.store(System::Tracker).path.display().to_string(),
            daemon_running: daemon_running(&home),
            synced_at: stored.as_ref().map(|s| s.synced_at.to_rfc3339()),
            items: stored
                .map(|s| s.baseline.items.iter().map(ItemJson::from).collect())
                .unwrap_or_default(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&report);
        Ok(())
    }
}

fn daemon_running(home: &Path) -> bool {
    send_request(home, &DaemonRequest::new(CMD_STATUS)).is_ok_and(|response| response.ok)
}

#[derive(Serialize)]
struct StatusJson {
    documents: String,
    tracker: String,
    daemon_running: bool,
    synced_at: Option<String>,
    items: Vec<ItemJson>,
}

#[derive(Serialize)]
struct ItemJson {
    key: String,
    title: String,
    status: String,
    document_id: String,
    tracker_id: String,
}

impl From<&CanonicalItem> for ItemJson {
    fn from(item: &CanonicalItem) -> Self {
        Self {
            key: item.key().unwrap_or_default().to_string(),
            title: item.title.clone(),
            status: item.status.clone(),
            document_id: item.id.clone(),
            tracker_id: item.secondary_id.clone(),
        }
    }
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "document")]
    document_id: String,
    #[tabled(rename = "tracker")]
    tracker_id: String,
}

fn print_table(report: &StatusJson) {
    println!("documents: {}", report.documents);
    println!("tracker:   {}", report.tracker);
    let daemon = if report.daemon_running {
        "running".green().bold()
    } else {
        "stopped".dimmed()
    };
    println!("daemon:    {daemon}");

    let Some(synced_at) = report.synced_at.as_deref() else {
        println!("{}", "Never synced. Run `tandem cycle` or start the daemon.".yellow());
        return;
    };
    println!("last sync: {synced_at}");

    if report.items.is_empty() {
        println!("Baseline is empty.");
        return;
    }

    let rows: Vec<ItemRow> = report
        .items
        .iter()
        .map(|item| ItemRow {
            key: item.key.clone(),
            title: item.title.clone(),
            status: item.status.clone(),
            document_id: item.document_id.clone(),
            tracker_id: item.tracker_id.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{} item(s) in baseline", report.items.len());
}
