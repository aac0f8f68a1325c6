//! `tandem init [--documents <path>] [--tracker <path>]`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use tandem_core::config::{self, tandem_root};
use tandem_sync::local::{write_store, StoreFile};
use tandem_sync::ReferenceData;

/// Create the config and any missing store files.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Document store file. Defaults to ~/.tandem/stores/documents.json.
    #[arg(long)]
    pub documents: Option<PathBuf>,

    /// Tracker store file. Defaults to ~/.tandem/stores/tracker.json.
    #[arg(long)]
    pub tracker: Option<PathBuf>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let stores = tandem_root(&home).join("stores");
        let documents = self
            .documents
            .unwrap_or_else(|| stores.join("documents.json"));
        let tracker = self.tracker.unwrap_or_else(|| stores.join("tracker.json"));

        let config = config::init_at(&home, documents, tracker)
            .context("failed to write tandem config")?;
        for path in [&config.documents.path, &config.tracker.path] {
            create_store_if_missing(path)?;
        }

        println!("✓ Config saved to {}", config::config_path_at(&home).display());
        println!("  documents: {}", config.documents.path.display());
        println!("  tracker:   {}", config.tracker.path.display());
        Ok(())
    }
}

fn create_store_if_missing(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let store = StoreFile {
        reference: starter_reference(),
        ..Default::default()
    };
    write_store(path, &store).with_context(|| format!("failed to create {}", path.display()))
}

fn starter_reference() -> ReferenceData {
    ReferenceData {
        statuses: [
            ("To Do".to_string(), "todo".to_string()),
            ("In Progress".to_string(), "in-progress".to_string()),
            ("Done".to_string(), "done".to_string()),
        ]
        .into(),
        ..Default::default()
    }
}
