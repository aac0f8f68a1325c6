//! Baseline store: the single slot holding the last reconciled snapshot.
//!
//! [`JsonBaselineStore`] persists a [`StoredBaseline`] JSON document at
//! `<home>/.tandem/baseline.json` so reconciliation history survives a
//! restart. Writes use the same atomic `.tmp` + rename pattern as the config.
//! [`MemoryBaselineStore`] keeps it in process memory only.
//!
//! Neither store is safe for concurrent writers; the orchestrator is the
//! only writer and runs one cycle at a time.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_core::config::tandem_root;
use tandem_core::Baseline;

use crate::error::{io_err, SyncError};

/// On-disk baseline payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredBaseline {
    /// Start time of the cycle that produced this baseline.
    pub synced_at: DateTime<Utc>,
    #[serde(flatten)]
    pub baseline: Baseline,
}

impl StoredBaseline {
    pub fn new(synced_at: DateTime<Utc>, baseline: Baseline) -> Self {
        Self {
            synced_at,
            baseline,
        }
    }
}

/// Single-slot storage for the baseline. `Ok(None)` means no cycle has ever
/// completed and triggers first-run seeding.
pub trait BaselineStore: Send {
    fn load(&self) -> Result<Option<StoredBaseline>, SyncError>;
    fn save(&self, stored: &StoredBaseline) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// `<home>/.tandem/baseline.json`
pub fn baseline_path_at(home: &Path) -> PathBuf {
    tandem_root(home).join("baseline.json")
}

#[derive(Debug, Clone)]
pub struct JsonBaselineStore {
    path: PathBuf,
}

impl JsonBaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location under `home`.
    pub fn at(home: &Path) -> Self {
        Self::new(baseline_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BaselineStore for JsonBaselineStore {
    fn load(&self) -> Result<Option<StoredBaseline>, SyncError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        let stored = serde_json::from_str::<StoredBaseline>(&contents)?;
        Ok(Some(stored))
    }

    /// Writes to `<path>.tmp` then renames to `<path>`.
    fn save(&self, stored: &StoredBaseline) -> Result<(), SyncError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid baseline path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(stored)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        tracing::debug!(
            "saved baseline ({} items) to {}",
            stored.baseline.len(),
            self.path.display()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Volatile store: history is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    slot: Mutex<Option<StoredBaseline>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self) -> Result<Option<StoredBaseline>, SyncError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, stored: &StoredBaseline) -> Result<(), SyncError> {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(stored.clone());
        Ok(())
    }
}
