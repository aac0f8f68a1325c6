//! Daemon configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tandem/
//!   config.yaml      (mode 0600, written by `tandem init`)
//!   baseline.json    (last reconciled snapshot, owned by tandem-sync)
//!   daemon.sock      (control socket while the daemon runs)
//! ```
//!
//! # API pattern
//!
//! Every function that touches the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Environment overrides are applied by [`Config::apply_env`], which takes a
//! lookup closure so tests never touch the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::System;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_REFERENCE_TTL_SECS: u64 = 3600;
pub const DEFAULT_RETIRE_AFTER: u32 = 3;

pub const ENV_POLL_INTERVAL: &str = "TANDEM_POLL_INTERVAL";
pub const ENV_REFERENCE_TTL: &str = "TANDEM_REFERENCE_TTL";

/// Where one system's records live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Root of `~/.tandem/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reference_ttl")]
    pub reference_ttl_secs: u64,
    /// Cycles an entry may be missing from both systems before it is
    /// dropped from the baseline. `null` keeps such entries forever.
    #[serde(default = "default_retire_after")]
    pub retire_after: Option<u32>,
    pub documents: StoreConfig,
    pub tracker: StoreConfig,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_reference_ttl() -> u64 {
    DEFAULT_REFERENCE_TTL_SECS
}

fn default_retire_after() -> Option<u32> {
    Some(DEFAULT_RETIRE_AFTER)
}

impl Config {
    /// Config with defaults and the two store locations.
    pub fn new(documents: PathBuf, tracker: PathBuf) -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            reference_ttl_secs: DEFAULT_REFERENCE_TTL_SECS,
            retire_after: Some(DEFAULT_RETIRE_AFTER),
            documents: StoreConfig { path: documents },
            tracker: StoreConfig { path: tracker },
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reference_ttl(&self) -> Duration {
        Duration::from_secs(self.reference_ttl_secs)
    }

    pub fn store(&self, system: System) -> &StoreConfig {
        match system {
            System::Documents => &self.documents,
            System::Tracker => &self.tracker,
        }
    }

    /// Apply `TANDEM_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_POLL_INTERVAL) {
            self.poll_interval_secs = parse_secs(ENV_POLL_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(ENV_REFERENCE_TTL) {
            self.reference_ttl_secs = parse_secs(ENV_REFERENCE_TTL, &value)?;
        }
        Ok(())
    }

    /// Reject configs the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.documents.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "documents.path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.tracker.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "tracker.path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.documents.path == self.tracker.path {
            return Err(ConfigError::Invalid {
                field: "tracker.path",
                reason: "documents and tracker must use different stores".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        })
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.tandem/`
pub fn tandem_root(home: &Path) -> PathBuf {
    home.join(".tandem")
}

/// `<home>/.tandem/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    tandem_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.tandem/config.yaml` without env overrides.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// Load from `home`, then apply the process environment.
pub fn load_with_env_at(home: &Path) -> Result<Config, ConfigError> {
    let mut config = load_at(home)?;
    config.apply_env(|var| std::env::var(var).ok())?;
    config.validate()?;
    Ok(config)
}

/// `load_with_env_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_with_env_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.tandem/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    ensure_root_at(home)?;
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Write a default config pointing at the two store files.
///
/// Idempotent: if a config already exists, loads and returns it unchanged.
pub fn init_at(home: &Path, documents: PathBuf, tracker: PathBuf) -> Result<Config, ConfigError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    let config = Config::new(documents, tracker);
    config.validate()?;
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(documents: PathBuf, tracker: PathBuf) -> Result<Config, ConfigError> {
    init_at(&home()?, documents, tracker)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

/// Create `<home>/.tandem/` (mode `0700`) if it does not yet exist.
pub fn ensure_root_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = tandem_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
