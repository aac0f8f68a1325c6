//! Tandem core library: domain types, configuration, errors.
//!
//! - [`types`]: [`CanonicalItem`], [`System`], [`Baseline`]
//! - [`config`]: `~/.tandem/config.yaml` load / save / init
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, StoreConfig};
pub use error::ConfigError;
pub use types::{Baseline, CanonicalItem, SnapshotMap, System, UserRef};
