pub mod cycle;
pub mod daemon;
pub mod init;
pub mod plan;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};

use tandem_core::{config, Config};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_config(home: &std::path::Path) -> Result<Config> {
    config::load_with_env_at(home).context("failed to load tandem config")
}
