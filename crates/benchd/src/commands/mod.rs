//! Subcommand implementations.

pub mod network;
pub mod plan;
pub mod provision;
pub mod quota;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bench_core::BenchConfig;
use benchgrid_state::{KvStore, StateStore};
use tracing::debug;

const STATE_FILE: &str = "benchgrid.redb";

pub(crate) fn state_path(config: &BenchConfig) -> PathBuf {
    config.state.data_dir.join(STATE_FILE)
}

/// Open the persistent store under `state.data_dir`, creating the directory if needed.
pub(crate) fn open_store(config: &BenchConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    std::fs::create_dir_all(&config.state.data_dir)
        .with_context(|| format!("creating {}", config.state.data_dir.display()))?;
    let path = state_path(config);
    debug!(path = %path.display(), "opening state store");
    let store = StateStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

pub(crate) fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
