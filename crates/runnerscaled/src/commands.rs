use std::path::Path;

use anyhow::Context;
use tracing::info;

use runnerscale_core::RunnerscaleConfig;
use runnerscale_state::StateStore;

pub mod apply;
pub mod resource;
pub mod run;

const DB_FILE: &str = "runnerscale.redb";

/// Load the config file if one was given, else the built-in defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RunnerscaleConfig> {
    match path {
        Some(path) => RunnerscaleConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(RunnerscaleConfig::default()),
    }
}

pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join(DB_FILE);
    let state = StateStore::open(&db_path)
        .with_context(|| format!("opening state store at {}", db_path.display()))?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

/// Validate a `namespace/name` reference.
pub fn object_ref(raw: &str) -> anyhow::Result<&str> {
    match raw.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => Ok(raw),
        _ => anyhow::bail!("expected namespace/name, got {raw:?}"),
    }
}
