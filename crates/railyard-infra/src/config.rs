//! Configuration loading from `{data_dir}/railyard.toml`.

use std::path::Path;

use railyard_types::config::WorkerConfig;

/// The data directory from `RAILYARD_DATA_DIR`, falling back to
/// `~/.railyard`.
pub fn default_data_dir() -> String {
    std::env::var("RAILYARD_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.railyard")
    })
}

/// Load the worker configuration from `railyard.toml` in the data
/// directory. A missing file yields the defaults; a malformed file is an
/// error rather than a silent fallback.
pub fn load(data_dir: &str) -> anyhow::Result<WorkerConfig> {
    let path = Path::new(data_dir).join("railyard.toml");
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(WorkerConfig::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    let config: WorkerConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("malformed config {}: {e}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// The database URL from config, or derived from the data directory.
pub fn database_url(config: &WorkerConfig, data_dir: &str) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| format!("sqlite://{data_dir}/railyard.db"))
}
