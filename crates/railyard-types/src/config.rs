//! Worker configuration, loaded from `{data_dir}/railyard.toml`.
//!
//! Every field has a default so a missing or partial file still yields a
//! usable configuration.

use serde::{Deserialize, Serialize};

/// Configuration for one worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// SQLite database URL. `None` derives it from the data directory.
    pub database_url: Option<String>,
    /// Execution cluster name (mutex scoping, task launches, scale-down).
    pub cluster: String,
    /// Seconds between queued→pending promotion sweeps.
    pub promote_interval_secs: u64,
    /// Seconds between stale-pending / orphaned-running recovery sweeps.
    pub recovery_interval_secs: u64,
    /// Seconds between idle-capacity scale-down checks.
    pub scale_down_interval_secs: u64,
    /// How long an action may sit PENDING without a task arn before it is
    /// returned to QUEUED.
    pub pending_grace_secs: u64,
    /// Ledger rows older than this many days are purged.
    pub message_retention_days: u32,
    /// Long-poll bound for queue receive.
    pub queue_wait_secs: u64,
    /// Rows per multi-row INSERT during subscription generation.
    pub generation_batch_size: usize,
    /// Mutex acquisition timeout for launch / scale-down critical sections.
    pub lock_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            cluster: "railyard".to_string(),
            promote_interval_secs: 5,
            recovery_interval_secs: 60,
            scale_down_interval_secs: 300,
            pending_grace_secs: 300,
            message_retention_days: 14,
            queue_wait_secs: 10,
            generation_batch_size: 100,
            lock_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.cluster, "railyard");
        assert_eq!(config.message_retention_days, 14);
        assert_eq!(config.generation_batch_size, 100);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
cluster = "prod-east"
pending_grace_secs = 120
"#,
        )
        .unwrap();
        assert_eq!(config.cluster, "prod-east");
        assert_eq!(config.pending_grace_secs, 120);
        assert_eq!(config.promote_interval_secs, 5);
    }
}
