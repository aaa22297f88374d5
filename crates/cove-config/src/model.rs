use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    pub version: u32,
    pub storage: StorageConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Lanes are written to disk after every mutation.
    Durable,
    /// Lanes live in memory only, for contexts that must not outlive the process.
    Ephemeral,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// Overrides the platform data directory for lane files.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    pub primary_lane_file: String,
    pub secondary_lane_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    pub max_server_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    /// Zero disables the per-dispatch timeout.
    pub handler_timeout_secs: u64,
    pub background_threshold_secs: u64,
    pub fetch_detail_after_restart: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Durable,
            directory: None,
            primary_lane_file: "primary-lane.json".to_string(),
            secondary_lane_file: "secondary-lane.json".to_string(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_server_retries: 3,
            retry_backoff_ms: 500,
            max_retry_backoff_ms: 30_000,
            handler_timeout_secs: 120,
            background_threshold_secs: 3,
            fetch_detail_after_restart: true,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            storage: StorageConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_survives_toml() {
        let config = QueueConfig::default();
        let text = toml::to_string_pretty(&config).expect("config serialized");
        let parsed: QueueConfig = toml::from_str(&text).expect("config parsed");
        assert_eq!(parsed, config);
    }

    #[test]
    fn ephemeral_mode_parses_without_directory() {
        let parsed: QueueConfig = toml::from_str(
            r#"
            version = 1

            [storage]
            mode = "ephemeral"
            primary_lane_file = "a.json"
            secondary_lane_file = "b.json"

            [dispatch]
            max_server_retries = 5
            retry_backoff_ms = 0
            max_retry_backoff_ms = 0
            handler_timeout_secs = 0
            background_threshold_secs = 1
            fetch_detail_after_restart = false
            "#,
        )
        .expect("config parsed");
        assert_eq!(parsed.storage.mode, StorageMode::Ephemeral);
        assert!(parsed.storage.directory.is_none());
        assert_eq!(parsed.dispatch.max_server_retries, 5);
    }
}
