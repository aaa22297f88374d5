use crate::{ConfigError, QueueConfig, CURRENT_CONFIG_VERSION};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const ORG: &str = "io";
const AUTHOR: &str = "CoveMail";
const APP: &str = "CoveMail";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from(ORG, AUTHOR, APP).ok_or(ConfigError::MissingDirectories)?;
        Self::with_dirs(dirs.config_dir(), dirs.data_dir())
    }

    /// Uses explicit directories instead of the platform ones.
    pub fn with_dirs(config_dir: &Path, data_dir: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(config_dir)?;
        fs::create_dir_all(data_dir)?;

        let config_path = config_dir.join("outbox.toml");
        if !config_path.exists() {
            let initial = QueueConfig::default();
            let content = toml::to_string_pretty(&initial)?;
            fs::write(&config_path, content)?;
            tracing::info!(path = %config_path.display(), "wrote default queue config");
        }

        Ok(Self {
            config_path,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn load(&self) -> Result<QueueConfig, ConfigError> {
        let content = fs::read_to_string(&self.config_path)?;
        let config: QueueConfig = toml::from_str(&content)?;
        if config.version > CURRENT_CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }
        Ok(config)
    }

    pub fn save(&self, config: &QueueConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory holding the lane files for `config`.
    pub fn queue_dir(&self, config: &QueueConfig) -> PathBuf {
        config
            .storage
            .directory
            .clone()
            .unwrap_or_else(|| self.data_dir.join("queue"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageMode;

    #[test]
    fn first_run_writes_defaults() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager =
            ConfigManager::with_dirs(&root.path().join("config"), &root.path().join("data"))
                .expect("manager created");

        assert!(manager.config_path().exists());
        let config = manager.load().expect("config loaded");
        assert_eq!(config, QueueConfig::default());
        assert_eq!(
            manager.queue_dir(&config),
            root.path().join("data").join("queue")
        );
    }

    #[test]
    fn saved_changes_are_loaded_back() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager =
            ConfigManager::with_dirs(&root.path().join("config"), &root.path().join("data"))
                .expect("manager created");

        let mut config = manager.load().expect("config loaded");
        config.storage.mode = StorageMode::Ephemeral;
        config.storage.directory = Some(root.path().join("elsewhere"));
        manager.save(&config).expect("config saved");

        let reloaded = manager.load().expect("config reloaded");
        assert_eq!(reloaded.storage.mode, StorageMode::Ephemeral);
        assert_eq!(manager.queue_dir(&reloaded), root.path().join("elsewhere"));
    }

    #[test]
    fn newer_config_versions_are_refused() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager =
            ConfigManager::with_dirs(&root.path().join("config"), &root.path().join("data"))
                .expect("manager created");

        let mut config = QueueConfig::default();
        config.version = CURRENT_CONFIG_VERSION + 1;
        manager.save(&config).expect("config saved");

        assert!(matches!(
            manager.load(),
            Err(ConfigError::UnsupportedVersion { .. })
        ));
    }
}
