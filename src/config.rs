use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::constant;

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
}

impl CoordinatorConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub context_limit: usize,
    pub history_capacity: usize,
    pub signal_capacity: usize,
    pub split_inline_reasoning: bool,
    pub reasoning_enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            context_limit: 10,
            history_capacity: 200,
            signal_capacity: 256,
            split_inline_reasoning: true,
            reasoning_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct HenzaiConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl HenzaiConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(constant::DEFAULT_CONFIG_PATH))
    }

    /// Loads the config file (writing the template first if it is missing)
    /// and applies `HENZAI__SECTION__KEY` environment overrides.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => {
                let default_path =
                    Self::default_path().context("no user config directory available")?;
                log::warn!("config path not given, falling back to {:?}", default_path);
                default_path
            }
        };

        if !path.exists() {
            log::warn!("{:?} not found, generating a new config file", path);
            Self::create_file(&path)?;
        }

        let settings = Config::builder()
            .add_source(File::from(path.clone()))
            .add_source(
                Environment::with_prefix(constant::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read config {:?}", path))?;

        log::info!("config loaded: {:?}", path);
        Ok(settings.try_deserialize::<HenzaiConfig>()?)
    }

    /// Parses a config document held in memory, without environment overrides.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;

        Ok(settings.try_deserialize::<HenzaiConfig>()?)
    }

    pub fn create_file(path: &Path) -> Result<()> {
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir)?;
        }

        fs::write(path, constant::DEFAULT_CONFIG_TOML)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_matches_defaults() {
        let config = HenzaiConfig::from_toml(constant::DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config, HenzaiConfig::default());
        assert_eq!(config.coordinator.call_timeout(), None);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = HenzaiConfig::from_toml("[service]\ncontext_limit = 4\n").unwrap();
        assert_eq!(config.service.context_limit, 4);
        assert_eq!(config.service.signal_capacity, 256);
        assert!(config.service.split_inline_reasoning);
        assert!(config.service.reasoning_enabled);
        assert_eq!(config.coordinator, CoordinatorConfig::default());
    }

    #[test]
    fn load_writes_template_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = HenzaiConfig::load(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(config.service, ServiceConfig::default());
    }

    #[test]
    fn load_reads_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[coordinator]\ncall_timeout_secs = 5\n").unwrap();

        let config = HenzaiConfig::load(Some(path)).unwrap();
        assert_eq!(config.coordinator.call_timeout(), Some(Duration::from_secs(5)));
    }
}
