//! Loader configuration, read from YAML with every field defaulted.

use crate::selector::SelectorThresholds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Pause before each deferred background upgrade.
    #[serde(default = "default_upgrade_delay_ms")]
    pub background_upgrade_delay_ms: u64,
    /// Load levels after the first successful one in the background.
    #[serde(default = "default_true")]
    pub defer_upgrades: bool,
    #[serde(default)]
    pub selector: SelectorThresholds,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            background_upgrade_delay_ms: default_upgrade_delay_ms(),
            defer_upgrades: true,
            selector: SelectorThresholds::default(),
        }
    }
}

fn default_upgrade_delay_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl LoaderConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded loader config");
        Ok(config)
    }

    pub fn background_upgrade_delay(&self) -> Duration {
        Duration::from_millis(self.background_upgrade_delay_ms)
    }
}
