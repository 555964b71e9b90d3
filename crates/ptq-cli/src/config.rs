use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Cap on total requests per commit set, as a multiple of the group's
    /// initial repetition count.
    pub max_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_factor: 3.0 }
    }
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig { path: "ptq.db".to_string() },
            retry: RetryConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("serialize config")?;
        std::fs::write(path, raw).with_context(|| format!("write config {}", path.display()))?;
        Ok(())
    }
}
