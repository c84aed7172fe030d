//! Config store for loading and saving ferry.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{
    FerryConfig, parser,
    paths::{CONFIG_ENV, config_override, resolve_config_path},
};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Resolve the config file from an optional explicit path, `FERRY_CONFIG`
    /// and the current working directory.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let chosen = config_override(explicit, std::env::var_os(CONFIG_ENV));
        let global_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("ferry");
        let working_dir = std::env::current_dir()?;

        Ok(Self::from_paths(chosen.as_deref(), &working_dir, &global_dir))
    }

    pub fn from_paths(explicit: Option<&Path>, working_dir: &Path, global_dir: &Path) -> Self {
        Self {
            config_path: resolve_config_path(explicit, working_dir, global_dir),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config; a missing file yields defaults.
    pub fn load(&self) -> anyhow::Result<FerryConfig> {
        if !self.config_path.exists() {
            tracing::debug!(
                path = %self.config_path.display(),
                "config file not found, using defaults"
            );
            let mut config = FerryConfig::new();
            config.remote.derive_paths();
            return Ok(config);
        }
        parser::parse_ferry_toml(&self.config_path)
    }

    pub fn save(&self, config: &FerryConfig) -> anyhow::Result<()> {
        let content = parser::to_toml(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
