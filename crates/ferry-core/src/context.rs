//! Application context for unified dependency injection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ConfigStore, FerryConfig, default_state_path};
use crate::remote::{SshShell, SshTarget};
use crate::state::{InstanceRef, InstanceStateStore};
use crate::transfer::RetryPolicy;
use crate::transport::{Negotiation, SshTransport};

/// Loaded configuration plus the locations every stage shares.
///
/// Frontends build this once per invocation and derive per-instance
/// shells and transports from it.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: FerryConfig,
    config_path: PathBuf,
    state_path: PathBuf,
}

impl AppContext {
    pub fn new(config: FerryConfig, config_path: PathBuf, state_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
            state_path,
        }
    }

    /// Resolve and load `ferry.toml`, expand `~`, and locate the state file.
    pub fn load(explicit_config: Option<&Path>) -> anyhow::Result<Self> {
        let store = ConfigStore::discover(explicit_config)?;
        let mut config = store.load()?;
        config.expand_local_paths(dirs::home_dir().as_deref());
        let state_path = match &config.state.path {
            Some(path) => path.clone(),
            None => default_state_path()?,
        };
        tracing::debug!(
            config = %store.config_path().display(),
            state = %state_path.display(),
            "context loaded"
        );
        Ok(Self::new(config, store.config_path().to_path_buf(), state_path))
    }

    pub fn config(&self) -> &FerryConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn state_store(&self) -> InstanceStateStore {
        InstanceStateStore::new(self.state_path.clone())
    }

    /// The selected instance, or a typed error directing re-selection.
    pub fn require_instance(&self) -> anyhow::Result<InstanceRef> {
        self.state_store().require()
    }

    pub fn ssh_target(&self, instance: &InstanceRef) -> SshTarget {
        SshTarget::from_config(&self.config.ssh, instance)
    }

    pub fn shell(&self, instance: &InstanceRef) -> SshShell {
        SshShell::new(self.ssh_target(instance))
    }

    /// Transport for the strategy a [`Negotiation`] settled on.
    pub fn transport(&self, instance: &InstanceRef, negotiation: &Negotiation) -> SshTransport {
        SshTransport::new(
            self.ssh_target(instance),
            negotiation.strategy,
            negotiation.local_rsync.clone(),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.transfer.max_attempts,
            Duration::from_secs(self.config.transfer.backoff_base_secs),
        )
    }
}
