//! Configuration loading for ferry.toml
//!
//! Resolution order is `--config <path>`, then `./ferry.toml`, then
//! `<config_dir>/ferry/ferry.toml`. A missing file yields defaults.

pub mod parser;
pub mod paths;
pub mod schema;
pub mod store;

use std::path::Path;

pub use parser::{parse_ferry_toml, parse_ferry_toml_str, to_toml};
pub use paths::{
    CONFIG_ENV, config_override, default_state_path, expand_home, resolve_config_path,
};
pub use schema::{
    CleanupConfig, FerryConfig, GitConfig, HuggingFaceConfig, InventoryConfig, JobConfig,
    LfsMode, LoggingConfig, RemoteConfig, SshConfig, StateConfig, TransferConfig,
};
pub use store::ConfigStore;

impl FerryConfig {
    /// Expand `~` in every local path against `home`.
    pub fn expand_local_paths(&mut self, home: Option<&Path>) {
        if let Some(keyfile) = self.ssh.keyfile.as_mut() {
            *keyfile = expand_home(keyfile, home);
        }
        self.transfer.upload_local_dir = expand_home(&self.transfer.upload_local_dir, home);
        self.transfer.results_root = expand_home(&self.transfer.results_root, home);
        self.logging.local_root = expand_home(&self.logging.local_root, home);
        if let Some(path) = self.state.path.as_mut() {
            *path = expand_home(path, home);
        }
    }
}
