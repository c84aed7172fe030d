//! Configuration schema for ferry.toml
//!
//! Every section is optional; a missing file or section yields the defaults
//! below. Remote paths are POSIX paths on the instance, local paths are
//! expanded against the operator's home directory.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FerryError;

/// Root configuration structure for ferry.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FerryConfig {
    pub ssh: SshConfig,
    pub remote: RemoteConfig,
    pub git: GitConfig,
    pub job: JobConfig,
    pub huggingface: HuggingFaceConfig,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
    pub cleanup: CleanupConfig,
    pub inventory: InventoryConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub keyfile: Option<PathBuf>,
    pub port: u16,
    /// Refuse unknown host keys instead of accepting them on first contact.
    pub strict_host_keys: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            keyfile: None,
            port: 22,
            strict_host_keys: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_dir: String,
    pub project_dir: String,
    /// Empty means `<project_dir>/audio`.
    pub inputs_dir: String,
    /// Empty means `<project_dir>/output`.
    pub outputs_dir: String,
    pub models_dir: String,
    pub log_file: String,
    pub session: String,
    pub bootstrap_tmp_path: String,
    pub service_user: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_dir: "/opt/ferry".to_string(),
            project_dir: "/opt/ferry/app".to_string(),
            inputs_dir: String::new(),
            outputs_dir: String::new(),
            models_dir: "/opt/ferry/models".to_string(),
            log_file: "/opt/ferry/logs/run.log".to_string(),
            session: "ferry-job".to_string(),
            bootstrap_tmp_path: "/tmp/ferry_bootstrap.sh".to_string(),
            service_user: "root".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Fill empty input/output directories from the project root.
    pub fn derive_paths(&mut self) {
        let project = self.project_dir.trim_end_matches('/').to_string();
        if self.inputs_dir.trim().is_empty() {
            self.inputs_dir = format!("{project}/audio");
        }
        if self.outputs_dir.trim().is_empty() {
            self.outputs_dir = format!("{project}/output");
        }
    }

    /// Directory holding the current and rotated job logs.
    pub fn log_dir(&self) -> &str {
        match self.log_file.rfind('/') {
            Some(0) => "/",
            Some(idx) => &self.log_file[..idx],
            None => ".",
        }
    }
}

/// Large-file storage handling during deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LfsMode {
    /// Pull LFS objects only when `.gitattributes` declares `filter=lfs`.
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub repo_url: String,
    pub branch: String,
    pub prefer_https: bool,
    pub lfs: LfsMode,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            branch: "main".to_string(),
            prefer_https: false,
            lfs: LfsMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub python_bin: String,
    /// Entry script, relative to `remote.project_dir` unless absolute.
    pub entry: String,
    pub model: Option<String>,
    pub extra_args: Vec<String>,
    /// Extra environment; values may reference `{project_dir}`, `{inputs_dir}`,
    /// `{outputs_dir}`, `{models_dir}` and `{base_dir}`.
    pub env: BTreeMap<String, String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            entry: "main.py".to_string(),
            model: None,
            extra_args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingFaceConfig {
    /// Log in once on the instance instead of exporting the token per launch.
    pub persist_login: bool,
    pub token: Option<String>,
    /// Environment variable consulted when `token` is unset.
    pub token_env: String,
    pub hf_home: String,
    pub set_git_credential: bool,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            persist_login: false,
            token: None,
            token_env: "HF_TOKEN".to_string(),
            hf_home: String::new(),
            set_git_credential: true,
        }
    }
}

impl HuggingFaceConfig {
    /// Explicit token, else the value of `token_env` in the local environment.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(&self.token_env).ok().filter(|t| !t.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub upload_local_dir: PathBuf,
    pub results_root: PathBuf,
    pub download_glob: Option<String>,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub verify_manifest: bool,
    pub manifest_name: String,
    pub require_content: bool,
    pub prefer_rsync: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_local_dir: PathBuf::from("./materials"),
            results_root: PathBuf::from("./results"),
            download_glob: None,
            max_attempts: 3,
            backoff_base_secs: 3,
            verify_manifest: true,
            manifest_name: "_manifest.txt".to_string(),
            require_content: false,
            prefer_rsync: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub mirror_on_view: bool,
    pub local_root: PathBuf,
    pub filename: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            mirror_on_view: true,
            local_root: PathBuf::from("./logs"),
            filename: "run.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub rotate_remote_logs: bool,
    pub keep_log_backups: usize,
    pub remove_remote_outputs: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            rotate_remote_logs: false,
            keep_log_backups: 5,
            remove_remote_outputs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub api_base: String,
    pub api_key_env: String,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.vultr.com/v2".to_string(),
            api_key_env: "VULTR_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StateConfig {
    /// Instance record location; defaults to `<state_dir>/ferry/instance.json`.
    pub path: Option<PathBuf>,
}

impl FerryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration invariants that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cleanup.keep_log_backups < 1 {
            return Err(FerryError::Config("cleanup.keep_log_backups must be at least 1".into()).into());
        }
        if self.transfer.max_attempts < 1 {
            return Err(FerryError::Config("transfer.max_attempts must be at least 1".into()).into());
        }
        if !is_valid_session_name(&self.remote.session) {
            return Err(FerryError::Config(format!(
                "remote.session '{}' may only contain letters, digits, '_', '.' and '-'",
                self.remote.session
            ))
            .into());
        }
        for (key, value) in [
            ("remote.base_dir", &self.remote.base_dir),
            ("remote.project_dir", &self.remote.project_dir),
            ("remote.log_file", &self.remote.log_file),
        ] {
            if !value.starts_with('/') {
                return Err(FerryError::Config(format!(
                    "{key} must be an absolute remote path, got '{value}'"
                ))
                .into());
            }
        }
        if self.transfer.manifest_name.is_empty() || self.transfer.manifest_name.contains('/') {
            return Err(FerryError::Config(
                "transfer.manifest_name must be a plain file name".into(),
            )
            .into());
        }
        Ok(())
    }
}

pub(crate) fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
