//! Remote environment bootstrap.
//!
//! One embedded provisioning script is pushed to a temporary path on the
//! instance and run with a fixed environment contract. Its stdout carries
//! `STATUS:` lines that become a [`HealthReport`]. A non-zero exit means the
//! script itself aborted; individual failed checks only degrade `OVERALL`.

pub mod health;

use serde::Serialize;

use crate::config::FerryConfig;
use crate::error::FerryError;
use crate::remote::{EnvOverlay, RemoteShell, sh_quote};

pub use health::{HealthCheck, HealthReport, HealthStatus, OVERALL, parse_status_line};

/// The provisioning script shipped with ferry.
pub const BOOTSTRAP_SCRIPT: &str = include_str!("../../assets/bootstrap.sh");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub upload: StageStatus,
    pub execution: StageStatus,
    pub exit_code: i32,
    pub health: HealthReport,
    /// Environment handed to the script, sensitive values masked.
    pub environment: Vec<(String, String)>,
}

impl BootstrapReport {
    /// Fail when the script aborted rather than completing its checks.
    pub fn ensure_completed(&self) -> anyhow::Result<()> {
        if self.exit_code != 0 {
            return Err(FerryError::BootstrapAborted {
                exit_code: self.exit_code,
            }
            .into());
        }
        Ok(())
    }
}

/// Script inputs derived from configuration.
pub fn bootstrap_env(config: &FerryConfig) -> EnvOverlay {
    let remote = &config.remote;
    let hf = &config.huggingface;
    let flag = |b: bool| if b { "true" } else { "false" };
    EnvOverlay::new()
        .with("BASE_DIR", remote.base_dir.as_str())
        .with("PROJECT_DIR", remote.project_dir.as_str())
        .with("INPUTS_DIR", remote.inputs_dir.as_str())
        .with("OUTPUTS_DIR", remote.outputs_dir.as_str())
        .with("MODELS_DIR", remote.models_dir.as_str())
        .with("LOG_FILE", remote.log_file.as_str())
        .with("SERVICE_USER", remote.service_user.as_str())
        .with("PERSIST_HF_LOGIN", flag(hf.persist_login))
        .with("HF_TOKEN_FROM_AGENT", hf.resolved_token().unwrap_or_default())
        .with("HF_HOME", hf.hf_home.as_str())
        .with("SET_HF_GIT_CREDENTIAL", flag(hf.set_git_credential))
}

pub struct BootstrapOrchestrator<'a> {
    shell: &'a dyn RemoteShell,
    tmp_path: String,
    script: String,
}

impl<'a> BootstrapOrchestrator<'a> {
    pub fn new(shell: &'a dyn RemoteShell, tmp_path: impl Into<String>) -> Self {
        Self {
            shell,
            tmp_path: tmp_path.into(),
            script: BOOTSTRAP_SCRIPT.to_string(),
        }
    }

    /// Replace the embedded script.
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    /// Push and run the script. Connection failures and upload errors are
    /// returned as `Err`; a script abort is reported in the result and
    /// surfaced by [`BootstrapReport::ensure_completed`].
    pub fn run(&self, env: &EnvOverlay) -> anyhow::Result<BootstrapReport> {
        let environment = env.masked();
        tracing::info!(host = %self.shell.describe(), path = %self.tmp_path, "uploading bootstrap script");

        // LF line endings regardless of how the script was checked out.
        let script = self.script.replace("\r\n", "\n");
        self.shell.push_file(script.as_bytes(), &self.tmp_path)?;
        let upload = StageStatus {
            status: HealthStatus::Ok,
            message: format!("script uploaded to {}", self.tmp_path),
        };

        tracing::info!(env = %env.to_masked_prefix(), "running bootstrap script");
        let command = format!("bash {}", sh_quote(&self.tmp_path)?);
        let output = self.shell.exec(&command, env)?;

        let mut health = HealthReport::parse(&output.stdout);
        if !output.success() {
            health.mark_aborted(output.status);
        }
        for check in &health.checks {
            match check.status {
                HealthStatus::Fail => {
                    tracing::warn!(check = %check.name, message = %check.message, "health check failed")
                }
                _ => tracing::info!(check = %check.name, status = %check.status, message = %check.message, "health check"),
            }
        }

        let execution = if output.success() {
            StageStatus {
                status: HealthStatus::Ok,
                message: "exit code 0".to_string(),
            }
        } else {
            let detail = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .trim();
            tracing::warn!(exit_code = output.status, %detail, "bootstrap script aborted");
            StageStatus {
                status: HealthStatus::Fail,
                message: format!("exit code {}: {}", output.status, detail),
            }
        };

        Ok(BootstrapReport {
            upload,
            execution,
            exit_code: output.status,
            health,
            environment,
        })
    }
}
