//! OpenSSH-backed remote shell.

use std::path::PathBuf;
use std::process::Command;

use crate::config::SshConfig;
use crate::error::{FerryError, classify_connectivity};
use crate::state::InstanceRef;

use super::process::{run_captured, run_streaming};
use super::{
    CancelToken, CommandOutput, EnvOverlay, RemoteShell, StreamOutcome, push_file_script,
    script_summary, sh_quote,
};

/// Exit status ssh uses for its own failures.
const SSH_FAILURE: i32 = 255;

/// Connection parameters for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub keyfile: Option<PathBuf>,
    pub strict_host_keys: bool,
}

impl SshTarget {
    pub fn from_config(config: &SshConfig, instance: &InstanceRef) -> Self {
        Self {
            user: config.user.clone(),
            host: instance.primary_ip.clone(),
            port: config.port,
            keyfile: config.keyfile.clone(),
            strict_host_keys: config.strict_host_keys,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host:path` operand for scp/rsync.
    pub fn remote_operand(&self, path: &str) -> String {
        format!("{}:{}", self.destination(), path)
    }

    fn common_options(&self) -> Vec<String> {
        let host_keys = if self.strict_host_keys {
            "StrictHostKeyChecking=yes"
        } else {
            "StrictHostKeyChecking=accept-new"
        };
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            host_keys.to_string(),
        ];
        if let Some(keyfile) = &self.keyfile {
            args.push("-i".to_string());
            args.push(keyfile.to_string_lossy().into_owned());
        }
        args
    }

    /// Options for `ssh`, excluding the destination.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args
    }

    /// Options for `scp`, which spells the port flag `-P`.
    pub fn scp_args(&self) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args
    }

    /// Remote shell string for `rsync -e`.
    pub fn rsync_rsh(&self) -> anyhow::Result<String> {
        let mut parts = vec!["ssh".to_string()];
        for arg in self.ssh_args() {
            parts.push(sh_quote(&arg)?.into_owned());
        }
        Ok(parts.join(" "))
    }

    /// Map an ssh-level failure to a typed connectivity error.
    pub fn connectivity_error(&self, output: &CommandOutput) -> Option<FerryError> {
        let kind = classify_connectivity(&output.stderr)?;
        Some(FerryError::Connectivity {
            kind,
            host: self.host.clone(),
            detail: output.stderr.trim().to_string(),
        })
    }
}

/// Remote command wrapper: `K=V ... bash -c '<script>'`.
pub fn remote_command(script: &str, env: &EnvOverlay) -> anyhow::Result<String> {
    Ok(format!("{}bash -c {}", env.to_shell_prefix()?, sh_quote(script)?))
}

#[derive(Debug, Clone)]
pub struct SshShell {
    target: SshTarget,
}

impl SshShell {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.target.ssh_args())
            .arg(self.target.destination())
            .arg(remote);
        cmd
    }

    fn checked(&self, output: CommandOutput) -> anyhow::Result<CommandOutput> {
        if output.status == SSH_FAILURE
            && let Some(err) = self.target.connectivity_error(&output)
        {
            return Err(err.into());
        }
        Ok(output)
    }
}

impl RemoteShell for SshShell {
    fn describe(&self) -> String {
        self.target.destination()
    }

    fn exec(&self, script: &str, env: &EnvOverlay) -> anyhow::Result<CommandOutput> {
        let remote = remote_command(script, env)?;
        tracing::debug!(
            host = %self.describe(),
            env = %env.to_masked_prefix(),
            script = %script_summary(script),
            bytes = script.len(),
            "ssh exec"
        );
        let output = run_captured(&mut self.command(&remote), None)?;
        self.checked(output)
    }

    fn exec_streaming(
        &self,
        script: &str,
        sink: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> anyhow::Result<StreamOutcome> {
        let remote = remote_command(script, &EnvOverlay::new())?;
        tracing::debug!(
            host = %self.describe(),
            script = %script_summary(script),
            bytes = script.len(),
            "ssh stream"
        );
        run_streaming(&mut self.command(&remote), sink, cancel)
    }

    fn push_file(&self, contents: &[u8], remote_path: &str) -> anyhow::Result<()> {
        let remote = remote_command(&push_file_script(remote_path)?, &EnvOverlay::new())?;
        tracing::debug!(host = %self.describe(), path = remote_path, bytes = contents.len(), "ssh push");
        let output = self.checked(run_captured(&mut self.command(&remote), Some(contents))?)?;
        output.check(&format!("Upload to {remote_path}"))?;
        Ok(())
    }
}
