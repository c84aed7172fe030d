//! Detached job lifecycle inside a named tmux session.
//!
//! The session name is the mutual-exclusion token: at most one job per name.
//! Existence is queried on every call and never cached.

pub mod launch;
pub mod mirror;

use serde::Serialize;

use crate::error::FerryError;
use crate::remote::{CancelToken, EnvOverlay, RemoteShell, StreamOutcome, sh_quote};

pub use launch::{JobLaunch, RunnerSpec, expand_placeholders, framed_job_script};
pub use mirror::LogMirror;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    FailIfRunning,
    /// Stop a running session first.
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NoSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub session: String,
    pub restarted: bool,
    /// Launched command with sensitive values masked.
    pub command: String,
    pub log_file: String,
}

pub struct JobSessionController<'a> {
    shell: &'a dyn RemoteShell,
    session: String,
}

impl<'a> JobSessionController<'a> {
    pub fn new(shell: &'a dyn RemoteShell, session: impl Into<String>) -> Self {
        Self {
            shell,
            session: session.into(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn target(&self) -> anyhow::Result<String> {
        Ok(sh_quote(&format!("={}", self.session))?.into_owned())
    }

    pub fn state(&self) -> anyhow::Result<SessionState> {
        let script = format!("tmux has-session -t {} 2>/dev/null", self.target()?);
        let output = self.shell.exec(&script, &EnvOverlay::new())?;
        match output.status {
            0 => Ok(SessionState::Running),
            1 => Ok(SessionState::Absent),
            // bash reports a missing tmux binary as 127
            127 => anyhow::bail!("tmux is not installed on {}; run bootstrap first", self.shell.describe()),
            other => anyhow::bail!(
                "tmux has-session exited with {other}: {}",
                output.stderr.trim()
            ),
        }
    }

    pub fn is_running(&self) -> anyhow::Result<bool> {
        Ok(self.state()? == SessionState::Running)
    }

    /// Launch `launch` detached. Refuses a running session unless `mode` is
    /// [`StartMode::Restart`].
    pub fn start(
        &self,
        launch: &JobLaunch,
        log_file: &str,
        mode: StartMode,
    ) -> anyhow::Result<StartReport> {
        let mut restarted = false;
        if self.is_running()? {
            match mode {
                StartMode::FailIfRunning => {
                    return Err(FerryError::SessionAlreadyRunning {
                        session: self.session.clone(),
                    }
                    .into());
                }
                StartMode::Restart => {
                    tracing::info!(session = %self.session, "restarting running session");
                    self.stop()?;
                    restarted = true;
                }
            }
        }

        let spec = launch.runner_spec();
        let body = framed_job_script(&spec, &launch.workdir, &self.session, log_file)?;
        let log_dir = match log_file.rfind('/') {
            Some(0) => "/",
            Some(idx) => &log_file[..idx],
            None => ".",
        };
        let script = format!(
            "mkdir -p {} && tmux new-session -d -s {} -c {} {}",
            sh_quote(log_dir)?,
            sh_quote(&self.session)?,
            sh_quote(&launch.workdir)?,
            sh_quote(&format!("bash -c {}", sh_quote(&body)?))?,
        );
        let command = spec.display_line();
        tracing::info!(session = %self.session, %command, log = log_file, "starting job");
        self.shell
            .exec(&script, &EnvOverlay::new())?
            .check(&format!("tmux new-session {}", self.session))?;

        Ok(StartReport {
            session: self.session.clone(),
            restarted,
            command,
            log_file: log_file.to_string(),
        })
    }

    /// Terminate the session; a missing session is a notice, not an error.
    pub fn stop(&self) -> anyhow::Result<StopOutcome> {
        if !self.is_running()? {
            tracing::info!(session = %self.session, "no session to stop");
            return Ok(StopOutcome::NoSession);
        }
        let script = format!("tmux kill-session -t {}", self.target()?);
        self.shell
            .exec(&script, &EnvOverlay::new())?
            .check(&format!("tmux kill-session {}", self.session))?;
        tracing::info!(session = %self.session, "session stopped");
        Ok(StopOutcome::Stopped)
    }

    /// Follow `log_file` from its first byte until `cancel` fires.
    ///
    /// Interruption returns [`StreamOutcome::Interrupted`] and leaves the
    /// session running.
    pub fn stream_log(
        &self,
        log_file: &str,
        sink: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> anyhow::Result<StreamOutcome> {
        let script = format!("tail -n +1 -F {} 2>/dev/null", sh_quote(log_file)?);
        let outcome = self.shell.exec_streaming(&script, sink, cancel)?;
        if outcome == StreamOutcome::Interrupted {
            tracing::info!(session = %self.session, "log streaming interrupted; session left running");
        }
        Ok(outcome)
    }
}
