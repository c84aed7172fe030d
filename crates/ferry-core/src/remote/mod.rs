//! Remote command execution seam.
//!
//! Every stage talks to the instance through [`RemoteShell`]: run a bash
//! script with an environment overlay, stream a long-running command, or
//! push a file. [`SshShell`] is the production implementation; tests drive
//! the same stages through local bash or scripted doubles.

pub mod env;
pub mod process;
pub mod ssh;

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use env::{EnvOverlay, MASK, is_sensitive_key};
pub use ssh::{SshShell, SshTarget};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Bail with the command's stderr when it did not succeed.
    pub fn check(self, what: &str) -> anyhow::Result<Self> {
        if !self.success() {
            anyhow::bail!(
                "{} failed (exit {}): {}",
                what,
                self.status,
                self.stderr.trim()
            );
        }
        Ok(self)
    }
}

/// How a streaming command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(i32),
    /// The operator stopped local forwarding.
    Interrupted,
}

/// Shared cancellation flag, settable from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

pub trait RemoteShell {
    /// Human-readable target, e.g. `root@203.0.113.7`.
    fn describe(&self) -> String;

    /// Run a bash script with `env` exported, capturing its output.
    ///
    /// A non-zero exit is returned as data. Connection-level failures are
    /// returned as [`crate::error::FerryError::Connectivity`].
    fn exec(&self, script: &str, env: &EnvOverlay) -> anyhow::Result<CommandOutput>;

    /// Run a bash script, forwarding stdout lines until it exits or `cancel` fires.
    fn exec_streaming(
        &self,
        script: &str,
        sink: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> anyhow::Result<StreamOutcome>;

    /// Write `contents` to `remote_path`, creating parent directories.
    fn push_file(&self, contents: &[u8], remote_path: &str) -> anyhow::Result<()>;
}

/// POSIX-quote a single word.
pub fn sh_quote(value: &str) -> anyhow::Result<Cow<'_, str>> {
    shlex::try_quote(value).map_err(|e| anyhow::anyhow!("Cannot quote {value:?} for the shell: {e}"))
}

/// Log-safe summary of a script: its first non-empty line cut at the first
/// quote, with sensitive `KEY=value` words masked. Quoted payloads (job
/// bodies, tmux commands) never reach the log.
pub fn script_summary(script: &str) -> String {
    let first = script
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    let head = match first.find(['\'', '"']) {
        Some(idx) => first[..idx].trim_end(),
        None => first,
    };
    let words: Vec<String> = head
        .split_whitespace()
        .map(|word| match word.split_once('=') {
            Some((key, _)) if is_sensitive_key(key) => format!("{key}={MASK}"),
            _ => word.to_string(),
        })
        .collect();
    let mut summary = words.join(" ");
    if head.len() < first.len() || script.trim().lines().count() > 1 {
        summary.push_str(" ...");
    }
    summary
}

/// Script that writes stdin to `remote_path`.
pub fn push_file_script(remote_path: &str) -> anyhow::Result<String> {
    let path = sh_quote(remote_path)?;
    Ok(format!(
        "mkdir -p \"$(dirname {path})\" && cat > {path}"
    ))
}
