//! Upload and download of job material with retry, filtering and manifest
//! verification.
//!
//! Every transport failure is retried with exponential backoff until the
//! attempt budget runs out; connectivity failures are surfaced immediately.
//! A download whose files do not match the remote manifest is reported as
//! incomplete, which is distinct from a failed transfer.

pub mod filter;
pub mod layout;
pub mod manifest;
pub mod retry;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FerryError;
use crate::remote::{EnvOverlay, RemoteShell, sh_quote};
use crate::state::InstanceRef;
use crate::transport::{DownloadFilter, FileTransport, TransportStrategy, is_connectivity};

pub use filter::{GlobFilter, prune_to_glob};
pub use layout::{instance_dir_name, results_dir};
pub use manifest::{Manifest, ManifestEntry, ManifestVerification, SizeMismatch};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        })
    }
}

/// One upload or download invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferJob {
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub glob_filter: Option<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptEvent {
    pub attempt: u32,
    pub succeeded: bool,
    pub error: Option<String>,
    pub retry_in_secs: Option<u64>,
}

impl fmt::Display for AttemptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.succeeded, self.retry_in_secs) {
            (true, _) => write!(f, "attempt {} succeeded", self.attempt),
            (false, Some(secs)) => write!(f, "retry {} in {}s", self.attempt, secs),
            (false, None) => write!(f, "attempt {} failed", self.attempt),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Complete,
    /// Transfer succeeded but the local tree does not match the manifest.
    Incomplete,
    /// Nothing to upload.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub job: TransferJob,
    pub strategy: TransportStrategy,
    pub events: Vec<AttemptEvent>,
    pub verification: Option<ManifestVerification>,
    /// Files removed locally to honour the glob after an unfiltered transfer.
    pub pruned: usize,
    pub outcome: TransferOutcome,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == TransferOutcome::Complete
    }
}

pub struct TransferEngine<'a> {
    shell: &'a dyn RemoteShell,
    transport: &'a dyn FileTransport,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper + 'a>,
    manifest_name: String,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        shell: &'a dyn RemoteShell,
        transport: &'a dyn FileTransport,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            shell,
            transport,
            policy,
            sleeper: Box::new(ThreadSleeper),
            manifest_name: "_manifest.txt".to_string(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'a) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn with_manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    fn new_job(&self, direction: Direction, local: &Path, remote: &str, glob: Option<&str>) -> TransferJob {
        TransferJob {
            direction,
            local_path: local.to_path_buf(),
            remote_path: remote.to_string(),
            glob_filter: glob.map(str::to_string),
            attempt_count: 0,
            max_attempts: self.policy.max_attempts,
            backoff_base_seconds: self.policy.backoff_base.as_secs(),
        }
    }

    /// Copy the contents of `local_dir` into `remote_dir`.
    ///
    /// A missing or empty `local_dir` is skipped unless `require_content`.
    pub fn upload(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        require_content: bool,
    ) -> anyhow::Result<TransferReport> {
        let mut job = self.new_job(Direction::Upload, local_dir, remote_dir, None);
        let has_content = std::fs::read_dir(local_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if !has_content {
            if require_content {
                return Err(FerryError::MissingContent {
                    path: local_dir.display().to_string(),
                }
                .into());
            }
            tracing::info!(path = %local_dir.display(), "nothing to upload");
            return Ok(TransferReport {
                job,
                strategy: self.transport.strategy(),
                events: Vec::new(),
                verification: None,
                pruned: 0,
                outcome: TransferOutcome::Skipped {
                    reason: format!("{} is missing or empty", local_dir.display()),
                },
            });
        }

        self.shell
            .exec(&format!("mkdir -p {}", sh_quote(remote_dir)?), &EnvOverlay::new())?
            .check(&format!("mkdir {remote_dir}"))?;

        let mut events = Vec::new();
        job.attempt_count = self.with_retry(Direction::Upload, &mut events, || {
            self.transport.upload(local_dir, remote_dir)
        })?;

        Ok(TransferReport {
            job,
            strategy: self.transport.strategy(),
            events,
            verification: None,
            pruned: 0,
            outcome: TransferOutcome::Complete,
        })
    }

    /// Download `remote_dir` into a fresh run directory under `results_root`.
    pub fn download(
        &self,
        remote_dir: &str,
        results_root: &Path,
        instance: &InstanceRef,
        now: DateTime<Utc>,
        glob: Option<&str>,
        verify_manifest: bool,
    ) -> anyhow::Result<TransferReport> {
        let filter = glob.map(GlobFilter::new).transpose()?;
        let dest = results_dir(results_root, instance, now)?;
        let mut job = self.new_job(Direction::Download, &dest, remote_dir, glob);
        tracing::info!(remote = remote_dir, local = %dest.display(), "downloading results");

        if verify_manifest {
            let out = self
                .shell
                .exec(
                    &manifest::generate_script(remote_dir, &self.manifest_name)?,
                    &EnvOverlay::new(),
                )?
                .check("manifest generation")?;
            tracing::info!(entries = out.stdout.trim(), "remote manifest generated");
        }

        let rsync_filter = filter.as_ref().map(|f| DownloadFilter {
            glob: f.pattern().to_string(),
            keep: vec![self.manifest_name.clone()],
        });
        let mut events = Vec::new();
        job.attempt_count = self.with_retry(Direction::Download, &mut events, || {
            self.transport
                .download(remote_dir, &dest, rsync_filter.as_ref())
        })?;

        let mut pruned = 0;
        if let Some(filter) = &filter
            && !self.transport.strategy().supports_filtering()
        {
            pruned = prune_to_glob(&dest, filter, &[self.manifest_name.as_str()])?;
        }

        let verification = if verify_manifest {
            let manifest_path = dest.join(&self.manifest_name);
            Some(if manifest_path.is_file() {
                Manifest::read(&manifest_path)?.verify(&dest, filter.as_ref())
            } else {
                ManifestVerification {
                    expected: 0,
                    missing: vec![self.manifest_name.clone()],
                    size_mismatch: Vec::new(),
                }
            })
        } else {
            None
        };

        let outcome = match &verification {
            Some(v) if !v.is_complete() => {
                tracing::warn!(
                    missing = v.missing.len(),
                    size_mismatch = v.size_mismatch.len(),
                    "download incomplete against manifest"
                );
                TransferOutcome::Incomplete
            }
            _ => TransferOutcome::Complete,
        };

        Ok(TransferReport {
            job,
            strategy: self.transport.strategy(),
            events,
            verification,
            pruned,
            outcome,
        })
    }

    /// Run `op` until it succeeds or the budget is spent. Returns the number
    /// of attempts made.
    fn with_retry(
        &self,
        direction: Direction,
        events: &mut Vec<AttemptEvent>,
        mut op: impl FnMut() -> anyhow::Result<()>,
    ) -> anyhow::Result<u32> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(()) => {
                    tracing::info!(%direction, attempt, "transfer attempt succeeded");
                    events.push(AttemptEvent {
                        attempt,
                        succeeded: true,
                        error: None,
                        retry_in_secs: None,
                    });
                    return Ok(attempt);
                }
                Err(err) if is_connectivity(&err) => return Err(err),
                Err(err) => {
                    let message = format!("{err:#}");
                    if !self.policy.allows_retry_after(attempt) {
                        events.push(AttemptEvent {
                            attempt,
                            succeeded: false,
                            error: Some(message.clone()),
                            retry_in_secs: None,
                        });
                        tracing::warn!(%direction, attempt, error = %message, "transfer attempts exhausted");
                        return Err(FerryError::TransferExhausted {
                            direction,
                            attempts: attempt,
                            detail: message,
                        }
                        .into());
                    }
                    let delay = self.policy.delay_before_retry(attempt);
                    let event = AttemptEvent {
                        attempt,
                        succeeded: false,
                        error: Some(message.clone()),
                        retry_in_secs: Some(delay.as_secs()),
                    };
                    tracing::warn!(%direction, error = %message, "{event}");
                    events.push(event);
                    self.sleeper.sleep(delay);
                }
            }
        }
    }
}
