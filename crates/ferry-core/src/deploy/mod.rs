//! Repository deployment on the instance.
//!
//! Six fixed steps, each a separate remote command so progress is observable:
//!
//! | # | Step | Re-run safety |
//! |---|------|---------------|
//! | 1 | ensure project directory | retry from scratch |
//! | 2 | fetch or clone the branch | retry from scratch |
//! | 3 | large-file storage pull | idempotent |
//! | 4 | submodules | idempotent |
//! | 5 | entry point syntax check | idempotent |
//! | 6 | summary | read-only |
//!
//! The first failing step halts the pipeline with a [`DeployFailure`] naming
//! that step and the last one that completed.

mod repo_url;

use std::fmt;

use serde::Serialize;

use crate::config::{FerryConfig, LfsMode};
use crate::error::FerryError;
use crate::remote::{CommandOutput, EnvOverlay, RemoteShell, sh_quote};

pub use repo_url::normalize_repo_url;

/// `git ls-remote --exit-code` status for "no matching refs".
const LS_REMOTE_NO_MATCH: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    EnsureDirectory,
    FetchOrClone,
    LargeFiles,
    Submodules,
    VerifyEntry,
    Summarize,
}

impl DeployStep {
    pub const ALL: [DeployStep; 6] = [
        DeployStep::EnsureDirectory,
        DeployStep::FetchOrClone,
        DeployStep::LargeFiles,
        DeployStep::Submodules,
        DeployStep::VerifyEntry,
        DeployStep::Summarize,
    ];

    pub fn number(self) -> usize {
        match self {
            DeployStep::EnsureDirectory => 1,
            DeployStep::FetchOrClone => 2,
            DeployStep::LargeFiles => 3,
            DeployStep::Submodules => 4,
            DeployStep::VerifyEntry => 5,
            DeployStep::Summarize => 6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeployStep::EnsureDirectory => "ensure directory",
            DeployStep::FetchOrClone => "fetch or clone",
            DeployStep::LargeFiles => "large files",
            DeployStep::Submodules => "submodules",
            DeployStep::VerifyEntry => "verify entry",
            DeployStep::Summarize => "summarize",
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeployFailureKind {
    BranchNotFound { branch: String },
    EntryMissing { path: String },
    EntryInvalid { path: String, detail: String },
    StepFailed { detail: String },
}

impl fmt::Display for DeployFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployFailureKind::BranchNotFound { branch } => {
                write!(f, "branch not found: '{branch}' does not exist on the remote")
            }
            DeployFailureKind::EntryMissing { path } => write!(f, "entry point {path} not found"),
            DeployFailureKind::EntryInvalid { path, detail } => {
                write!(f, "entry point {path} failed the syntax check: {detail}")
            }
            DeployFailureKind::StepFailed { detail } => f.write_str(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployFailure {
    pub failed_step: DeployStep,
    pub last_completed: Option<DeployStep>,
    pub kind: DeployFailureKind,
    pub completed: Vec<StepReport>,
}

impl DeployFailure {
    pub fn hint(&self) -> Option<String> {
        match &self.kind {
            DeployFailureKind::BranchNotFound { .. } => {
                Some("check git.branch against the branches pushed to the repository".to_string())
            }
            DeployFailureKind::EntryMissing { .. } => {
                Some("check job.entry; it is resolved relative to remote.project_dir".to_string())
            }
            DeployFailureKind::EntryInvalid { .. } => {
                Some("fix the syntax error and push, then deploy again".to_string())
            }
            DeployFailureKind::StepFailed { .. } => match self.failed_step {
                DeployStep::LargeFiles => {
                    Some("run bootstrap to install git-lfs, then deploy again".to_string())
                }
                _ => Some(format!(
                    "deploy again; step {} is safe to re-run",
                    self.failed_step.number()
                )),
            },
        }
    }
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deploy halted at step {}: {}", self.failed_step, self.kind)?;
        match self.last_completed {
            Some(step) => write!(f, " (last completed step: {step})"),
            None => write!(f, " (no step completed)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Done,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: DeployStep,
    pub state: StepState,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct DeploySummary {
    pub branch: String,
    pub commit: String,
    pub has_submodules: bool,
    pub shallow: bool,
    pub entry_exists: bool,
    pub entry_valid: bool,
    pub entry_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub repo_url: String,
    pub steps: Vec<StepReport>,
    pub summary: DeploySummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub repo_url: String,
    pub branch: String,
    pub project_dir: String,
    pub entry: String,
    pub python_bin: String,
    pub lfs: LfsMode,
}

impl DeployRequest {
    pub fn from_config(config: &FerryConfig) -> anyhow::Result<Self> {
        if config.git.repo_url.trim().is_empty() {
            return Err(FerryError::Config("git.repo_url is not set".to_string()).into());
        }
        Ok(Self {
            repo_url: normalize_repo_url(&config.git.repo_url, config.git.prefer_https),
            branch: config.git.branch.clone(),
            project_dir: config.remote.project_dir.clone(),
            entry: config.job.entry.clone(),
            python_bin: config.job.python_bin.clone(),
            lfs: config.git.lfs,
        })
    }

    /// Entry path on the instance.
    pub fn entry_path(&self) -> String {
        resolve_entry(&self.project_dir, &self.entry)
    }
}

pub(crate) fn resolve_entry(project_dir: &str, entry: &str) -> String {
    if entry.starts_with('/') {
        entry.to_string()
    } else {
        format!("{}/{}", project_dir.trim_end_matches('/'), entry)
    }
}

pub struct RepoDeploymentPipeline<'a> {
    shell: &'a dyn RemoteShell,
    env: EnvOverlay,
}

struct Progress {
    steps: Vec<StepReport>,
}

impl Progress {
    fn last(&self) -> Option<DeployStep> {
        self.steps.last().map(|s| s.step)
    }

    fn record(&mut self, step: DeployStep, state: StepState, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::info!(step = step.number(), name = step.label(), ?state, %detail, "deploy step complete");
        self.steps.push(StepReport {
            step,
            state,
            detail,
        });
    }

    fn fail(&self, step: DeployStep, kind: DeployFailureKind) -> anyhow::Error {
        tracing::warn!(step = step.number(), name = step.label(), reason = %kind, "deploy step failed");
        FerryError::Deploy(DeployFailure {
            failed_step: step,
            last_completed: self.last(),
            kind,
            completed: self.steps.clone(),
        })
        .into()
    }
}

fn step_failed(output: &CommandOutput, what: &str) -> DeployFailureKind {
    let stderr = output.stderr.trim();
    DeployFailureKind::StepFailed {
        detail: if stderr.is_empty() {
            format!("{what} exited with {}", output.status)
        } else {
            format!("{what} exited with {}: {}", output.status, stderr)
        },
    }
}

impl<'a> RepoDeploymentPipeline<'a> {
    pub fn new(shell: &'a dyn RemoteShell) -> Self {
        Self {
            shell,
            env: EnvOverlay::new().with("GIT_TERMINAL_PROMPT", "0"),
        }
    }

    fn exec(&self, script: &str) -> anyhow::Result<CommandOutput> {
        self.shell.exec(script, &self.env)
    }

    pub fn run(&self, req: &DeployRequest) -> anyhow::Result<DeployReport> {
        let dir = sh_quote(&req.project_dir)?.into_owned();
        let url = sh_quote(&req.repo_url)?.into_owned();
        let branch = sh_quote(&req.branch)?.into_owned();
        let entry_path = req.entry_path();
        let entry = sh_quote(&entry_path)?.into_owned();
        let mut progress = Progress { steps: Vec::new() };

        // 1. ensure directory
        let step = DeployStep::EnsureDirectory;
        let out = self.exec(&format!("mkdir -p {dir}"))?;
        if !out.success() {
            return Err(progress.fail(step, step_failed(&out, "mkdir")));
        }
        progress.record(step, StepState::Done, req.project_dir.clone());

        // 2. fetch or clone
        let step = DeployStep::FetchOrClone;
        let out = self.exec(&format!("git ls-remote --exit-code --heads {url} {branch}"))?;
        if out.status == LS_REMOTE_NO_MATCH {
            return Err(progress.fail(
                step,
                DeployFailureKind::BranchNotFound {
                    branch: req.branch.clone(),
                },
            ));
        }
        if !out.success() {
            return Err(progress.fail(step, step_failed(&out, "git ls-remote")));
        }
        let out = self.exec(&fetch_or_clone_script(&dir, &url, &branch))?;
        if !out.success() {
            return Err(progress.fail(step, step_failed(&out, "git sync")));
        }
        let action = out
            .stdout
            .lines()
            .find_map(|l| l.strip_prefix("ACTION:"))
            .unwrap_or("synced")
            .to_string();
        progress.record(step, StepState::Done, format!("{action} {}", req.branch));

        // 3. large files
        let step = DeployStep::LargeFiles;
        let wants_lfs = match req.lfs {
            LfsMode::Never => false,
            LfsMode::Always => true,
            LfsMode::Auto => self
                .exec(&format!("cd {dir} && grep -qs 'filter=lfs' .gitattributes"))?
                .success(),
        };
        if wants_lfs {
            let out = self.exec(&format!(
                "cd {dir} && git lfs version >/dev/null && git lfs install --local >/dev/null && git lfs pull"
            ))?;
            if !out.success() {
                return Err(progress.fail(step, step_failed(&out, "git lfs pull")));
            }
            progress.record(step, StepState::Done, "lfs objects pulled");
        } else {
            let why = match req.lfs {
                LfsMode::Never => "disabled",
                _ => "no lfs-tracked paths",
            };
            progress.record(step, StepState::Skipped, why);
        }

        // 4. submodules
        let step = DeployStep::Submodules;
        let has_submodules = self.exec(&format!("test -f {dir}/.gitmodules"))?.success();
        if has_submodules {
            let out = self.exec(&format!(
                "cd {dir} && git submodule sync --recursive >/dev/null && git submodule update --init --recursive"
            ))?;
            if !out.success() {
                return Err(progress.fail(step, step_failed(&out, "git submodule update")));
            }
            progress.record(step, StepState::Done, "submodules updated");
        } else {
            progress.record(step, StepState::Skipped, "no .gitmodules");
        }

        // 5. verify entry
        let step = DeployStep::VerifyEntry;
        if !self.exec(&format!("test -f {entry}"))?.success() {
            return Err(progress.fail(
                step,
                DeployFailureKind::EntryMissing {
                    path: entry_path.clone(),
                },
            ));
        }
        let python = sh_quote(&req.python_bin)?.into_owned();
        let out = self.exec(&format!(
            "{python} -c 'import sys; compile(open(sys.argv[1], \"rb\").read(), sys.argv[1], \"exec\")' {entry}"
        ))?;
        if !out.success() {
            let detail = out
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("syntax check failed")
                .trim()
                .to_string();
            return Err(progress.fail(
                step,
                DeployFailureKind::EntryInvalid {
                    path: entry_path.clone(),
                    detail,
                },
            ));
        }
        progress.record(step, StepState::Done, entry_path.clone());

        // 6. summarize
        let step = DeployStep::Summarize;
        let out = self.exec(&summary_script(&dir))?;
        if !out.success() {
            return Err(progress.fail(step, step_failed(&out, "summary")));
        }
        let values = parse_key_values(&out.stdout);
        let summary = DeploySummary {
            branch: values.get("BRANCH").cloned().unwrap_or_default(),
            commit: values.get("COMMIT").cloned().unwrap_or_default(),
            has_submodules,
            shallow: values.get("SHALLOW").is_some_and(|v| v == "true"),
            entry_exists: true,
            entry_valid: true,
            entry_path,
        };
        progress.record(
            step,
            StepState::Done,
            format!("{}@{}", summary.branch, summary.commit),
        );

        Ok(DeployReport {
            repo_url: req.repo_url.clone(),
            steps: progress.steps,
            summary,
        })
    }
}

/// Update an existing checkout, clone into an empty directory, or adopt a
/// non-empty directory that is not yet a repository.
fn fetch_or_clone_script(dir: &str, url: &str, branch: &str) -> String {
    format!(
        r#"set -e
cd {dir}
if [ -d .git ]; then
  git remote set-url origin {url} 2>/dev/null || git remote add origin {url}
  git fetch -q origin {branch}
  if git show-ref --verify --quiet refs/heads/{branch}; then
    git checkout -q {branch}
  else
    git checkout -q -b {branch} --track origin/{branch}
  fi
  git pull -q --ff-only origin {branch}
  echo "ACTION:updated"
elif [ -z "$(ls -A)" ]; then
  git clone -q --branch {branch} {url} .
  echo "ACTION:cloned"
else
  git init -q
  git remote add origin {url}
  git fetch -q origin {branch}
  git checkout -q -B {branch} origin/{branch}
  echo "ACTION:adopted"
fi
"#
    )
}

fn summary_script(dir: &str) -> String {
    format!(
        r#"cd {dir} || exit 1
echo "BRANCH=$(git rev-parse --abbrev-ref HEAD)"
echo "COMMIT=$(git rev-parse --short HEAD)"
echo "SHALLOW=$(git rev-parse --is-shallow-repository)"
"#
    )
}

fn parse_key_values(stdout: &str) -> std::collections::HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
