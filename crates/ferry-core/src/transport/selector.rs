//! Capability probing and transport negotiation.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::remote::{EnvOverlay, RemoteShell, sh_quote};

use super::TransportStrategy;

/// Env var that points at an rsync binary outside PATH.
pub const RSYNC_PATH_ENV: &str = "RSYNC_PATH";

/// A downgrade from the preferred transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityNotice {
    pub wanted: TransportStrategy,
    pub using: TransportStrategy,
    pub reason: String,
}

impl fmt::Display for CapabilityNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unavailable ({}); falling back to {}",
            self.wanted, self.reason, self.using
        )
    }
}

/// Result of an operator-authorized remote install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RemoteInstall {
    Installed { version: String },
    Declined,
    Failed { reason: String },
}

/// Transport chosen for one operation plus everything observed on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Negotiation {
    pub strategy: TransportStrategy,
    pub local_rsync: Option<PathBuf>,
    pub remote_install: Option<RemoteInstall>,
    pub notices: Vec<CapabilityNotice>,
}

pub struct TransportSelector<'a> {
    shell: &'a dyn RemoteShell,
    rsync_override: Option<PathBuf>,
}

impl<'a> TransportSelector<'a> {
    pub fn new(shell: &'a dyn RemoteShell) -> Self {
        Self {
            shell,
            rsync_override: std::env::var_os(RSYNC_PATH_ENV)
                .map(PathBuf::from)
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }

    pub fn with_rsync_override(mut self, path: Option<PathBuf>) -> Self {
        self.rsync_override = path;
        self
    }

    /// Local binary path for `tool`, honouring `RSYNC_PATH` for rsync.
    pub fn local_tool_path(&self, tool: TransportStrategy) -> Option<PathBuf> {
        if tool == TransportStrategy::Rsync
            && let Some(path) = &self.rsync_override
        {
            return path.is_file().then(|| path.clone());
        }
        which::which(tool.binary()).ok()
    }

    pub fn probe_local(&self, tool: TransportStrategy) -> bool {
        self.local_tool_path(tool).is_some()
    }

    pub fn probe_remote(&self, tool: TransportStrategy) -> anyhow::Result<bool> {
        let script = format!("command -v {} >/dev/null 2>&1", tool.binary());
        let output = self.shell.exec(&script, &EnvOverlay::new())?;
        Ok(output.success())
    }

    /// `preferred` when available locally, else `fallback` with a notice.
    pub fn select(
        &self,
        preferred: TransportStrategy,
        fallback: TransportStrategy,
    ) -> (TransportStrategy, Option<CapabilityNotice>) {
        if self.probe_local(preferred) {
            return (preferred, None);
        }
        let notice = CapabilityNotice {
            wanted: preferred,
            using: fallback,
            reason: "not installed locally".to_string(),
        };
        tracing::warn!(%notice, "transport capability downgrade");
        (fallback, Some(notice))
    }

    /// Install `tool` on the instance if `authorize` agrees.
    pub fn install_remote(
        &self,
        tool: TransportStrategy,
        authorize: &mut dyn FnMut(&str) -> bool,
    ) -> anyhow::Result<RemoteInstall> {
        let question = format!(
            "{} is missing on {}. Install it with the system package manager?",
            tool,
            self.shell.describe()
        );
        if !authorize(&question) {
            tracing::info!(tool = %tool, "remote install declined");
            return Ok(RemoteInstall::Declined);
        }

        let output = self
            .shell
            .exec(&install_script(tool.binary())?, &EnvOverlay::new())?;
        if !output.success() {
            let reason = last_line(&output.stderr)
                .unwrap_or("no supported package manager succeeded")
                .to_string();
            tracing::warn!(tool = %tool, %reason, "remote install failed");
            return Ok(RemoteInstall::Failed { reason });
        }

        let version = output
            .stdout
            .lines()
            .find(|line| !line.starts_with("INSTALLED_BY:") && !line.trim().is_empty())
            .unwrap_or("unknown version")
            .trim()
            .to_string();
        tracing::info!(tool = %tool, %version, "remote install succeeded");
        Ok(RemoteInstall::Installed { version })
    }

    /// Pick the transport for one operation.
    ///
    /// rsync is used only when present on both ends; a missing remote rsync
    /// may be installed with the operator's consent.
    pub fn negotiate(
        &self,
        prefer_rsync: bool,
        authorize: &mut dyn FnMut(&str) -> bool,
    ) -> anyhow::Result<Negotiation> {
        let mut negotiation = Negotiation {
            strategy: TransportStrategy::Scp,
            local_rsync: None,
            remote_install: None,
            notices: Vec::new(),
        };
        if !prefer_rsync {
            return Ok(negotiation);
        }

        let (strategy, notice) = self.select(TransportStrategy::Rsync, TransportStrategy::Scp);
        negotiation.notices.extend(notice);
        if strategy == TransportStrategy::Scp {
            return Ok(negotiation);
        }
        negotiation.local_rsync = self.local_tool_path(TransportStrategy::Rsync);

        if self.probe_remote(TransportStrategy::Rsync)? {
            negotiation.strategy = TransportStrategy::Rsync;
            return Ok(negotiation);
        }

        let install = self.install_remote(TransportStrategy::Rsync, authorize)?;
        if matches!(install, RemoteInstall::Installed { .. }) {
            negotiation.strategy = TransportStrategy::Rsync;
        } else {
            let notice = CapabilityNotice {
                wanted: TransportStrategy::Rsync,
                using: TransportStrategy::Scp,
                reason: match &install {
                    RemoteInstall::Declined => "missing on the instance, install declined".to_string(),
                    RemoteInstall::Failed { reason } => format!("remote install failed: {reason}"),
                    RemoteInstall::Installed { .. } => String::new(),
                },
            };
            tracing::warn!(%notice, "transport capability downgrade");
            negotiation.notices.push(notice);
        }
        negotiation.remote_install = Some(install);
        Ok(negotiation)
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Try each package manager in turn until the tool resolves on PATH.
fn install_script(tool: &str) -> anyhow::Result<String> {
    let tool = sh_quote(tool)?;
    Ok(format!(
        r#"set -u
if [ "$(id -u)" -ne 0 ]; then SUDO="sudo -n"; else SUDO=""; fi
for pm in apt-get apt dnf yum pacman apk; do
  command -v "$pm" >/dev/null 2>&1 || continue
  case "$pm" in
    apt-get|apt) $SUDO "$pm" update -y >/dev/null 2>&1; $SUDO env DEBIAN_FRONTEND=noninteractive "$pm" install -y {tool} >/dev/null 2>&1 ;;
    dnf|yum) $SUDO "$pm" install -y {tool} >/dev/null 2>&1 ;;
    pacman) $SUDO pacman -Sy --noconfirm {tool} >/dev/null 2>&1 ;;
    apk) $SUDO apk add --no-cache {tool} >/dev/null 2>&1 ;;
  esac
  if command -v {tool} >/dev/null 2>&1; then
    echo "INSTALLED_BY:$pm"
    {tool} --version 2>/dev/null | head -n 1
    exit 0
  fi
done
echo "no supported package manager could install {tool}" >&2
exit 1
"#
    ))
}
