//! Post-job remote cleanup: log rotation with bounded retention, output purge.
//!
//! Both operations are opt-in and independent. Purge is only meant to run
//! after a download the caller has confirmed as complete.

use serde::Serialize;

use crate::config::CleanupConfig;
use crate::remote::{EnvOverlay, RemoteShell, sh_quote};
use crate::session::{JobSessionController, StopOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RotationReport {
    /// Rotated file, or `None` when there was no current log.
    pub rotated_to: Option<String>,
    /// Rotated logs deleted to honour the retention bound, oldest first.
    pub pruned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub dir: String,
    pub removed: usize,
}

/// What to do in a combined cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupPlan {
    pub rotate_logs: bool,
    pub keep_log_backups: usize,
    pub purge_outputs: bool,
}

impl CleanupPlan {
    pub fn from_config(config: &CleanupConfig) -> Self {
        Self {
            rotate_logs: config.rotate_remote_logs,
            keep_log_backups: config.keep_log_backups,
            purge_outputs: config.remove_remote_outputs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub session: StopOutcome,
    pub rotation: Option<RotationReport>,
    pub purge: Option<PurgeReport>,
}

pub struct HousekeepingManager<'a> {
    shell: &'a dyn RemoteShell,
}

impl<'a> HousekeepingManager<'a> {
    pub fn new(shell: &'a dyn RemoteShell) -> Self {
        Self { shell }
    }

    /// Rename the current log to `run-<YYYYMMDD>-<HHMMSS>.log` (UTC), leave an
    /// empty log in its place, then delete the least recently modified
    /// rotated logs beyond `keep_count`.
    pub fn rotate_log(&self, current_path: &str, keep_count: usize) -> anyhow::Result<RotationReport> {
        anyhow::ensure!(keep_count >= 1, "keep_count must be at least 1");
        let script = rotate_script(current_path, keep_count)?;
        let output = self
            .shell
            .exec(&script, &EnvOverlay::new())?
            .check("log rotation")?;

        let mut report = RotationReport::default();
        for line in output.stdout.lines() {
            if let Some(path) = line.strip_prefix("ROTATED:") {
                report.rotated_to = Some(path.to_string());
            } else if let Some(path) = line.strip_prefix("PRUNED:") {
                report.pruned.push(path.to_string());
            }
        }
        tracing::info!(
            log = current_path,
            rotated_to = ?report.rotated_to,
            pruned = report.pruned.len(),
            "log rotation finished"
        );
        Ok(report)
    }

    /// Delete every direct child of `remote_dir`, hidden entries included,
    /// keeping the directory itself. Returns the number of removed entries.
    pub fn purge_outputs(&self, remote_dir: &str) -> anyhow::Result<PurgeReport> {
        let trimmed = remote_dir.trim();
        if trimmed.is_empty() || trimmed.trim_end_matches('/').is_empty() {
            anyhow::bail!("Refusing to purge {:?}", remote_dir);
        }
        anyhow::ensure!(
            trimmed.starts_with('/'),
            "Refusing to purge relative path {:?}",
            remote_dir
        );
        let dir = sh_quote(trimmed)?;
        let script = format!(
            r#"set -e
[ -d {dir} ] || {{ echo "REMOVED:0"; exit 0; }}
count=$(find {dir} -mindepth 1 -maxdepth 1 | wc -l)
find {dir} -mindepth 1 -maxdepth 1 -exec rm -rf -- {{}} +
echo "REMOVED:$count"
"#
        );
        let output = self
            .shell
            .exec(&script, &EnvOverlay::new())?
            .check(&format!("purge of {trimmed}"))?;
        let removed = output
            .stdout
            .lines()
            .find_map(|l| l.strip_prefix("REMOVED:"))
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(0);
        tracing::info!(dir = trimmed, removed, "remote outputs purged");
        Ok(PurgeReport {
            dir: trimmed.to_string(),
            removed,
        })
    }

    /// Stop the job session if present, then rotate and purge as planned.
    pub fn cleanup(
        &self,
        sessions: &JobSessionController<'_>,
        plan: CleanupPlan,
        log_file: &str,
        outputs_dir: &str,
    ) -> anyhow::Result<CleanupReport> {
        let session = sessions.stop()?;
        let rotation = if plan.rotate_logs {
            Some(self.rotate_log(log_file, plan.keep_log_backups)?)
        } else {
            None
        };
        let purge = if plan.purge_outputs {
            Some(self.purge_outputs(outputs_dir)?)
        } else {
            None
        };
        Ok(CleanupReport {
            session,
            rotation,
            purge,
        })
    }
}

fn rotate_script(current_path: &str, keep_count: usize) -> anyhow::Result<String> {
    let log = sh_quote(current_path)?;
    Ok(format!(
        r#"set -e
log={log}
dir="$(dirname "$log")"
if [ -f "$log" ]; then
  stamp="$(date -u +%Y%m%d-%H%M%S)"
  target="$dir/run-$stamp.log"
  n=1
  while [ -e "$target" ]; do
    target="$dir/$(printf 'run-%s_%02d.log' "$stamp" "$n")"
    n=$((n + 1))
  done
  mv -- "$log" "$target"
  : > "$log"
  echo "ROTATED:$target"
fi
ls -1t -- "$dir"/run-*.log 2>/dev/null | tail -n +{start} | while IFS= read -r old; do
  rm -f -- "$old"
  echo "PRUNED:$old"
done
"#,
        start = keep_count + 1
    ))
}
