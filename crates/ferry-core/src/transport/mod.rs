//! File transport: rsync when both ends have it, scp otherwise.
//!
//! The strategy is negotiated once per operation by [`TransportSelector`].
//! Only rsync can filter at transport level; the transfer engine prunes
//! locally after an scp download.

pub mod selector;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use serde::Serialize;

use crate::error::FerryError;
use crate::remote::SshTarget;
use crate::remote::process::run_captured;

pub use selector::{CapabilityNotice, Negotiation, RemoteInstall, TransportSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStrategy {
    Rsync,
    Scp,
}

impl TransportStrategy {
    pub fn binary(self) -> &'static str {
        match self {
            TransportStrategy::Rsync => "rsync",
            TransportStrategy::Scp => "scp",
        }
    }

    pub fn supports_filtering(self) -> bool {
        matches!(self, TransportStrategy::Rsync)
    }

    /// Exit statuses that mean the ssh link itself failed. rsync reports a
    /// broken protocol stream as 12; anything else is a transfer problem.
    pub fn is_connection_exit(self, status: i32) -> bool {
        match self {
            TransportStrategy::Rsync => matches!(status, 12 | 255),
            TransportStrategy::Scp => status == 255,
        }
    }
}

impl fmt::Display for TransportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Include rules for a filtered download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFilter {
    pub glob: String,
    /// Always transferred alongside the matches.
    pub keep: Vec<String>,
}

/// Moves directory trees between the operator machine and the instance.
pub trait FileTransport {
    fn strategy(&self) -> TransportStrategy;

    /// Copy the contents of `local_dir` into `remote_dir`.
    fn upload(&self, local_dir: &Path, remote_dir: &str) -> anyhow::Result<()>;

    /// Copy the contents of `remote_dir` into `local_dir`. `filter` is only
    /// honoured when [`TransportStrategy::supports_filtering`] is true.
    fn download(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        filter: Option<&DownloadFilter>,
    ) -> anyhow::Result<()>;
}

/// rsync/scp over the instance's ssh target.
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: SshTarget,
    strategy: TransportStrategy,
    rsync_bin: PathBuf,
}

impl SshTransport {
    pub fn new(target: SshTarget, strategy: TransportStrategy, rsync_bin: Option<PathBuf>) -> Self {
        Self {
            target,
            strategy,
            rsync_bin: rsync_bin.unwrap_or_else(|| PathBuf::from("rsync")),
        }
    }

    /// `rsync` argv (without program) for an upload.
    pub fn rsync_upload_args(&self, local_dir: &Path, remote_dir: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![
            "-az".to_string(),
            "--partial".to_string(),
            "-e".to_string(),
            self.target.rsync_rsh()?,
            dir_contents(local_dir),
            self.target
                .remote_operand(&format!("{}/", remote_dir.trim_end_matches('/'))),
        ])
    }

    /// `rsync` argv (without program) for a download.
    pub fn rsync_download_args(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        filter: Option<&DownloadFilter>,
    ) -> anyhow::Result<Vec<String>> {
        let mut args = vec![
            "-az".to_string(),
            "--partial".to_string(),
            "-e".to_string(),
            self.target.rsync_rsh()?,
        ];
        if let Some(filter) = filter {
            args.push("--include=*/".to_string());
            args.push(format!("--include={}", filter.glob));
            for keep in &filter.keep {
                args.push(format!("--include={keep}"));
            }
            args.push("--exclude=*".to_string());
            args.push("--prune-empty-dirs".to_string());
        }
        args.push(
            self.target
                .remote_operand(&format!("{}/", remote_dir.trim_end_matches('/'))),
        );
        args.push(dir_contents(local_dir));
        Ok(args)
    }

    /// `scp` argv (without program) for an upload of every top-level entry.
    pub fn scp_upload_args(&self, local_dir: &Path, remote_dir: &str) -> anyhow::Result<Vec<String>> {
        let mut args = self.target.scp_args();
        args.push("-r".to_string());
        args.push("-p".to_string());
        let mut entries = std::fs::read_dir(local_dir)
            .with_context(|| format!("Failed to read directory: {}", local_dir.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list directory: {}", local_dir.display()))?;
        entries.sort();
        args.extend(entries.iter().map(|p| p.to_string_lossy().into_owned()));
        args.push(self.target.remote_operand(remote_dir));
        Ok(args)
    }

    /// `scp` argv (without program) for a download of the directory contents.
    pub fn scp_download_args(&self, remote_dir: &str, local_dir: &Path) -> Vec<String> {
        let mut args = self.target.scp_args();
        args.push("-r".to_string());
        args.push("-p".to_string());
        args.push(
            self.target
                .remote_operand(&format!("{}/.", remote_dir.trim_end_matches('/'))),
        );
        args.push(local_dir.to_string_lossy().into_owned());
        args
    }

    fn run(&self, program: &Path, args: Vec<String>, what: &str) -> anyhow::Result<()> {
        tracing::debug!(program = %program.display(), ?args, "transport command");
        let mut cmd = Command::new(program);
        cmd.args(&args);
        let output = run_captured(&mut cmd, None)?;
        if output.success() {
            return Ok(());
        }
        if self.strategy.is_connection_exit(output.status)
            && let Some(err) = self.target.connectivity_error(&output)
        {
            return Err(err.into());
        }
        anyhow::bail!(
            "{} {} exited with {}: {}",
            self.strategy,
            what,
            output.status,
            output.stderr.trim()
        )
    }
}

fn dir_contents(dir: &Path) -> String {
    let mut s = dir.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

impl FileTransport for SshTransport {
    fn strategy(&self) -> TransportStrategy {
        self.strategy
    }

    fn upload(&self, local_dir: &Path, remote_dir: &str) -> anyhow::Result<()> {
        match self.strategy {
            TransportStrategy::Rsync => {
                let args = self.rsync_upload_args(local_dir, remote_dir)?;
                self.run(&self.rsync_bin, args, "upload")
            }
            TransportStrategy::Scp => {
                let args = self.scp_upload_args(local_dir, remote_dir)?;
                self.run(Path::new("scp"), args, "upload")
            }
        }
    }

    fn download(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        filter: Option<&DownloadFilter>,
    ) -> anyhow::Result<()> {
        match self.strategy {
            TransportStrategy::Rsync => {
                let args = self.rsync_download_args(remote_dir, local_dir, filter)?;
                self.run(&self.rsync_bin, args, "download")
            }
            TransportStrategy::Scp => {
                let args = self.scp_download_args(remote_dir, local_dir);
                self.run(Path::new("scp"), args, "download")
            }
        }
    }
}

/// True when `err` is a connection-level failure that must not be retried.
pub fn is_connectivity(err: &anyhow::Error) -> bool {
    matches!(
        crate::error::find_ferry_error(err),
        Some(FerryError::Connectivity { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transport(strategy: TransportStrategy) -> SshTransport {
        SshTransport::new(
            SshTarget {
                user: "root".into(),
                host: "198.51.100.4".into(),
                port: 22,
                keyfile: None,
                strict_host_keys: false,
            },
            strategy,
            None,
        )
    }

    #[test]
    fn rsync_download_with_filter_includes_manifest() {
        let filter = DownloadFilter {
            glob: "*.json".into(),
            keep: vec!["_manifest.txt".into()],
        };
        let args = transport(TransportStrategy::Rsync)
            .rsync_download_args("/opt/app/output", Path::new("/tmp/res"), Some(&filter))
            .expect("args should build");
        let tail: Vec<&str> = args.iter().skip(4).map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--include=*/",
                "--include=*.json",
                "--include=_manifest.txt",
                "--exclude=*",
                "--prune-empty-dirs",
                "root@198.51.100.4:/opt/app/output/",
                "/tmp/res/",
            ]
        );
    }

    #[test]
    fn rsync_upload_copies_directory_contents() {
        let args = transport(TransportStrategy::Rsync)
            .rsync_upload_args(Path::new("./materials"), "/opt/app/audio/")
            .expect("args should build");
        assert_eq!(args[args.len() - 2], "./materials/");
        assert_eq!(args[args.len() - 1], "root@198.51.100.4:/opt/app/audio/");
    }

    #[test]
    fn scp_upload_lists_top_level_entries() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.wav"), b"b").unwrap();
        std::fs::create_dir(temp.path().join("a")).unwrap();
        let args = transport(TransportStrategy::Scp)
            .scp_upload_args(temp.path(), "/opt/app/audio")
            .expect("args should build");
        let n = args.len();
        assert!(args[n - 3].ends_with("/a"));
        assert!(args[n - 2].ends_with("/b.wav"));
        assert_eq!(args[n - 1], "root@198.51.100.4:/opt/app/audio");
    }

    #[test]
    fn scp_download_copies_contents() {
        let args = transport(TransportStrategy::Scp).scp_download_args("/opt/out/", Path::new("/tmp/r"));
        assert_eq!(args[args.len() - 2], "root@198.51.100.4:/opt/out/.");
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[test]
    fn remote_file_permission_error_stays_retryable() {
        let err = transport(TransportStrategy::Rsync)
            .run(
                Path::new("sh"),
                sh(concat!(
                    "echo 'rsync: [sender] opendir \"/opt/out/private\" failed: Permission denied (13)' >&2; ",
                    "echo 'rsync error: some files/attrs were not transferred (see previous errors) (code 23)' >&2; ",
                    "exit 23",
                )),
                "download",
            )
            .unwrap_err();
        assert!(!is_connectivity(&err));
        assert!(err.to_string().contains("exited with 23"));
    }

    #[test]
    fn scp_local_permission_error_stays_retryable() {
        let err = transport(TransportStrategy::Scp)
            .run(
                Path::new("sh"),
                sh("echo 'scp: /tmp/r/a.json: Permission denied' >&2; exit 1"),
                "download",
            )
            .unwrap_err();
        assert!(!is_connectivity(&err));
    }

    #[test]
    fn ssh_auth_failure_is_connectivity() {
        for strategy in [TransportStrategy::Rsync, TransportStrategy::Scp] {
            let err = transport(strategy)
                .run(
                    Path::new("sh"),
                    sh("echo 'root@198.51.100.4: Permission denied (publickey).' >&2; exit 255"),
                    "upload",
                )
                .unwrap_err();
            assert!(is_connectivity(&err), "{strategy}: {err:#}");
        }
    }

    #[test]
    fn rsync_stream_break_is_a_connection_exit() {
        assert!(TransportStrategy::Rsync.is_connection_exit(12));
        assert!(TransportStrategy::Rsync.is_connection_exit(255));
        assert!(!TransportStrategy::Rsync.is_connection_exit(23));
        assert!(!TransportStrategy::Scp.is_connection_exit(1));
    }

    #[test]
    fn only_rsync_filters() {
        assert!(TransportStrategy::Rsync.supports_filtering());
        assert!(!TransportStrategy::Scp.supports_filtering());
    }
}
