//! Runs "remote" scripts with the local bash.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;

use ferry_core::remote::process::{run_captured, run_streaming};
use ferry_core::remote::{CancelToken, CommandOutput, EnvOverlay, RemoteShell, StreamOutcome};
use ferry_core::transport::{DownloadFilter, FileTransport, TransportStrategy};

#[derive(Debug, Default)]
pub struct LocalShell;

impl LocalShell {
    fn command(script: &str, env: &EnvOverlay) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(script);
        for (key, value) in env.iter() {
            cmd.env(key, value);
        }
        cmd
    }
}

impl RemoteShell for LocalShell {
    fn describe(&self) -> String {
        "localhost".to_string()
    }

    fn exec(&self, script: &str, env: &EnvOverlay) -> anyhow::Result<CommandOutput> {
        run_captured(&mut Self::command(script, env), None)
    }

    fn exec_streaming(
        &self,
        script: &str,
        sink: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> anyhow::Result<StreamOutcome> {
        run_streaming(&mut Self::command(script, &EnvOverlay::new()), sink, cancel)
    }

    fn push_file(&self, contents: &[u8], remote_path: &str) -> anyhow::Result<()> {
        let path = Path::new(remote_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents).with_context(|| format!("write {remote_path}"))
    }
}

/// Copies directory contents with `cp -R`, standing in for scp.
#[derive(Debug, Default)]
pub struct LocalCopyTransport;

fn copy_contents(from: &Path, to: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(to)?;
    let mut cmd = Command::new("cp");
    cmd.arg("-R").arg(from.join(".")).arg(to);
    run_captured(&mut cmd, None)?.check("cp")?;
    Ok(())
}

impl FileTransport for LocalCopyTransport {
    fn strategy(&self) -> TransportStrategy {
        TransportStrategy::Scp
    }

    fn upload(&self, local_dir: &Path, remote_dir: &str) -> anyhow::Result<()> {
        copy_contents(local_dir, &PathBuf::from(remote_dir))
    }

    fn download(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        _filter: Option<&DownloadFilter>,
    ) -> anyhow::Result<()> {
        copy_contents(Path::new(remote_dir), local_dir)
    }
}
