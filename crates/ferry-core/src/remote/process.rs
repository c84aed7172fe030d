//! Local process plumbing shared by the ssh shell, transports and test doubles.

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::Context;

use super::{CancelToken, CommandOutput, StreamOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Run to completion, capturing stdout and stderr. `stdin` is written and closed first.
pub fn run_captured(cmd: &mut Command, stdin: Option<&[u8]>) -> anyhow::Result<CommandOutput> {
    let program = program_name(cmd);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))?;

    if let Some(bytes) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(bytes)
            .with_context(|| format!("Failed to write stdin of {program}"))?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to wait for {program}"))?;

    Ok(CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Forward stdout lines to `sink` until the process exits or `cancel` fires.
///
/// Cancellation kills only the local child; whatever it was attached to on
/// the remote side keeps running.
pub fn run_streaming(
    cmd: &mut Command,
    sink: &mut dyn FnMut(&str),
    cancel: &CancelToken,
) -> anyhow::Result<StreamOutcome> {
    let program = program_name(cmd);
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .stdin(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("{program} stdout was not captured"))?;

    let (tx, rx) = mpsc::channel::<String>();
    let reader = thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            let _ = reader.join();
            return Ok(StreamOutcome::Interrupted);
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => sink(&line),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for {program}"))?;
    let _ = reader.join();

    // A terminal Ctrl+C reaches the child too; it may exit before we observe the flag.
    if cancel.is_cancelled() {
        return Ok(StreamOutcome::Interrupted);
    }
    Ok(StreamOutcome::Completed(status.code().unwrap_or(-1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams_and_status() {
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run_captured(&mut cmd, None).expect("bash should run");
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn feeds_stdin() {
        let mut cmd = Command::new("cat");
        let output = run_captured(&mut cmd, Some(b"payload")).expect("cat should run");
        assert_eq!(output.stdout, "payload");
    }

    #[test]
    fn streams_lines_until_exit() {
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "printf 'a\\nb\\n'"]);
        let mut lines = Vec::new();
        let outcome = run_streaming(
            &mut cmd,
            &mut |line: &str| lines.push(line.to_string()),
            &CancelToken::new(),
        )
        .expect("stream should run");
        assert_eq!(outcome, StreamOutcome::Completed(0));
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn cancellation_is_not_an_error() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let outcome = run_streaming(&mut cmd, &mut |_line: &str| {}, &cancel)
            .expect("cancelled stream should return cleanly");
        assert_eq!(outcome, StreamOutcome::Interrupted);
    }
}
