//! Deterministic doubles for the shell, transport and sleeper seams.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use ferry_core::error::{ConnectivityKind, FerryError};
use ferry_core::remote::{CancelToken, CommandOutput, EnvOverlay, RemoteShell, StreamOutcome};
use ferry_core::transfer::Sleeper;
use ferry_core::transport::{DownloadFilter, FileTransport, TransportStrategy};

struct Rule {
    needle: String,
    responses: VecDeque<CommandOutput>,
}

/// Answers scripts by substring match. A rule with several responses hands
/// them out in order and then repeats the last one.
#[derive(Default)]
pub struct ScriptedShell {
    rules: RefCell<Vec<Rule>>,
    pub executed: RefCell<Vec<(String, EnvOverlay)>>,
    pub pushed: RefCell<Vec<(String, Vec<u8>)>>,
    stream_lines: Vec<String>,
    interrupt_stream: bool,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, needle: &str, output: CommandOutput) -> Self {
        self.respond_seq(needle, vec![output])
    }

    pub fn respond_seq(self, needle: &str, outputs: Vec<CommandOutput>) -> Self {
        self.rules.borrow_mut().push(Rule {
            needle: needle.to_string(),
            responses: outputs.into(),
        });
        self
    }

    /// Lines produced by `exec_streaming`; with `interrupt`, the cancel token
    /// fires after the last line as if the operator pressed Ctrl+C.
    pub fn streaming(mut self, lines: &[&str], interrupt: bool) -> Self {
        self.stream_lines = lines.iter().map(|l| l.to_string()).collect();
        self.interrupt_stream = interrupt;
        self
    }

    pub fn scripts(&self) -> Vec<String> {
        self.executed.borrow().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.scripts().iter().any(|s| s.contains(needle))
    }
}

impl RemoteShell for ScriptedShell {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn exec(&self, script: &str, env: &EnvOverlay) -> anyhow::Result<CommandOutput> {
        self.executed
            .borrow_mut()
            .push((script.to_string(), env.clone()));
        let mut rules = self.rules.borrow_mut();
        for rule in rules.iter_mut() {
            if script.contains(&rule.needle) {
                let output = if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                };
                return Ok(output.unwrap_or_default());
            }
        }
        Ok(CommandOutput::default())
    }

    fn exec_streaming(
        &self,
        script: &str,
        sink: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> anyhow::Result<StreamOutcome> {
        self.executed
            .borrow_mut()
            .push((script.to_string(), EnvOverlay::new()));
        for line in &self.stream_lines {
            sink(line);
        }
        if self.interrupt_stream {
            cancel.cancel();
        }
        if cancel.is_cancelled() {
            Ok(StreamOutcome::Interrupted)
        } else {
            Ok(StreamOutcome::Completed(0))
        }
    }

    fn push_file(&self, contents: &[u8], remote_path: &str) -> anyhow::Result<()> {
        self.pushed
            .borrow_mut()
            .push((remote_path.to_string(), contents.to_vec()));
        Ok(())
    }
}

pub enum Attempt {
    Fail(&'static str),
    Unreachable,
    Succeed,
}

/// Transport whose attempts follow a script; a successful download writes
/// `files` into the destination.
pub struct ScriptedTransport {
    strategy: TransportStrategy,
    attempts: RefCell<VecDeque<Attempt>>,
    files: Vec<(String, Vec<u8>)>,
    pub calls: RefCell<u32>,
    pub filters: RefCell<Vec<Option<DownloadFilter>>>,
}

impl ScriptedTransport {
    pub fn new(strategy: TransportStrategy, attempts: Vec<Attempt>) -> Self {
        Self {
            strategy,
            attempts: RefCell::new(attempts.into()),
            files: Vec::new(),
            calls: RefCell::new(0),
            filters: RefCell::new(Vec::new()),
        }
    }

    pub fn with_file(mut self, rel: &str, contents: &[u8]) -> Self {
        self.files.push((rel.to_string(), contents.to_vec()));
        self
    }

    fn next(&self) -> anyhow::Result<()> {
        *self.calls.borrow_mut() += 1;
        match self.attempts.borrow_mut().pop_front().unwrap_or(Attempt::Succeed) {
            Attempt::Succeed => Ok(()),
            Attempt::Fail(msg) => Err(anyhow::anyhow!("{}", msg)),
            Attempt::Unreachable => Err(FerryError::Connectivity {
                kind: ConnectivityKind::Unreachable,
                host: "203.0.113.7".to_string(),
                detail: "Connection timed out".to_string(),
            }
            .into()),
        }
    }
}

impl FileTransport for ScriptedTransport {
    fn strategy(&self) -> TransportStrategy {
        self.strategy
    }

    fn upload(&self, _local_dir: &Path, _remote_dir: &str) -> anyhow::Result<()> {
        self.next()
    }

    fn download(
        &self,
        _remote_dir: &str,
        local_dir: &Path,
        filter: Option<&DownloadFilter>,
    ) -> anyhow::Result<()> {
        self.filters.borrow_mut().push(filter.cloned());
        self.next()?;
        for (rel, contents) in &self.files {
            let path = local_dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub delays: RefCell<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.borrow_mut().push(duration);
    }
}
