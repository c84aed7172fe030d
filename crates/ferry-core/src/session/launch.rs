//! Job launch command and environment.
//!
//! Resolves configuration into a concrete [`RunnerSpec`] of the shape
//! `<python_bin> <entry> --input <dir> --output <dir> [--models-dir <dir>]
//! [--model <name>] [extra args...]` plus an environment overlay.

use crate::config::FerryConfig;
use crate::deploy::resolve_entry;
use crate::remote::{EnvOverlay, sh_quote};

/// Resolved executable: command, args and env.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: EnvOverlay,
}

impl RunnerSpec {
    /// `K='v' cmd 'arg' ...` as transmitted.
    pub fn shell_line(&self) -> anyhow::Result<String> {
        let mut line = self.env.to_shell_prefix()?;
        line.push_str(&sh_quote(&self.command)?);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&sh_quote(arg)?);
        }
        Ok(line)
    }

    /// Same as [`Self::shell_line`] with sensitive env values masked.
    pub fn display_line(&self) -> String {
        let mut parts = vec![self.command.clone()];
        parts.extend(self.args.iter().cloned());
        format!("{}{}", self.env.to_masked_prefix(), parts.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLaunch {
    pub python_bin: String,
    pub entry_path: String,
    pub workdir: String,
    pub inputs_dir: String,
    pub outputs_dir: String,
    pub models_dir: Option<String>,
    pub model: Option<String>,
    pub extra_args: Vec<String>,
    pub env: EnvOverlay,
}

impl JobLaunch {
    pub fn from_config(config: &FerryConfig) -> Self {
        let remote = &config.remote;
        let job = &config.job;
        let hf = &config.huggingface;
        let placeholders = [
            ("base_dir", remote.base_dir.as_str()),
            ("project_dir", remote.project_dir.as_str()),
            ("inputs_dir", remote.inputs_dir.as_str()),
            ("outputs_dir", remote.outputs_dir.as_str()),
            ("models_dir", remote.models_dir.as_str()),
        ];

        let mut env = EnvOverlay::new();
        for (key, value) in &job.env {
            env.set(key.as_str(), expand_placeholders(value, &placeholders));
        }
        if !hf.hf_home.is_empty() {
            env.set("HF_HOME", hf.hf_home.as_str());
        }
        // Persistent mode logged in during bootstrap; otherwise the token
        // lives only in this launch's environment.
        if !hf.persist_login
            && let Some(token) = hf.resolved_token()
        {
            env.set("HUGGINGFACE_HUB_TOKEN", token.as_str());
            env.set("HF_TOKEN", token);
        }

        Self {
            python_bin: job.python_bin.clone(),
            entry_path: resolve_entry(&remote.project_dir, &job.entry),
            workdir: remote.project_dir.clone(),
            inputs_dir: remote.inputs_dir.clone(),
            outputs_dir: remote.outputs_dir.clone(),
            models_dir: Some(remote.models_dir.clone()).filter(|d| !d.is_empty()),
            model: job.model.clone().filter(|m| !m.is_empty()),
            extra_args: job.extra_args.clone(),
            env,
        }
    }

    pub fn runner_spec(&self) -> RunnerSpec {
        let mut args = vec![
            self.entry_path.clone(),
            "--input".to_string(),
            self.inputs_dir.clone(),
            "--output".to_string(),
            self.outputs_dir.clone(),
        ];
        if let Some(models_dir) = &self.models_dir {
            args.push("--models-dir".to_string());
            args.push(models_dir.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());

        RunnerSpec {
            command: self.python_bin.clone(),
            args,
            env: self.env.clone(),
        }
    }
}

/// Replace `{name}` tokens with their values; unknown tokens are left as is.
pub fn expand_placeholders(value: &str, vars: &[(&str, &str)]) -> String {
    let mut out = value.to_string();
    for (name, replacement) in vars {
        out = out.replace(&format!("{{{name}}}"), replacement);
    }
    out
}

/// Body run inside the session: frames the job output with `[START]` and
/// `[END]` lines in the log and exits with the job's status.
pub fn framed_job_script(
    spec: &RunnerSpec,
    workdir: &str,
    session: &str,
    log_file: &str,
) -> anyhow::Result<String> {
    let workdir = sh_quote(workdir)?;
    let log = sh_quote(log_file)?;
    let session = sh_quote(session)?;
    let shown = sh_quote(&spec.display_line())?.into_owned();
    let line = spec.shell_line()?;
    Ok(format!(
        r#"cd {workdir} || exit 1
printf '%s %s session=%s cmd=%s\n' '[START]' "$(date -Is)" {session} {shown} | tee -a {log}
{line} 2>&1 | tee -a {log}
exit_code=${{PIPESTATUS[0]}}
printf '%s %s exit_code=%s\n' '[END]' "$(date -Is)" "$exit_code" | tee -a {log}
exit "$exit_code"
"#
    ))
}
