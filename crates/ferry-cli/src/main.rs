//! Ferry - remote job lifecycle manager
//!
//! Usage:
//!   ferry instances        # List cloud instances
//!   ferry select <id>      # Remember the target instance
//!   ferry bootstrap        # Prepare the instance
//!   ferry deploy           # Clone or update the job repository
//!   ferry upload           # Push input material
//!   ferry run              # Start the job in a detached session
//!   ferry logs             # Follow the job log (Ctrl+C stops following)
//!   ferry fetch            # Download and verify results
//!   ferry cleanup          # Stop the job, rotate logs, purge outputs

mod prompt;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::bootstrap::{BootstrapOrchestrator, BootstrapReport, HealthStatus, bootstrap_env};
use ferry_core::context::AppContext;
use ferry_core::deploy::{DeployReport, DeployRequest, RepoDeploymentPipeline, StepState};
use ferry_core::error::{EXIT_INCOMPLETE, EXIT_INTERRUPTED, find_ferry_error};
use ferry_core::housekeeping::{CleanupPlan, CleanupReport, HousekeepingManager};
use ferry_core::inventory::{InstanceSummary, InventoryClient};
use ferry_core::remote::{CancelToken, SshShell, StreamOutcome};
use ferry_core::session::{
    JobLaunch, JobSessionController, LogMirror, SessionState, StartMode, StopOutcome,
};
use ferry_core::state::{InstanceRef, StateLoad};
use ferry_core::transfer::{Direction, TransferEngine, TransferOutcome, TransferReport};
use ferry_core::transport::{Negotiation, TransportSelector};

use crate::prompt::Prompter;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Remote job lifecycle manager", long_about = None)]
struct Cli {
    /// Path to ferry.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Answer yes to every confirmation prompt
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List instances from the cloud inventory
    Instances,

    /// Select the target instance
    ///
    /// Without --ip the instance is looked up in the inventory. Without an id
    /// the inventory is listed and one instance is picked interactively.
    Select {
        /// Instance id
        id: Option<String>,
        /// Address to use instead of looking the instance up
        #[arg(long)]
        ip: Option<String>,
        /// Label to record with --ip
        #[arg(long)]
        label: Option<String>,
    },

    /// Show the selected instance and resolved paths
    Show,

    /// Run the provisioning script and report instance health
    Bootstrap,

    /// Clone or update the job repository on the instance
    Deploy,

    /// Upload local input material to the instance
    Upload {
        /// Fail when the local directory is missing or empty
        #[arg(long)]
        require_content: bool,
    },

    /// Start the job in its detached session
    Run {
        /// Stop a running session before starting
        #[arg(long)]
        restart: bool,
    },

    /// Report whether the job session is running
    Status,

    /// Follow the remote job log until interrupted
    Logs {
        /// Do not mirror the log into a local file
        #[arg(long)]
        no_mirror: bool,
    },

    /// Stop the job session
    Stop,

    /// Download results into a fresh local run directory
    Fetch {
        /// Only download files matching this glob
        #[arg(long)]
        glob: Option<String>,
        /// Skip manifest verification
        #[arg(long)]
        no_verify: bool,
        /// Rotate the remote log afterwards
        #[arg(long)]
        rotate_logs: bool,
        /// Purge remote outputs after a verified download
        #[arg(long)]
        purge: bool,
    },

    /// Stop the session, then rotate logs and purge outputs as configured
    Cleanup {
        /// Rotate the remote log
        #[arg(long)]
        rotate_logs: bool,
        /// Purge remote outputs
        #[arg(long)]
        purge: bool,
    },
}

#[derive(Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{} {:#}", style("error:").red().bold(), err);
            let typed = find_ferry_error(&err);
            if let Some(hint) = typed.and_then(|e| e.hint()) {
                eprintln!("{} {}", style("hint:").yellow().bold(), hint);
            }
            exit_code(typed.map(|e| e.exit_code()).unwrap_or(1))
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run_cli(cli: Cli) -> Result<i32> {
    let ctx = AppContext::load(cli.config.as_deref())?;
    let mut prompter = Prompter::new(cli.yes);
    let format = cli.format;

    match cli.command {
        Commands::Instances => run_instances(&ctx, format),
        Commands::Select { id, ip, label } => run_select(&ctx, &mut prompter, format, id, ip, label),
        Commands::Show => run_show(&ctx, format),
        Commands::Bootstrap => run_bootstrap(&ctx, format),
        Commands::Deploy => run_deploy(&ctx, format),
        Commands::Upload { require_content } => {
            run_upload(&ctx, &mut prompter, format, require_content)
        }
        Commands::Run { restart } => run_job(&ctx, format, restart),
        Commands::Status => run_status(&ctx, format),
        Commands::Logs { no_mirror } => run_logs(&ctx, no_mirror),
        Commands::Stop => run_stop(&ctx, format),
        Commands::Fetch {
            glob,
            no_verify,
            rotate_logs,
            purge,
        } => run_fetch(
            &ctx,
            &mut prompter,
            format,
            FetchOptions {
                glob,
                verify: !no_verify,
                rotate_logs,
                purge,
            },
        ),
        Commands::Cleanup { rotate_logs, purge } => {
            run_cleanup(&ctx, &mut prompter, format, rotate_logs, purge)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn connect(ctx: &AppContext) -> Result<(InstanceRef, SshShell)> {
    let instance = ctx.require_instance()?;
    let shell = ctx.shell(&instance);
    Ok((instance, shell))
}

fn inventory_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

fn run_instances(ctx: &AppContext, format: OutputFormat) -> Result<i32> {
    let client = InventoryClient::from_config(&ctx.config().inventory)?;
    let instances = inventory_runtime()?.block_on(client.list_instances())?;

    if format == OutputFormat::Json {
        print_json(&instances)?;
        return Ok(0);
    }

    let selected = match ctx.state_store().load() {
        StateLoad::Found(instance) => Some(instance.id),
        _ => None,
    };
    if instances.is_empty() {
        println!("No instances found.");
        return Ok(0);
    }
    println!(
        "  {:<38} {:<20} {:<16} {:<10} {:<10} {:<8} Plan",
        "ID", "Label", "IP", "Status", "Power", "Region"
    );
    for instance in &instances {
        let marker = if selected.as_deref() == Some(instance.id.as_str()) {
            style("*").green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:<38} {:<20} {:<16} {:<10} {:<10} {:<8} {}",
            marker,
            instance.id,
            if instance.label.is_empty() { "-" } else { &instance.label },
            instance.primary_ip,
            instance.status,
            instance.power_status,
            instance.region,
            instance.plan
        );
    }
    Ok(0)
}

fn run_select(
    ctx: &AppContext,
    prompter: &mut Prompter,
    format: OutputFormat,
    id: Option<String>,
    ip: Option<String>,
    label: Option<String>,
) -> Result<i32> {
    let instance = match (id, ip) {
        (Some(id), Some(ip)) => InstanceRef::new(id, label.unwrap_or_default(), ip),
        (None, Some(_)) => anyhow::bail!("--ip requires an instance id"),
        (Some(id), None) => {
            let client = InventoryClient::from_config(&ctx.config().inventory)?;
            inventory_runtime()?.block_on(client.get_instance(&id))?.to_ref()
        }
        (None, None) => {
            let client = InventoryClient::from_config(&ctx.config().inventory)?;
            let instances: Vec<InstanceSummary> =
                inventory_runtime()?.block_on(client.list_instances())?;
            match prompter.pick_instance(&instances)? {
                Some(idx) => instances[idx].to_ref(),
                None => anyhow::bail!("No instances available to select"),
            }
        }
    };
    if instance.primary_ip.trim().is_empty() {
        anyhow::bail!(
            "Instance {} has no address yet; wait until it is active",
            instance.id
        );
    }

    let store = ctx.state_store();
    store.save(&instance)?;
    tracing::info!(instance = %instance.id, ip = %instance.primary_ip, "instance selected");
    match format {
        OutputFormat::Json => print_json(&instance)?,
        OutputFormat::Table => println!(
            "{} Selected {} ({})",
            style("✓").green(),
            style(instance.display_name()).bold(),
            instance.primary_ip
        ),
    }
    Ok(0)
}

#[derive(Serialize)]
struct ShowReport<'a> {
    config_path: &'a Path,
    state_path: &'a Path,
    instance: Option<&'a InstanceRef>,
    state_error: Option<String>,
    session: &'a str,
    project_dir: &'a str,
    inputs_dir: &'a str,
    outputs_dir: &'a str,
    log_file: &'a str,
}

fn run_show(ctx: &AppContext, format: OutputFormat) -> Result<i32> {
    let store = ctx.state_store();
    let load = store.load();
    let (instance, state_error) = match &load {
        StateLoad::Found(instance) => (Some(instance), None),
        StateLoad::NotFound => (None, Some("no instance selected".to_string())),
        StateLoad::Corrupt { reason } => (None, Some(format!("record unreadable: {reason}"))),
    };
    let remote = &ctx.config().remote;
    let report = ShowReport {
        config_path: ctx.config_path(),
        state_path: store.path(),
        instance,
        state_error,
        session: &remote.session,
        project_dir: &remote.project_dir,
        inputs_dir: &remote.inputs_dir,
        outputs_dir: &remote.outputs_dir,
        log_file: &remote.log_file,
    };

    if format == OutputFormat::Json {
        print_json(&report)?;
        return Ok(0);
    }
    match report.instance {
        Some(instance) => {
            println!("Instance:  {}", style(instance.display_name()).bold());
            println!("  id:      {}", instance.id);
            println!("  address: {}", instance.primary_ip);
        }
        None => println!(
            "Instance:  {}",
            style(report.state_error.as_deref().unwrap_or("none")).yellow()
        ),
    }
    println!("Config:    {}", report.config_path.display());
    println!("State:     {}", report.state_path.display());
    println!("Session:   {}", report.session);
    println!("Project:   {}", report.project_dir);
    println!("Inputs:    {}", report.inputs_dir);
    println!("Outputs:   {}", report.outputs_dir);
    println!("Log:       {}", report.log_file);
    Ok(0)
}

fn status_style(status: HealthStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        HealthStatus::Ok => style(text).green(),
        HealthStatus::Fail => style(text).red(),
        HealthStatus::Skipped => style(text).dim(),
    }
}

fn print_bootstrap(report: &BootstrapReport) {
    println!("{:<10} {:<8} Detail", "Stage", "Status");
    println!(
        "{:<10} {:<8} {}",
        "upload",
        status_style(report.upload.status),
        report.upload.message
    );
    println!(
        "{:<10} {:<8} {}",
        "execute",
        status_style(report.execution.status),
        report.execution.message
    );
    println!();
    println!("{:<14} {:<8} Message", "Check", "Status");
    for check in &report.health.checks {
        println!(
            "{:<14} {:<8} {}",
            check.name,
            status_style(check.status),
            check.message
        );
    }
    println!();
    println!("Environment:");
    for (key, value) in &report.environment {
        println!("  {key}={value}");
    }
}

fn run_bootstrap(ctx: &AppContext, format: OutputFormat) -> Result<i32> {
    let (_, shell) = connect(ctx)?;
    let orchestrator = BootstrapOrchestrator::new(&shell, &ctx.config().remote.bootstrap_tmp_path);
    let report = orchestrator.run(&bootstrap_env(ctx.config()))?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_bootstrap(&report),
    }
    report.ensure_completed()?;
    if !report.health.is_healthy() {
        eprintln!(
            "{} some checks failed; bootstrap is safe to re-run once they are fixed",
            style("warning:").yellow().bold()
        );
    }
    Ok(0)
}

fn print_deploy(report: &DeployReport) {
    println!("Repository: {}", report.repo_url);
    for step in &report.steps {
        let mark = match step.state {
            StepState::Done => style("✓").green(),
            StepState::Skipped => style("-").dim(),
        };
        println!("  {} {:<28} {}", mark, step.step.to_string(), step.detail);
    }
    let summary = &report.summary;
    println!();
    println!("Branch:     {}", summary.branch);
    println!("Commit:     {}", summary.commit);
    println!("Submodules: {}", if summary.has_submodules { "yes" } else { "no" });
    println!("Shallow:    {}", if summary.shallow { "yes" } else { "no" });
    println!(
        "Entry:      {} (exists: {}, valid: {})",
        summary.entry_path, summary.entry_exists, summary.entry_valid
    );
}

fn run_deploy(ctx: &AppContext, format: OutputFormat) -> Result<i32> {
    let request = DeployRequest::from_config(ctx.config())?;
    let (_, shell) = connect(ctx)?;
    let report = RepoDeploymentPipeline::new(&shell).run(&request)?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_deploy(&report),
    }
    Ok(0)
}

fn negotiate(ctx: &AppContext, shell: &SshShell, prompter: &mut Prompter) -> Result<Negotiation> {
    let selector = TransportSelector::new(shell);
    let negotiation = selector.negotiate(ctx.config().transfer.prefer_rsync, &mut |question: &str| {
        prompter.confirm(question, true).unwrap_or(false)
    })?;
    for notice in &negotiation.notices {
        eprintln!("{} {}", style("notice:").yellow().bold(), notice);
    }
    Ok(negotiation)
}

fn print_transfer(report: &TransferReport) {
    let job = &report.job;
    println!(
        "{} via {}: {} {} {}",
        job.direction,
        report.strategy,
        job.local_path.display(),
        match job.direction {
            Direction::Upload => "->",
            Direction::Download => "<-",
        },
        job.remote_path
    );
    for event in &report.events {
        match &event.error {
            Some(error) => println!("  {} {}: {}", style("!").yellow(), event, error),
            None => println!("  {} {}", style("✓").green(), event),
        }
    }
    if let Some(verification) = &report.verification {
        println!(
            "  manifest: {} expected, {} missing, {} size mismatch",
            verification.expected,
            verification.missing.len(),
            verification.size_mismatch.len()
        );
        for path in &verification.missing {
            println!("    missing  {path}");
        }
        for mismatch in &verification.size_mismatch {
            println!(
                "    size     {} (expected {}, got {})",
                mismatch.path, mismatch.expected, mismatch.actual
            );
        }
    }
    if report.pruned > 0 {
        println!("  pruned {} file(s) outside the glob", report.pruned);
    }
    match &report.outcome {
        TransferOutcome::Complete => println!("{}", style("complete").green().bold()),
        TransferOutcome::Incomplete => println!("{}", style("incomplete").red().bold()),
        TransferOutcome::Skipped { reason } => println!("{} {}", style("skipped:").dim(), reason),
    }
}

fn run_upload(
    ctx: &AppContext,
    prompter: &mut Prompter,
    format: OutputFormat,
    require_content: bool,
) -> Result<i32> {
    let config = ctx.config();
    let (instance, shell) = connect(ctx)?;
    let negotiation = negotiate(ctx, &shell, prompter)?;
    let transport = ctx.transport(&instance, &negotiation);
    let engine = TransferEngine::new(&shell, &transport, ctx.retry_policy())
        .with_manifest_name(&config.transfer.manifest_name);
    let report = engine.upload(
        &config.transfer.upload_local_dir,
        &config.remote.inputs_dir,
        require_content || config.transfer.require_content,
    )?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_transfer(&report),
    }
    Ok(0)
}

fn run_job(ctx: &AppContext, format: OutputFormat, restart: bool) -> Result<i32> {
    let config = ctx.config();
    let (_, shell) = connect(ctx)?;
    let controller = JobSessionController::new(&shell, &config.remote.session);
    let mode = if restart {
        StartMode::Restart
    } else {
        StartMode::FailIfRunning
    };
    let report = controller.start(&JobLaunch::from_config(config), &config.remote.log_file, mode)?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            let verb = if report.restarted { "Restarted" } else { "Started" };
            println!(
                "{} {} session '{}'",
                style("✓").green(),
                verb,
                report.session
            );
            println!("  command: {}", report.command);
            println!("  log:     {}", report.log_file);
        }
    }
    Ok(0)
}

fn run_status(ctx: &AppContext, format: OutputFormat) -> Result<i32> {
    let (_, shell) = connect(ctx)?;
    let controller = JobSessionController::new(&shell, &ctx.config().remote.session);
    let state = controller.state()?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "session": controller.session(),
            "state": state,
        }))?,
        OutputFormat::Table => match state {
            SessionState::Running => println!(
                "Session '{}' is {}",
                controller.session(),
                style("running").green()
            ),
            SessionState::Absent => println!(
                "Session '{}' is {}",
                controller.session(),
                style("not running").dim()
            ),
        },
    }
    Ok(0)
}

fn run_logs(ctx: &AppContext, no_mirror: bool) -> Result<i32> {
    let config = ctx.config();
    let (instance, shell) = connect(ctx)?;
    let controller = JobSessionController::new(&shell, &config.remote.session);

    // A second Ctrl+C while the first is being handled exits immediately.
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register_conditional_shutdown(
        signal_hook::consts::SIGINT,
        EXIT_INTERRUPTED,
        Arc::clone(&interrupted),
    )
    .context("Failed to install Ctrl+C handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
        .context("Failed to install Ctrl+C handler")?;
    let cancel = CancelToken::from_flag(interrupted);

    let mut mirror = if config.logging.mirror_on_view && !no_mirror {
        Some(LogMirror::create(
            &config.logging.local_root,
            &instance,
            &config.logging.filename,
            Utc::now(),
        )?)
    } else {
        None
    };
    if let Some(mirror) = &mirror {
        eprintln!("Mirroring to {}", mirror.path().display());
    }

    let mut mirror_error = None;
    let outcome = controller.stream_log(
        &config.remote.log_file,
        &mut |line: &str| {
            println!("{line}");
            if let Some(m) = mirror.as_mut()
                && mirror_error.is_none()
                && let Err(err) = m.write_line(line)
            {
                mirror_error = Some(err);
            }
        },
        &cancel,
    )?;
    if let Some(err) = mirror_error {
        eprintln!("{} {:#}", style("warning:").yellow().bold(), err);
    }

    match outcome {
        StreamOutcome::Interrupted => {
            eprintln!("Stopped following; session '{}' left running", controller.session());
            Ok(EXIT_INTERRUPTED)
        }
        StreamOutcome::Completed(_) => Ok(0),
    }
}

fn run_stop(ctx: &AppContext, format: OutputFormat) -> Result<i32> {
    let (_, shell) = connect(ctx)?;
    let controller = JobSessionController::new(&shell, &ctx.config().remote.session);
    let outcome = controller.stop()?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "session": controller.session(),
            "outcome": outcome,
        }))?,
        OutputFormat::Table => match outcome {
            StopOutcome::Stopped => {
                println!("{} Stopped session '{}'", style("✓").green(), controller.session())
            }
            StopOutcome::NoSession => println!("no session to stop"),
        },
    }
    Ok(0)
}

struct FetchOptions {
    glob: Option<String>,
    verify: bool,
    rotate_logs: bool,
    purge: bool,
}

#[derive(Serialize)]
struct FetchReport {
    transfer: TransferReport,
    cleanup: Option<CleanupReport>,
}

fn run_fetch(
    ctx: &AppContext,
    prompter: &mut Prompter,
    format: OutputFormat,
    options: FetchOptions,
) -> Result<i32> {
    let config = ctx.config();
    let (instance, shell) = connect(ctx)?;
    let negotiation = negotiate(ctx, &shell, prompter)?;
    let transport = ctx.transport(&instance, &negotiation);
    let engine = TransferEngine::new(&shell, &transport, ctx.retry_policy())
        .with_manifest_name(&config.transfer.manifest_name);
    let glob = options.glob.or_else(|| config.transfer.download_glob.clone());
    let report = engine.download(
        &config.remote.outputs_dir,
        &config.transfer.results_root,
        &instance,
        Utc::now(),
        glob.as_deref(),
        options.verify && config.transfer.verify_manifest,
    )?;
    let complete = report.is_complete();

    if format == OutputFormat::Table {
        print_transfer(&report);
    }

    let housekeeping = HousekeepingManager::new(&shell);
    let requested = PostFetch {
        rotate: options.rotate_logs || config.cleanup.rotate_remote_logs,
        purge: options.purge || config.cleanup.remove_remote_outputs,
    };
    let PostFetch { rotate, mut purge } = requested.gated(complete);
    if requested.any() && !complete {
        eprintln!(
            "{} download incomplete; remote log and outputs kept",
            style("warning:").yellow().bold()
        );
    }
    if purge {
        purge = prompter.confirm(
            &format!("Delete everything in {} on the instance?", config.remote.outputs_dir),
            false,
        )?;
    }

    let mut cleanup = None;
    if rotate || purge {
        let rotation = if rotate {
            Some(housekeeping.rotate_log(&config.remote.log_file, config.cleanup.keep_log_backups)?)
        } else {
            None
        };
        let purged = if purge {
            Some(housekeeping.purge_outputs(&config.remote.outputs_dir)?)
        } else {
            None
        };
        if format == OutputFormat::Table {
            print_housekeeping(rotation.as_ref(), purged.as_ref());
        }
        cleanup = Some(CleanupReport {
            session: StopOutcome::NoSession,
            rotation,
            purge: purged,
        });
    }

    if format == OutputFormat::Json {
        print_json(&FetchReport {
            transfer: report,
            cleanup,
        })?;
    }
    Ok(if complete { 0 } else { EXIT_INCOMPLETE })
}

/// Remote housekeeping requested after a fetch. Nothing on the instance is
/// touched when the download is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PostFetch {
    rotate: bool,
    purge: bool,
}

impl PostFetch {
    fn any(self) -> bool {
        self.rotate || self.purge
    }

    fn gated(self, complete: bool) -> Self {
        if complete {
            self
        } else {
            Self {
                rotate: false,
                purge: false,
            }
        }
    }
}

fn print_housekeeping(
    rotation: Option<&ferry_core::housekeeping::RotationReport>,
    purge: Option<&ferry_core::housekeeping::PurgeReport>,
) {
    if let Some(rotation) = rotation {
        match &rotation.rotated_to {
            Some(path) => println!("Rotated log to {path}"),
            None => println!("No log to rotate"),
        }
        for path in &rotation.pruned {
            println!("  removed old log {path}");
        }
    }
    if let Some(purge) = purge {
        println!("Purged {} entr(ies) from {}", purge.removed, purge.dir);
    }
}

fn run_cleanup(
    ctx: &AppContext,
    prompter: &mut Prompter,
    format: OutputFormat,
    rotate_logs: bool,
    purge: bool,
) -> Result<i32> {
    let config = ctx.config();
    let (_, shell) = connect(ctx)?;
    let mut plan = CleanupPlan::from_config(&config.cleanup);
    plan.rotate_logs |= rotate_logs;
    plan.purge_outputs |= purge;
    if plan.purge_outputs {
        plan.purge_outputs = prompter.confirm(
            &format!(
                "Delete everything in {} on the instance? Only do this after a verified fetch.",
                config.remote.outputs_dir
            ),
            false,
        )?;
    }

    let controller = JobSessionController::new(&shell, &config.remote.session);
    let report = HousekeepingManager::new(&shell).cleanup(
        &controller,
        plan,
        &config.remote.log_file,
        &config.remote.outputs_dir,
    )?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            match report.session {
                StopOutcome::Stopped => println!("Stopped session '{}'", controller.session()),
                StopOutcome::NoSession => println!("no session to stop"),
            }
            print_housekeeping(report.rotation.as_ref(), report.purge.as_ref());
        }
    }
    Ok(0)
}
