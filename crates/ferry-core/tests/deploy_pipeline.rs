mod support;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use ferry_core::config::LfsMode;
use ferry_core::deploy::{DeployFailureKind, DeployRequest, DeployStep, RepoDeploymentPipeline, StepState};
use ferry_core::error::{FerryError, find_ferry_error};

use support::git::git_command;
use support::local_shell::LocalShell;
use support::scripted::ScriptedShell;
use support::{exit, ok};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = git_command()
        .current_dir(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Ferry Test")
        .env("GIT_AUTHOR_EMAIL", "ferry@example.com")
        .env("GIT_COMMITTER_NAME", "Ferry Test")
        .env("GIT_COMMITTER_EMAIL", "ferry@example.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Origin repository with `train.py` committed on `main`.
fn origin(root: &Path) -> PathBuf {
    let dir = root.join("origin");
    fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init", "-q"]);
    git(&dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(dir.join("train.py"), "print('training')\n").unwrap();
    git(&dir, &["add", "."]);
    git(&dir, &["commit", "-q", "-m", "initial"]);
    dir
}

/// Stand-in interpreter: exits with `status` after printing `stderr`.
fn fake_python(root: &Path, status: i32, stderr: &str) -> String {
    let path = root.join(format!("python-{status}"));
    fs::write(&path, format!("#!/bin/sh\necho '{stderr}' >&2\nexit {status}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn request(origin: &Path, project_dir: &Path, branch: &str, python_bin: String) -> DeployRequest {
    DeployRequest {
        repo_url: origin.display().to_string(),
        branch: branch.to_string(),
        project_dir: project_dir.display().to_string(),
        entry: "train.py".to_string(),
        python_bin,
        lfs: LfsMode::Auto,
    }
}

#[test]
fn clones_then_updates_checkout() {
    let temp = TempDir::new().unwrap();
    let origin = origin(temp.path());
    let project = temp.path().join("remote/opt/app");
    let req = request(&origin, &project, "main", fake_python(temp.path(), 0, ""));
    let shell = LocalShell;
    let pipeline = RepoDeploymentPipeline::new(&shell);

    let report = pipeline.run(&req).unwrap();
    assert_eq!(report.steps.len(), 6);
    let order: Vec<DeployStep> = report.steps.iter().map(|s| s.step).collect();
    assert_eq!(order, DeployStep::ALL.to_vec());
    assert_eq!(report.steps[1].detail, "cloned main");
    assert_eq!(report.steps[2].state, StepState::Skipped);
    assert_eq!(report.steps[3].state, StepState::Skipped);
    assert_eq!(report.summary.branch, "main");
    assert!(!report.summary.shallow);
    assert!(git(&origin, &["rev-parse", "HEAD"]).starts_with(&report.summary.commit));
    assert!(project.join("train.py").is_file());

    fs::write(origin.join("train.py"), "print('training v2')\n").unwrap();
    git(&origin, &["commit", "-q", "-am", "second"]);

    let report = pipeline.run(&req).unwrap();
    assert_eq!(report.steps[1].detail, "updated main");
    assert!(git(&origin, &["rev-parse", "HEAD"]).starts_with(&report.summary.commit));
    assert_eq!(
        fs::read_to_string(project.join("train.py")).unwrap(),
        "print('training v2')\n"
    );
}

#[test]
fn adopts_directory_with_existing_files() {
    let temp = TempDir::new().unwrap();
    let origin = origin(temp.path());
    let project = temp.path().join("remote/app");
    fs::create_dir_all(project.join("audio")).unwrap();
    fs::write(project.join("audio/clip.wav"), b"RIFF").unwrap();
    let req = request(&origin, &project, "main", fake_python(temp.path(), 0, ""));

    let report = RepoDeploymentPipeline::new(&LocalShell).run(&req).unwrap();

    assert_eq!(report.steps[1].detail, "adopted main");
    assert!(project.join("train.py").is_file());
    assert!(project.join("audio/clip.wav").is_file());
}

#[test]
fn missing_branch_halts_after_directory_step() {
    let temp = TempDir::new().unwrap();
    let origin = origin(temp.path());
    let project = temp.path().join("remote/app");
    let req = request(&origin, &project, "release", fake_python(temp.path(), 0, ""));

    let err = RepoDeploymentPipeline::new(&LocalShell).run(&req).unwrap_err();

    let Some(FerryError::Deploy(failure)) = find_ferry_error(&err) else {
        panic!("expected deploy failure, got {err:#}");
    };
    assert_eq!(failure.failed_step, DeployStep::FetchOrClone);
    assert_eq!(failure.last_completed, Some(DeployStep::EnsureDirectory));
    assert_eq!(failure.completed.len(), 1);
    assert_eq!(
        failure.kind,
        DeployFailureKind::BranchNotFound {
            branch: "release".to_string()
        }
    );
    assert!(err.to_string().contains("release"));
    assert_eq!(find_ferry_error(&err).unwrap().exit_code(), 7);
    assert!(project.is_dir());
    assert!(!project.join(".git").exists());
}

#[test]
fn missing_branch_runs_no_later_steps() {
    let shell = ScriptedShell::new().respond("git ls-remote", exit(2, ""));
    let req = DeployRequest {
        repo_url: "https://github.com/acme/asr.git".to_string(),
        branch: "release".to_string(),
        project_dir: "/opt/app".to_string(),
        entry: "train.py".to_string(),
        python_bin: "python3".to_string(),
        lfs: LfsMode::Always,
    };

    RepoDeploymentPipeline::new(&shell).run(&req).unwrap_err();

    let scripts = shell.scripts();
    assert_eq!(scripts.len(), 2);
    assert!(!shell.ran("git lfs"));
    assert!(!shell.ran(".gitmodules"));
    assert!(!shell.ran("compile("));
    let env = &shell.executed.borrow()[1].1;
    assert_eq!(env.get("GIT_TERMINAL_PROMPT"), Some("0"));
}

#[test]
fn missing_entry_fails_verification() {
    let temp = TempDir::new().unwrap();
    let origin = origin(temp.path());
    let project = temp.path().join("remote/app");
    let mut req = request(&origin, &project, "main", fake_python(temp.path(), 0, ""));
    req.entry = "scripts/run.py".to_string();

    let err = RepoDeploymentPipeline::new(&LocalShell).run(&req).unwrap_err();

    let Some(FerryError::Deploy(failure)) = find_ferry_error(&err) else {
        panic!("expected deploy failure, got {err:#}");
    };
    assert_eq!(failure.failed_step, DeployStep::VerifyEntry);
    assert_eq!(failure.last_completed, Some(DeployStep::Submodules));
    assert!(matches!(&failure.kind, DeployFailureKind::EntryMissing { path } if path.ends_with("scripts/run.py")));
}

#[test]
fn syntax_error_reports_last_stderr_line() {
    let temp = TempDir::new().unwrap();
    let origin = origin(temp.path());
    let project = temp.path().join("remote/app");
    let req = request(
        &origin,
        &project,
        "main",
        fake_python(temp.path(), 1, "SyntaxError: invalid syntax"),
    );

    let err = RepoDeploymentPipeline::new(&LocalShell).run(&req).unwrap_err();

    let Some(FerryError::Deploy(failure)) = find_ferry_error(&err) else {
        panic!("expected deploy failure, got {err:#}");
    };
    assert_eq!(failure.failed_step, DeployStep::VerifyEntry);
    match &failure.kind {
        DeployFailureKind::EntryInvalid { detail, .. } => {
            assert_eq!(detail, "SyntaxError: invalid syntax")
        }
        other => panic!("unexpected failure kind {other:?}"),
    }
}

#[test]
fn lfs_step_runs_only_when_attributes_declare_it() {
    let shell = ScriptedShell::new()
        .respond("grep -qs 'filter=lfs'", ok(""))
        .respond("test -f /opt/app/.gitmodules", exit(1, ""))
        .respond("rev-parse", ok("BRANCH=main\nCOMMIT=abc1234\nSHALLOW=false\n"));
    let req = DeployRequest {
        repo_url: "https://github.com/acme/asr.git".to_string(),
        branch: "main".to_string(),
        project_dir: "/opt/app".to_string(),
        entry: "train.py".to_string(),
        python_bin: "python3".to_string(),
        lfs: LfsMode::Auto,
    };

    let report = RepoDeploymentPipeline::new(&shell).run(&req).unwrap();

    assert!(shell.ran("git lfs pull"));
    assert_eq!(report.steps[2].state, StepState::Done);
    assert_eq!(report.steps[3].state, StepState::Skipped);
    assert_eq!(report.summary.commit, "abc1234");
    assert!(!report.summary.has_submodules);
}
