mod support;

use std::fs;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use ferry_core::error::{FerryError, find_ferry_error};
use ferry_core::state::InstanceRef;
use ferry_core::transfer::{Direction, RetryPolicy, TransferEngine, TransferOutcome};
use ferry_core::transport::TransportStrategy;

use support::local_shell::{LocalCopyTransport, LocalShell};
use support::scripted::{Attempt, RecordingSleeper, ScriptedShell, ScriptedTransport};

fn policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(3))
}

fn instance() -> InstanceRef {
    InstanceRef::new("cb676a46", "asr-gpu", "203.0.113.7")
}

#[test]
fn download_retries_with_backoff_then_verifies() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(
        TransportStrategy::Rsync,
        vec![
            Attempt::Fail("rsync error: timeout in data send/receive (code 30)"),
            Attempt::Fail("rsync error: error in rsync protocol data stream (code 12)"),
            Attempt::Succeed,
        ],
    )
    .with_file("result.json", b"{\"text\":\"hello\"}")
    .with_file("nested/segments.srt", b"1\n00:00:00,000 --> 00:00:01,000\nhi\n")
    .with_file("_manifest.txt", b"16\tresult.json\n35\tnested/segments.srt\n");
    let sleeper = RecordingSleeper::default();
    let engine = TransferEngine::new(&shell, &transport, policy()).with_sleeper(&sleeper);

    let report = engine
        .download(
            "/opt/ferry/app/output",
            temp.path(),
            &instance(),
            Utc::now(),
            None,
            true,
        )
        .unwrap();

    let lines: Vec<String> = report.events.iter().map(|e| e.to_string()).collect();
    assert_eq!(
        lines,
        vec!["retry 1 in 3s", "retry 2 in 6s", "attempt 3 succeeded"]
    );
    assert_eq!(
        *sleeper.delays.borrow(),
        vec![Duration::from_secs(3), Duration::from_secs(6)]
    );
    assert_eq!(report.job.attempt_count, 3);
    assert_eq!(report.outcome, TransferOutcome::Complete);
    let verification = report.verification.unwrap();
    assert_eq!(verification.expected, 2);
    assert!(verification.is_complete());
    assert!(shell.ran("-printf"), "manifest is generated before the transfer");
}

#[test]
fn exhausted_attempts_are_terminal() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(
        TransportStrategy::Rsync,
        vec![
            Attempt::Fail("No space left on device"),
            Attempt::Fail("No space left on device"),
            Attempt::Fail("No space left on device"),
            Attempt::Succeed,
        ],
    );
    let sleeper = RecordingSleeper::default();
    let engine = TransferEngine::new(&shell, &transport, policy()).with_sleeper(&sleeper);

    let err = engine
        .download("/out", temp.path(), &instance(), Utc::now(), None, false)
        .unwrap_err();

    match find_ferry_error(&err) {
        Some(FerryError::TransferExhausted {
            direction,
            attempts,
            detail,
        }) => {
            assert_eq!(*direction, Direction::Download);
            assert_eq!(*attempts, 3);
            assert!(detail.contains("No space left"));
        }
        other => panic!("expected exhausted transfer, got {other:?}"),
    }
    assert_eq!(*transport.calls.borrow(), 3);
    assert_eq!(sleeper.delays.borrow().len(), 2);
    assert!(find_ferry_error(&err).unwrap().hint().unwrap().contains("disk"));
}

#[test]
fn connectivity_failures_are_not_retried() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Scp, vec![Attempt::Unreachable]);
    let sleeper = RecordingSleeper::default();
    let engine = TransferEngine::new(&shell, &transport, policy()).with_sleeper(&sleeper);

    let err = engine
        .download("/out", temp.path(), &instance(), Utc::now(), None, false)
        .unwrap_err();

    assert!(matches!(
        find_ferry_error(&err),
        Some(FerryError::Connectivity { .. })
    ));
    assert_eq!(*transport.calls.borrow(), 1);
    assert!(sleeper.delays.borrow().is_empty());
}

#[test]
fn size_mismatch_marks_download_incomplete() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Rsync, vec![Attempt::Succeed])
        .with_file("a.json", b"truncated")
        .with_file("_manifest.txt", b"4096\ta.json\n10\tb.json\n");
    let engine = TransferEngine::new(&shell, &transport, policy());

    let report = engine
        .download("/out", temp.path(), &instance(), Utc::now(), None, true)
        .unwrap();

    assert_eq!(report.outcome, TransferOutcome::Incomplete);
    assert!(!report.is_complete());
    let verification = report.verification.unwrap();
    assert_eq!(verification.missing, vec!["b.json"]);
    assert_eq!(verification.size_mismatch.len(), 1);
    assert_eq!(verification.size_mismatch[0].expected, 4096);
    assert_eq!(verification.size_mismatch[0].actual, 9);
}

#[test]
fn missing_manifest_file_is_incomplete() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Rsync, vec![Attempt::Succeed])
        .with_file("a.json", b"{}");
    let engine = TransferEngine::new(&shell, &transport, policy());

    let report = engine
        .download("/out", temp.path(), &instance(), Utc::now(), None, true)
        .unwrap();

    assert_eq!(report.outcome, TransferOutcome::Incomplete);
    assert_eq!(report.verification.unwrap().missing, vec!["_manifest.txt"]);
}

#[test]
fn fallback_transport_prunes_to_glob_locally() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Scp, vec![Attempt::Succeed])
        .with_file("a.json", b"{}")
        .with_file("deep/b.json", b"[]")
        .with_file("notes.txt", b"skip me")
        .with_file("logs/debug.log", b"skip me too")
        .with_file("_manifest.txt", b"2\ta.json\n2\tdeep/b.json\n7\tnotes.txt\n11\tlogs/debug.log\n");
    let engine = TransferEngine::new(&shell, &transport, policy());

    let report = engine
        .download("/out", temp.path(), &instance(), Utc::now(), Some("*.json"), true)
        .unwrap();

    let dest = report.job.local_path.clone();
    assert_eq!(report.pruned, 2);
    assert!(dest.join("a.json").is_file());
    assert!(dest.join("deep/b.json").is_file());
    assert!(dest.join("_manifest.txt").is_file());
    assert!(!dest.join("notes.txt").exists());
    assert!(!dest.join("logs").exists());
    assert_eq!(report.verification.as_ref().unwrap().expected, 2);
    assert!(report.is_complete());
    assert_eq!(transport.filters.borrow()[0].as_ref().unwrap().glob, "*.json");
}

#[test]
fn same_second_downloads_get_distinct_directories() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Rsync, Vec::new());
    let engine = TransferEngine::new(&shell, &transport, policy());
    let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

    let first = engine
        .download("/out", temp.path(), &instance(), now, None, false)
        .unwrap();
    let second = engine
        .download("/out", temp.path(), &instance(), now, None, false)
        .unwrap();

    assert_eq!(first.job.local_path, temp.path().join("asr-gpu/20250304-050607"));
    assert_eq!(second.job.local_path, temp.path().join("asr-gpu/20250304-050607-1"));
}

#[test]
fn unlabeled_instance_uses_id_directory() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Rsync, Vec::new());
    let engine = TransferEngine::new(&shell, &transport, policy());
    let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

    let report = engine
        .download("/out", temp.path(), &InstanceRef::new("cb676a46", "", "10.0.0.1"), now, None, false)
        .unwrap();

    assert_eq!(report.job.local_path, temp.path().join("cb676a46/20250304-050607"));
}

#[test]
fn upload_of_missing_directory_is_skipped() {
    let temp = TempDir::new().unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Rsync, Vec::new());
    let engine = TransferEngine::new(&shell, &transport, policy());

    let report = engine
        .upload(&temp.path().join("materials"), "/opt/ferry/app/audio", false)
        .unwrap();

    assert!(matches!(report.outcome, TransferOutcome::Skipped { .. }));
    assert_eq!(*transport.calls.borrow(), 0);
    assert!(shell.scripts().is_empty());
}

#[test]
fn upload_requiring_content_fails_on_empty_directory() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("materials")).unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(TransportStrategy::Rsync, Vec::new());
    let engine = TransferEngine::new(&shell, &transport, policy());

    let err = engine
        .upload(&temp.path().join("materials"), "/opt/ferry/app/audio", true)
        .unwrap_err();

    assert!(matches!(
        find_ferry_error(&err),
        Some(FerryError::MissingContent { .. })
    ));
}

#[test]
fn upload_creates_remote_directory_and_retries() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("clip.wav"), b"RIFF").unwrap();
    let shell = ScriptedShell::new();
    let transport = ScriptedTransport::new(
        TransportStrategy::Scp,
        vec![Attempt::Fail("lost connection"), Attempt::Succeed],
    );
    let sleeper = RecordingSleeper::default();
    let engine = TransferEngine::new(&shell, &transport, policy()).with_sleeper(&sleeper);

    let report = engine
        .upload(temp.path(), "/opt/ferry/app/audio", false)
        .unwrap();

    assert_eq!(report.outcome, TransferOutcome::Complete);
    assert_eq!(report.job.attempt_count, 2);
    assert_eq!(report.events[0].to_string(), "retry 1 in 3s");
    assert!(shell.ran("mkdir -p /opt/ferry/app/audio"));
}

#[test]
fn end_to_end_with_real_manifest_generation() {
    let remote = TempDir::new().unwrap();
    let local = TempDir::new().unwrap();
    fs::create_dir_all(remote.path().join("batch 1")).unwrap();
    fs::write(remote.path().join("batch 1/clip one.json"), "{\"ok\":true}").unwrap();
    fs::write(remote.path().join("summary.csv"), "a,b\n1,2\n").unwrap();
    fs::write(remote.path().join(".done"), "").unwrap();

    let shell = LocalShell;
    let transport = LocalCopyTransport;
    let engine = TransferEngine::new(&shell, &transport, policy());

    let report = engine
        .download(
            remote.path().to_str().unwrap(),
            local.path(),
            &instance(),
            Utc::now(),
            None,
            true,
        )
        .unwrap();

    let verification = report.verification.as_ref().unwrap();
    assert_eq!(verification.expected, 3);
    assert!(report.is_complete(), "{verification:?}");
    let manifest = fs::read_to_string(report.job.local_path.join("_manifest.txt")).unwrap();
    assert!(manifest.contains("11\tbatch 1/clip one.json"));
    assert!(!manifest.contains("_manifest.txt"));
}
