#![cfg(unix)]

use markbridge::error::ConvertError;
use markbridge::process::{CancelFlag, OutputLine, RunOutcome, RunSpec, run};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn sh(script: &str, timeout: Duration) -> RunSpec {
    RunSpec {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".into(), script.into()],
        env: Vec::new(),
        timeout,
    }
}

fn run_quiet(spec: &RunSpec, cancel: &CancelFlag) -> markbridge::process::RunOutput {
    let mut on_line = |_: &OutputLine| {};
    run(spec, cancel, &mut on_line).expect("launch")
}

#[test]
fn captures_both_streams_separately() {
    let spec = sh("echo out-line; echo err-line >&2", Duration::from_secs(10));
    let out = run_quiet(&spec, &CancelFlag::new());
    assert_eq!(out.outcome, RunOutcome::Exited(Some(0)));
    assert!(out.stdout.contains("out-line"));
    assert!(!out.stdout.contains("err-line"));
    assert!(out.stderr.contains("err-line"));
    assert!(out.combined().contains("out-line"));
    assert!(out.combined().contains("err-line"));
}

#[test]
fn nonzero_exit_is_an_outcome_not_an_error() {
    let spec = sh("exit 7", Duration::from_secs(10));
    let out = run_quiet(&spec, &CancelFlag::new());
    assert_eq!(out.outcome, RunOutcome::Exited(Some(7)));
}

#[test]
fn lines_are_streamed_to_the_callback() {
    let spec = sh("echo one; echo two; echo three", Duration::from_secs(10));
    let mut seen = Vec::new();
    let mut on_line = |line: &OutputLine| {
        if let OutputLine::Stdout(l) = line {
            seen.push(l.clone());
        }
    };
    let out = run(&spec, &CancelFlag::new(), &mut on_line).expect("launch");
    assert_eq!(out.outcome, RunOutcome::Exited(Some(0)));
    assert_eq!(seen, vec!["one", "two", "three"]);
}

#[test]
fn verbose_child_does_not_deadlock() {
    // Enough output to overflow an OS pipe buffer many times over.
    let spec = sh(
        "i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done",
        Duration::from_secs(60),
    );
    let out = run_quiet(&spec, &CancelFlag::new());
    assert_eq!(out.outcome, RunOutcome::Exited(Some(0)));
    assert!(out.stdout.contains("line-19999"));
}

#[test]
fn timeout_kills_the_process() {
    let spec = sh("sleep 30", Duration::from_millis(300));
    let start = Instant::now();
    let out = run_quiet(&spec, &CancelFlag::new());
    assert_eq!(out.outcome, RunOutcome::TimedOut);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancel_interrupts_a_running_process() {
    let cancel = CancelFlag::new();
    let canceller = cancel.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        canceller.cancel();
    });
    let spec = sh("sleep 30", Duration::from_secs(60));
    let start = Instant::now();
    let out = run_quiet(&spec, &cancel);
    handle.join().unwrap();
    assert_eq!(out.outcome, RunOutcome::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn python_children_are_forced_unbuffered_utf8() {
    let spec = sh(
        "echo $PYTHONUNBUFFERED $PYTHONIOENCODING $PYTHONUTF8",
        Duration::from_secs(10),
    );
    let out = run_quiet(&spec, &CancelFlag::new());
    assert_eq!(out.stdout.trim(), "1 utf-8 1");
}

#[test]
fn caller_env_overrides_are_applied_last() {
    let spec = RunSpec {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".into(), "echo $PYTHONUTF8 $MB_EXTRA".into()],
        env: vec![
            ("PYTHONUTF8".into(), "0".into()),
            ("MB_EXTRA".into(), "yes".into()),
        ],
        timeout: Duration::from_secs(10),
    };
    let out = run_quiet(&spec, &CancelFlag::new());
    assert_eq!(out.stdout.trim(), "0 yes");
}

#[test]
fn missing_program_is_a_launch_error() {
    let spec = RunSpec {
        program: PathBuf::from("/no/such/interpreter"),
        args: Vec::new(),
        env: Vec::new(),
        timeout: Duration::from_secs(10),
    };
    let mut on_line = |_: &OutputLine| {};
    let err = run(&spec, &CancelFlag::new(), &mut on_line).unwrap_err();
    assert!(matches!(err, ConvertError::ProcessLaunch { .. }));
    assert_eq!(err.kind(), "process_launch_failure");
}
