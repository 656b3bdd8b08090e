//! External process execution.
//!
//! The one correctness property everything else leans on: stdout and stderr
//! are drained incrementally on dedicated reader threads *before* anything
//! waits on process exit. A verbose engine that fills an OS pipe buffer
//! while the parent blocks in `wait` deadlocks both sides; the reader
//! threads make that impossible, and the main loop only ever polls
//! `try_wait`.
//!
//! Python children are forced into unbuffered UTF-8 output. Without
//! `PYTHONUNBUFFERED` progress lines arrive in one burst at exit; without
//! the encoding overrides a single non-ASCII character in engine output
//! crashes the child with an encoding error the caller never sees.

use crate::error::ConvertError;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cooperative cancellation shared between the caller, the batch workers
/// and every in-flight process poll loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment overrides, applied after the forced Python ones.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Process exited on its own. `None` means killed by a signal.
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct RunOutput {
    pub outcome: RunOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// stdout and stderr interleaved per stream, for diagnostics.
    pub fn combined(&self) -> String {
        let mut s = String::new();
        if !self.stdout.is_empty() {
            s.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }
        s
    }
}

/// One line of streamed process output.
#[derive(Debug, Clone)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run an external program to completion, streaming output lines to
/// `on_line` as they arrive.
///
/// Returns `Err` only when the process could not be started at all; a tool
/// that ran and failed is a normal `RunOutput` with its exit code.
pub fn run(
    spec: &RunSpec,
    cancel: &CancelFlag,
    on_line: &mut dyn FnMut(&OutputLine),
) -> Result<RunOutput, ConvertError> {
    debug!(
        "exec {} {:?} timeout={:?}",
        spec.program.display(),
        spec.args,
        spec.timeout
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    cmd.env("PYTHONUNBUFFERED", "1");
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    // Own process group so a timeout/cancel kill reaches every descendant,
    // not just the immediate child.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|source| ConvertError::ProcessLaunch {
        program: spec.program.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::channel::<OutputLine>();
    spawn_reader(child.stdout.take(), tx.clone(), OutputLine::Stdout);
    spawn_reader(child.stderr.take(), tx, OutputLine::Stderr);

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut streams_open = true;
    let start = Instant::now();

    loop {
        if streams_open {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    append(&mut stdout, &mut stderr, &line);
                    on_line(&line);
                    // Drain whatever else is already queued before the next
                    // wait/timeout check.
                    while let Ok(line) = rx.try_recv() {
                        append(&mut stdout, &mut stderr, &line);
                        on_line(&line);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => streams_open = false,
            }
        } else {
            std::thread::sleep(POLL_INTERVAL);
        }

        if let Ok(Some(status)) = child.try_wait() {
            drain_remaining(&rx, &mut stdout, &mut stderr, on_line);
            return Ok(RunOutput {
                outcome: RunOutcome::Exited(status.code()),
                stdout,
                stderr,
            });
        }

        if cancel.is_cancelled() {
            debug!("cancelling process {}", child.id());
            kill_tree(&mut child);
            let _ = child.wait();
            drain_remaining(&rx, &mut stdout, &mut stderr, on_line);
            return Ok(RunOutput {
                outcome: RunOutcome::Cancelled,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > spec.timeout {
            warn!(
                "process {} exceeded timeout {:?}; killing tree",
                spec.program.display(),
                spec.timeout
            );
            kill_tree(&mut child);
            let _ = child.wait();
            drain_remaining(&rx, &mut stdout, &mut stderr, on_line);
            return Ok(RunOutput {
                outcome: RunOutcome::TimedOut,
                stdout,
                stderr,
            });
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Option<R>,
    tx: Sender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) {
    std::thread::spawn(move || {
        if let Some(stream) = stream {
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                match line {
                    // Receiver gone means the run loop already returned.
                    Ok(line) => {
                        if tx.send(wrap(line)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    });
}

fn append(stdout: &mut String, stderr: &mut String, line: &OutputLine) {
    match line {
        OutputLine::Stdout(l) => {
            stdout.push_str(l);
            stdout.push('\n');
        }
        OutputLine::Stderr(l) => {
            stderr.push_str(l);
            stderr.push('\n');
        }
    }
}

/// Collect whatever the reader threads still hold after process exit. The
/// loop is bounded: if a leaked grandchild keeps a pipe open we stop waiting
/// rather than hang.
fn drain_remaining(
    rx: &Receiver<OutputLine>,
    stdout: &mut String,
    stderr: &mut String,
    on_line: &mut dyn FnMut(&OutputLine),
) {
    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => {
                append(stdout, stderr, &line);
                on_line(&line);
            }
            Err(_) => break,
        }
    }
}

/// Kill the process and its entire descendant tree. External interpreters
/// routinely spawn helper children that would otherwise be orphaned and
/// keep running after a plain `kill`.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    let pgid = child.id() as i32;
    // The child was spawned with process_group(0), so its pgid is its pid.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(windows)]
fn kill_tree(child: &mut Child) {
    let _ = Command::new("taskkill")
        .args(["/PID", &child.id().to_string(), "/T", "/F"])
        .output();
    let _ = child.kill();
}
