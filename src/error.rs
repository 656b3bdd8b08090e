//! Failure taxonomy for one conversion attempt.
//!
//! Every variant is carried inside a `ConversionResult`; the orchestrator is
//! a total function from request to result and never lets a conversion
//! failure escape as a stray `Err` or panic. The split matters to callers:
//! `EnvironmentUnavailable` and `ProcessLaunch` are configuration problems
//! (no point re-queuing until the user fixes the environment), `Timeout`
//! means the tool hung rather than rejected the input, and `Cancelled`
//! carries no error severity at all.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// Input file missing. Checked before anything else; no environment
    /// lookup or process launch happens for a dead path.
    #[error("input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The selected engine does not handle this input format.
    #[error("{engine} does not support input: {path}")]
    UnsupportedInput { engine: &'static str, path: PathBuf },

    /// The engine's virtual environment is missing or has no interpreter.
    /// Terminal before any process is spawned.
    #[error("{family} environment is not available (expected interpreter at {python})")]
    EnvironmentUnavailable {
        family: &'static str,
        python: PathBuf,
    },

    /// The OS could not start the process at all (missing executable,
    /// permission denied). Distinct from "the tool ran and failed".
    #[error("failed to launch {program}: {source}")]
    ProcessLaunch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran, exited non-zero and left no output behind.
    #[error("conversion process failed (exit code {code:?}):\n{output_tail}")]
    ProcessExecution {
        code: Option<i32>,
        output_tail: String,
    },

    /// Hard wall-clock ceiling hit; the process tree was killed.
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Caller-initiated cancellation. Not a failure.
    #[error("conversion cancelled")]
    Cancelled,

    /// The process reported success but the expected artifact never
    /// appeared. Usually an adapter/convention mismatch, so the captured
    /// output is attached verbatim.
    #[error("process finished but expected output was never written: {expected}\n{output_tail}")]
    OutputMissing {
        expected: PathBuf,
        output_tail: String,
    },

    /// Destination already exists and the overwrite policy is `skip`.
    #[error("destination already exists (overwrite policy is skip): {path}")]
    DestinationExists { path: PathBuf },

    /// Moving the located artifact to its final destination failed.
    #[error("failed to place output at {path}: {source}")]
    Relocate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConvertError {
    /// Stable machine-readable kind, used in batch summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::InputNotFound { .. } => "input_not_found",
            ConvertError::UnsupportedInput { .. } => "unsupported_input",
            ConvertError::EnvironmentUnavailable { .. } => "environment_unavailable",
            ConvertError::ProcessLaunch { .. } => "process_launch_failure",
            ConvertError::ProcessExecution { .. } => "process_execution_failure",
            ConvertError::Timeout { .. } => "timeout",
            ConvertError::Cancelled => "cancelled",
            ConvertError::OutputMissing { .. } => "output_reconciliation_failure",
            ConvertError::DestinationExists { .. } => "destination_exists",
            ConvertError::Relocate { .. } => "relocate_failure",
        }
    }
}
