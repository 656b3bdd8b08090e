//! Conversion orchestration: one request in, one result out.
//!
//! `convert_one` is a total function — every failure mode comes back inside
//! the `ConversionResult`, never as a panic or a stray `Err`. The stages are
//! strict: input validation, then environment validation (no process is ever
//! launched against a known-invalid interpreter), then execution in a unique
//! per-invocation staging directory, then reconciliation. Output-file
//! existence, not the exit code, is the authoritative success signal: some
//! engines exit non-zero on recoverable warnings while producing valid
//! output, and others can exit 0 while silently writing nothing.

use crate::config::{Config, Limits};
use crate::engine::{
    ConversionEngine, ConversionOptions, OcrBackend, adapter_for, output_suffix,
};
use crate::envs::{EngineFamily, EnvironmentResolver};
use crate::error::ConvertError;
use crate::process::{self, CancelFlag, OutputLine, RunOutcome, RunSpec};
use crate::scripts::ScriptStore;
use crate::util::{ensure_dir, tail_lines};
use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One (file, engine, options) conversion request. OCR sub-engine fan-out
/// happens before this struct exists; a request carries at most one backend.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub engine: ConversionEngine,
    pub backend: Option<OcrBackend>,
    pub options: ConversionOptions,
    pub out_dir: PathBuf,
}

impl ConversionRequest {
    pub fn suffix(&self) -> &'static str {
        output_suffix(self.engine, self.backend)
    }

    /// Final output filename: input stem + engine suffix + `.md`.
    pub fn output_name(&self) -> String {
        let stem = self
            .input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        format!("{stem}{}.md", self.suffix())
    }

    pub fn describe(&self) -> String {
        match self.backend {
            Some(b) => format!("{} [{}]", self.engine.label(), b.label()),
            None => self.engine.label().to_string(),
        }
    }
}

/// Immutable outcome of one conversion attempt.
#[derive(Debug)]
pub struct ConversionResult {
    pub input: PathBuf,
    pub engine: ConversionEngine,
    pub backend: Option<OcrBackend>,
    pub output: Option<PathBuf>,
    pub error: Option<ConvertError>,
    pub elapsed: Duration,
}

impl ConversionResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Expand (file, engine set, options) into independent requests.
///
/// Selecting several OCR sub-engines for a Docling-family engine fans out
/// into one request per backend, each with its own output suffix — never a
/// silent default pick. OCR enabled with zero backends fails closed to
/// OCR-disabled.
pub fn expand_requests(
    input: &Path,
    engines: &[ConversionEngine],
    options: &ConversionOptions,
    out_dir: &Path,
) -> Vec<ConversionRequest> {
    let mut requests = Vec::new();
    for &engine in engines {
        let fan_out = engine.family() == EngineFamily::Structured && options.ocr_enabled;
        if fan_out && !options.ocr_backends.is_empty() {
            let mut seen = Vec::new();
            for &backend in &options.ocr_backends {
                if seen.contains(&backend) {
                    continue;
                }
                seen.push(backend);
                requests.push(ConversionRequest {
                    input: input.to_path_buf(),
                    engine,
                    backend: Some(backend),
                    options: options.clone(),
                    out_dir: out_dir.to_path_buf(),
                });
            }
        } else {
            let mut options = options.clone();
            if fan_out {
                warn!(
                    "OCR enabled but no OCR backend selected for {}; running with OCR disabled",
                    engine.label()
                );
                options.ocr_enabled = false;
            }
            requests.push(ConversionRequest {
                input: input.to_path_buf(),
                engine,
                backend: None,
                options,
                out_dir: out_dir.to_path_buf(),
            });
        }
    }
    requests
}

#[derive(Debug, Serialize)]
pub struct EnvDiag {
    pub family: &'static str,
    pub root: PathBuf,
    pub python: PathBuf,
    pub valid: bool,
    pub python_version: Option<String>,
}

pub struct Orchestrator {
    resolver: EnvironmentResolver,
    scripts: ScriptStore,
    limits: Limits,
    engine_env: Vec<(String, String)>,
    work_dir: PathBuf,
    trace_output: bool,
}

impl Orchestrator {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            resolver: EnvironmentResolver::new(cfg),
            scripts: ScriptStore::new(cfg)?,
            limits: cfg.limits.clone(),
            engine_env: cfg
                .engines
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            work_dir: crate::util::expand_tilde(&cfg.paths.work_dir),
            trace_output: cfg.debug.trace_process_output,
        })
    }

    pub fn resolver(&self) -> &EnvironmentResolver {
        &self.resolver
    }

    /// Run one conversion to completion. Never panics on tool failure;
    /// everything comes back inside the result.
    pub fn convert_one(&self, req: &ConversionRequest, cancel: &CancelFlag) -> ConversionResult {
        let started = Instant::now();
        let error = self.try_convert(req, cancel, started);
        let (output, error) = match error {
            Ok(path) => (Some(path), None),
            Err(e) => (None, Some(e)),
        };
        ConversionResult {
            input: req.input.clone(),
            engine: req.engine,
            backend: req.backend,
            output,
            error,
            elapsed: started.elapsed(),
        }
    }

    fn try_convert(
        &self,
        req: &ConversionRequest,
        cancel: &CancelFlag,
        started: Instant,
    ) -> Result<PathBuf, ConvertError> {
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        // Input first: a dead path must fail before any environment lookup.
        if !req.input.is_file() {
            return Err(ConvertError::InputNotFound {
                path: req.input.clone(),
            });
        }

        let adapter = adapter_for(req.engine);
        if !adapter.supports(&req.input) {
            return Err(ConvertError::UnsupportedInput {
                engine: req.engine.label(),
                path: req.input.clone(),
            });
        }

        let family = req.engine.family();
        let env = self.resolver.resolve(family);
        if !env.valid {
            return Err(ConvertError::EnvironmentUnavailable {
                family: family.label(),
                python: env.python,
            });
        }

        let options = normalized_options(req);

        ensure_dir(&req.out_dir).map_err(|e| ConvertError::Relocate {
            path: req.out_dir.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
        let dest = resolve_destination(&req.out_dir, &req.output_name(), &options)?;

        // Unique staging directory per invocation: concurrent engines over
        // the same input must never share scratch space. Cleaned up on drop,
        // on every exit path.
        ensure_dir(&self.work_dir).map_err(|e| ConvertError::Relocate {
            path: self.work_dir.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}_", family.label()))
            .tempdir_in(&self.work_dir)
            .map_err(|e| ConvertError::Relocate {
                path: self.work_dir.clone(),
                source: e,
            })?;
        let staged_output = staging.path().join(
            dest.file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "output.md".into()),
        );

        let script = self.scripts.path(adapter.script(req.backend));
        let mut args = vec![script.display().to_string()];
        args.extend(adapter.build_command(&req.input, &staged_output, &options, req.backend));

        let spec = RunSpec {
            program: env.python,
            args,
            env: self.engine_env.clone(),
            timeout: self.timeout_for(family),
        };

        info!(
            "converting {} with {} -> {}",
            req.input.display(),
            req.describe(),
            dest.display()
        );

        let trace = self.trace_output;
        let engine_label = req.engine.label();
        let mut on_line = move |line: &OutputLine| {
            if trace {
                match line {
                    OutputLine::Stdout(l) => debug!("[{engine_label}] {l}"),
                    OutputLine::Stderr(l) => debug!("[{engine_label}!] {l}"),
                }
            }
        };

        let run = process::run(&spec, cancel, &mut on_line)?;
        let tail = tail_lines(&run.combined(), 40);

        match run.outcome {
            RunOutcome::Cancelled => return Err(ConvertError::Cancelled),
            RunOutcome::TimedOut => {
                return Err(ConvertError::Timeout {
                    secs: spec.timeout.as_secs(),
                });
            }
            RunOutcome::Exited(code) => {
                let located = adapter.locate_output(staging.path(), &req.input, &staged_output);
                match located {
                    Some(located) => {
                        if code != Some(0) {
                            warn!(
                                "{} exited with {:?} but produced output; treating as success",
                                req.describe(),
                                code
                            );
                        }
                        adapter.relocate_artifacts(&located, &dest, &options)?;
                        info!(
                            "completed {} in {:.1}s -> {}",
                            req.describe(),
                            started.elapsed().as_secs_f64(),
                            dest.display()
                        );
                        Ok(dest)
                    }
                    None if code == Some(0) => Err(ConvertError::OutputMissing {
                        expected: staged_output,
                        output_tail: tail,
                    }),
                    None => Err(ConvertError::ProcessExecution {
                        code,
                        output_tail: tail,
                    }),
                }
            }
        }
    }

    fn timeout_for(&self, family: EngineFamily) -> Duration {
        let secs = match family {
            EngineFamily::Standard => self.limits.markitdown_timeout_seconds,
            EngineFamily::Structured => self.limits.docling_timeout_seconds,
            EngineFamily::OcrFocused => self.limits.paddle_timeout_seconds,
            EngineFamily::HighFidelity => self.limits.marker_timeout_seconds,
        };
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub envs_dir: PathBuf,
    pub envs: Vec<EnvDiag>,
    pub legacy_env: Option<PathBuf>,
    pub scripts_dir: PathBuf,
    pub missing_scripts: Vec<String>,
}

/// Environment diagnostics: per-family descriptor, interpreter version for
/// each valid environment, legacy-venv detection and script presence. Works
/// on a broken deployment; nothing here requires a valid setup.
pub fn doctor(cfg: &Config, cancel: &CancelFlag) -> DoctorReport {
    let resolver = EnvironmentResolver::new(cfg);
    let doctor_timeout = Duration::from_secs(cfg.limits.doctor_timeout_seconds.max(1));
    let envs = EngineFamily::ALL
        .iter()
        .map(|&family| {
            let env = resolver.resolve(family);
            let python_version = if env.valid {
                probe_python_version(&env.python, doctor_timeout, cancel)
            } else {
                None
            };
            EnvDiag {
                family: family.label(),
                root: env.root,
                python: env.python,
                valid: env.valid,
                python_version,
            }
        })
        .collect();

    let scripts_dir = crate::util::expand_tilde(&cfg.paths.scripts_dir);
    DoctorReport {
        envs_dir: resolver.base().to_path_buf(),
        envs,
        legacy_env: resolver.legacy_env(),
        scripts_dir: scripts_dir.clone(),
        missing_scripts: crate::scripts::missing_scripts(&scripts_dir),
    }
}

fn probe_python_version(python: &Path, timeout: Duration, cancel: &CancelFlag) -> Option<String> {
    let spec = RunSpec {
        program: python.to_path_buf(),
        args: vec![
            "-c".into(),
            "import sys; print(sys.version.split()[0])".into(),
        ],
        env: Vec::new(),
        timeout,
    };
    let mut on_line = |_: &OutputLine| {};
    match process::run(&spec, cancel, &mut on_line) {
        Ok(out) if out.outcome == RunOutcome::Exited(Some(0)) => {
            let v = out.stdout.trim();
            (!v.is_empty()).then(|| v.to_string())
        }
        _ => None,
    }
}

fn normalized_options(req: &ConversionRequest) -> ConversionOptions {
    let mut options = req.options.clone();
    // Fail closed: OCR enabled with no backend selected never picks an
    // undefined default path.
    if req.engine.family() == EngineFamily::Structured
        && options.ocr_enabled
        && req.backend.is_none()
        && options.ocr_backends.is_empty()
    {
        warn!(
            "OCR enabled without a backend for {}; disabling OCR for this run",
            req.engine.label()
        );
        options.ocr_enabled = false;
    }
    options
}

fn resolve_destination(
    out_dir: &Path,
    name: &str,
    options: &ConversionOptions,
) -> Result<PathBuf, ConvertError> {
    use crate::engine::OverwritePolicy;

    let dest = out_dir.join(name);
    if !dest.exists() {
        return Ok(dest);
    }
    match options.overwrite {
        OverwritePolicy::Overwrite => Ok(dest),
        OverwritePolicy::Skip => Err(ConvertError::DestinationExists { path: dest }),
        OverwritePolicy::Rename => {
            let stem = dest
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output")
                .to_string();
            for n in 1..10_000u32 {
                let candidate = out_dir.join(format!("{stem} ({n}).md"));
                if !candidate.exists() {
                    return Ok(candidate);
                }
            }
            Err(ConvertError::DestinationExists { path: dest })
        }
    }
}
