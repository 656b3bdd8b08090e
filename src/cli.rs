use crate::{
    batch::{self, QueueItem},
    config::Config,
    engine::{ConversionEngine, ConversionOptions},
    envs::EnvironmentResolver,
    orchestrator::{self, Orchestrator, expand_requests},
    process::CancelFlag,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "markbridge")]
#[command(about = "Document-to-Markdown conversion orchestrator (per-engine venvs + batch scheduling)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./markbridge.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(clap::Args, Debug, Default)]
pub struct ConvertFlags {
    /// Disable OCR for engines that support it.
    #[arg(long)]
    pub no_ocr: bool,
    /// Force OCR on every page, even ones with a text layer.
    #[arg(long)]
    pub force_ocr: bool,
    /// Image export mode: none, embedded or referenced.
    #[arg(long)]
    pub image_mode: Option<String>,
    /// OCR sub-engine for the docling engines (repeatable): rapidocr, ppocr-v5.
    /// Selecting several fans out into one conversion per backend.
    #[arg(long = "ocr-backend")]
    pub ocr_backends: Vec<String>,
    /// Overwrite policy for existing outputs: overwrite, skip or rename.
    #[arg(long)]
    pub overwrite: Option<String>,
    /// Document language hint for the OCR engines.
    #[arg(long)]
    pub language: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check per-engine environments, the legacy venv and wrapper scripts.
    Doctor {},
    /// Convert a single file with one or more engines.
    Convert {
        #[arg(long)]
        input: PathBuf,
        /// Engine (repeatable): markitdown, docling-cpu, docling-gpu,
        /// paddle-cpu, paddle-gpu, marker-cpu, marker-gpu.
        #[arg(long = "engine", required = true)]
        engines: Vec<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[command(flatten)]
        flags: ConvertFlags,
    },
    /// Convert many files concurrently under a worker limit.
    Batch {
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long = "engine", required = true)]
        engines: Vec<String>,
        /// Concurrent conversions; defaults to [global].jobs from config.
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[command(flatten)]
        flags: ConvertFlags,
    },
    /// Report the pre-split shared venv; delete it only with --delete.
    CleanupLegacy {
        #[arg(long)]
        delete: bool,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;
    let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Convert {
            input,
            engines,
            out_dir,
            flags,
        } => convert(&cfg, input, engines, out_dir.as_deref(), flags),
        Command::Batch {
            inputs,
            engines,
            jobs,
            out_dir,
            flags,
        } => run_batch(&cfg, inputs, engines, *jobs, out_dir.as_deref(), flags),
        Command::CleanupLegacy { delete } => cleanup_legacy(&cfg, *delete),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("markbridge.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("markbridge.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(crate::util::expand_tilde(&cfg.paths.out_dir).join("markbridge.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let cancel = CancelFlag::new();
    let report = orchestrator::doctor(cfg, &cancel);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_engines(raw: &[String]) -> Result<Vec<ConversionEngine>> {
    let mut engines = Vec::new();
    for s in raw {
        let engine = ConversionEngine::from_str(s).map_err(|e| anyhow!(e))?;
        if !engines.contains(&engine) {
            engines.push(engine);
        }
    }
    Ok(engines)
}

/// Config defaults overridden by command-line flags.
fn build_options(cfg: &Config, flags: &ConvertFlags) -> Result<ConversionOptions> {
    let mut options = ConversionOptions {
        ocr_enabled: cfg.conversion.ocr,
        force_full_page_ocr: cfg.conversion.force_full_page_ocr,
        image_mode: cfg
            .conversion
            .image_mode
            .parse()
            .map_err(|e: String| anyhow!(e))?,
        ocr_backends: cfg
            .conversion
            .ocr_backends
            .iter()
            .map(|s| s.parse().map_err(|e: String| anyhow!(e)))
            .collect::<Result<_>>()?,
        overwrite: cfg
            .conversion
            .overwrite
            .parse()
            .map_err(|e: String| anyhow!(e))?,
        language: cfg.conversion.language.clone(),
    };

    if flags.no_ocr {
        options.ocr_enabled = false;
    }
    if flags.force_ocr {
        options.force_full_page_ocr = true;
    }
    if let Some(mode) = &flags.image_mode {
        options.image_mode = mode.parse().map_err(|e: String| anyhow!(e))?;
    }
    if !flags.ocr_backends.is_empty() {
        options.ocr_backends = flags
            .ocr_backends
            .iter()
            .map(|s| s.parse().map_err(|e: String| anyhow!(e)))
            .collect::<Result<_>>()?;
    }
    if let Some(policy) = &flags.overwrite {
        options.overwrite = policy.parse().map_err(|e: String| anyhow!(e))?;
    }
    if let Some(lang) = &flags.language {
        options.language = lang.clone();
    }
    Ok(options)
}

/// Route SIGINT/SIGTERM into the cancel flag. The engine processes run in
/// their own process groups, so a terminal interrupt never reaches them
/// directly; without this, Ctrl-C would kill only us and orphan every
/// running conversion tree. Cancelling instead lets the poll loops kill
/// their trees and the batch wind down.
pub fn install_cancel_handler(cancel: &CancelFlag) {
    let cancel = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        warn!("interrupt received; cancelling in-flight conversions");
        cancel.cancel();
    }) {
        warn!("could not install interrupt handler: {err}");
    }
}

fn resolve_out_dir(cfg: &Config, out_override: Option<&Path>) -> PathBuf {
    out_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| crate::util::expand_tilde(&cfg.paths.out_dir))
}

fn convert(
    cfg: &Config,
    input: &Path,
    engines: &[String],
    out_override: Option<&Path>,
    flags: &ConvertFlags,
) -> Result<()> {
    let engines = parse_engines(engines)?;
    let options = build_options(cfg, flags)?;
    let out_dir = resolve_out_dir(cfg, out_override);
    maybe_dump_config(cfg, &out_dir)?;

    let orchestrator = Orchestrator::new(cfg)?;
    let cancel = CancelFlag::new();
    install_cancel_handler(&cancel);
    let requests = expand_requests(input, &engines, &options, &out_dir);

    let mut failures = 0usize;
    for req in &requests {
        let result = orchestrator.convert_one(req, &cancel);
        let record = serde_json::json!({
            "input": req.input,
            "engine": req.describe(),
            "ok": result.succeeded(),
            "output": result.output,
            "error": result.error.as_ref().map(|e| format!("{e:#}")),
            "error_kind": result.error.as_ref().map(|e| e.kind()),
            "elapsed_seconds": result.elapsed.as_secs_f64(),
        });
        println!("{}", serde_json::to_string_pretty(&record)?);
        if !result.succeeded() {
            failures += 1;
        }
    }

    if failures > 0 {
        return Err(anyhow!(
            "{failures} of {} conversions failed",
            requests.len()
        ));
    }
    Ok(())
}

fn run_batch(
    cfg: &Config,
    inputs: &[PathBuf],
    engines: &[String],
    jobs: Option<usize>,
    out_override: Option<&Path>,
    flags: &ConvertFlags,
) -> Result<()> {
    let engines = parse_engines(engines)?;
    let options = build_options(cfg, flags)?;
    let out_dir = resolve_out_dir(cfg, out_override);
    maybe_dump_config(cfg, &out_dir)?;
    let jobs = jobs.unwrap_or(cfg.global.jobs).max(1);

    let orchestrator = Orchestrator::new(cfg)?;
    let cancel = CancelFlag::new();
    install_cancel_handler(&cancel);

    let mut items: Vec<QueueItem> = Vec::new();
    for input in inputs {
        for req in expand_requests(input, &engines, &options, &out_dir) {
            items.push(QueueItem::new(items.len(), req));
        }
    }
    if items.is_empty() {
        warn!("nothing to do");
        return Ok(());
    }

    info!("batch start: {} items, {} workers", items.len(), jobs);
    let started = crate::util::now_rfc3339();

    let on_change = |item: &QueueItem| {
        let elapsed = item
            .elapsed()
            .map(|d| format!(" ({:.1}s)", d.as_secs_f64()))
            .unwrap_or_default();
        println!(
            "[{}] {:?} {} {}{}",
            item.id,
            item.status,
            item.request.describe(),
            item.request.input.display(),
            elapsed
        );
    };

    let summary = batch::run_batch(&orchestrator, &mut items, jobs, &cancel, &on_change);

    if cfg.global.print_summary {
        let failed: Vec<_> = items
            .iter()
            .filter(|i| i.status.is_terminal() && i.status != batch::ItemStatus::Completed)
            .map(|i| {
                serde_json::json!({
                    "id": i.id,
                    "input": i.request.input,
                    "engine": i.request.describe(),
                    "status": i.status,
                    "error_kind": i.error_kind,
                    "error": i.error,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "started": started,
                "finished": crate::util::now_rfc3339(),
                "summary": summary,
                "failed_items": failed,
            }))?
        );
    }

    if !summary.all_succeeded() {
        return Err(anyhow!(
            "{} of {} items did not complete",
            summary.total - summary.completed,
            summary.total
        ));
    }
    Ok(())
}

fn cleanup_legacy(cfg: &Config, delete: bool) -> Result<()> {
    let resolver = EnvironmentResolver::new(cfg);
    match resolver.legacy_env() {
        None => {
            println!("{}", serde_json::json!({ "legacy_env": null }));
            Ok(())
        }
        Some(path) => {
            if delete {
                info!("removing legacy environment: {}", path.display());
                std::fs::remove_dir_all(&path)
                    .with_context(|| format!("removing {}", path.display()))?;
                println!(
                    "{}",
                    serde_json::json!({ "legacy_env": path, "deleted": true })
                );
            } else {
                println!(
                    "{}",
                    serde_json::json!({
                        "legacy_env": path,
                        "deleted": false,
                        "hint": "re-run with --delete to remove it",
                    })
                );
            }
            Ok(())
        }
    }
}

fn maybe_dump_config(cfg: &Config, out_dir: &Path) -> Result<()> {
    if cfg.debug.dump_effective_config {
        ensure_dir(out_dir)?;
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(out_dir.join("effective-config.toml"), raw)?;
    }
    Ok(())
}
