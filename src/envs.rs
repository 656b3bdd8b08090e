//! Per-engine virtual environment resolution.
//!
//! Each engine family gets its own venv under one base directory. The
//! isolation is load-bearing: the engines pull mutually incompatible native
//! dependency versions (conflicting CUDA/onnxruntime builds), so they can
//! never share an environment. Validity is strictly "the interpreter binary
//! exists on disk" and is re-checked on every call — environments can be
//! created or deleted by a maintenance operation between conversions, so
//! nothing here is cached.

use crate::config::Config;
use crate::util::expand_tilde;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFamily {
    Standard,
    Structured,
    OcrFocused,
    HighFidelity,
}

impl EngineFamily {
    pub const ALL: [EngineFamily; 4] = [
        EngineFamily::Standard,
        EngineFamily::Structured,
        EngineFamily::OcrFocused,
        EngineFamily::HighFidelity,
    ];

    /// Venv directory name under the base path. Deterministic and
    /// non-overlapping across families.
    pub fn venv_dir_name(self) -> &'static str {
        match self {
            EngineFamily::Standard => ".venv_markitdown",
            EngineFamily::Structured => ".venv_docling",
            EngineFamily::OcrFocused => ".venv_paddle",
            EngineFamily::HighFidelity => ".venv_marker",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EngineFamily::Standard => "markitdown",
            EngineFamily::Structured => "docling",
            EngineFamily::OcrFocused => "paddle",
            EngineFamily::HighFidelity => "marker",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentDescriptor {
    pub family: EngineFamily,
    pub root: PathBuf,
    pub python: PathBuf,
    pub valid: bool,
}

/// The single shared venv used by old installations, before environments
/// were split per family.
const LEGACY_VENV_DIR: &str = ".venv";

pub struct EnvironmentResolver {
    base: PathBuf,
}

impl EnvironmentResolver {
    pub fn new(cfg: &Config) -> Self {
        Self {
            base: expand_tilde(&cfg.paths.envs_dir),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Never fails; an absent environment comes back with `valid: false`
    /// and the caller decides what to do about it.
    pub fn resolve(&self, family: EngineFamily) -> EnvironmentDescriptor {
        let root = self.base.join(family.venv_dir_name());
        let python = interpreter_path(&root);
        let valid = python.is_file();
        EnvironmentDescriptor {
            family,
            root,
            python,
            valid,
        }
    }

    /// Detect the pre-split shared environment. It is surfaced for explicit
    /// user-driven cleanup only, never merged into the per-family layout.
    pub fn legacy_env(&self) -> Option<PathBuf> {
        let root = self.base.join(LEGACY_VENV_DIR);
        root.is_dir().then_some(root)
    }
}

fn interpreter_path(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("Scripts").join("python.exe")
    } else {
        root.join("bin").join("python")
    }
}
