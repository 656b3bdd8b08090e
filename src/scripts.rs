//! Wrapper-script resolution.
//!
//! All engine invocations go through Python wrapper scripts shipped in one
//! configured directory. `ScriptStore` is the single place that maps a
//! script name to a path; every required script is checked at construction
//! so a broken deployment fails before any queue item starts.

use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

pub const MARKITDOWN_SCRIPT: &str = "markitdown_wrapper.py";
pub const DOCLING_SCRIPT: &str = "docling_convert.py";
pub const DOCLING_V5_SCRIPT: &str = "docling_v5_convert.py";
pub const PADDLE_SCRIPT: &str = "paddle_convert.py";
pub const MARKER_SCRIPT: &str = "marker_convert.py";

const REQUIRED_SCRIPTS: [&str; 5] = [
    MARKITDOWN_SCRIPT,
    DOCLING_SCRIPT,
    DOCLING_V5_SCRIPT,
    PADDLE_SCRIPT,
    MARKER_SCRIPT,
];

/// Required scripts that are absent from `dir`, for diagnostics.
pub fn missing_scripts(dir: &Path) -> Vec<String> {
    REQUIRED_SCRIPTS
        .iter()
        .filter(|s| !dir.join(s).exists())
        .map(|s| s.to_string())
        .collect()
}

pub struct ScriptStore {
    dir: PathBuf,
}

impl ScriptStore {
    pub fn new(cfg: &Config) -> Result<Self> {
        let dir = crate::util::expand_tilde(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        for script in REQUIRED_SCRIPTS {
            let path = dir.join(script);
            if !path.exists() {
                return Err(anyhow!("missing script: {}", path.display()));
            }
        }
        Ok(Self { dir })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
