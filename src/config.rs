use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub conversion: Conversion,
    #[serde(default)]
    pub engines: Engines,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    /// Default number of concurrent conversions in a batch.
    pub jobs: usize,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            jobs: 2,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    /// Base directory holding one venv per engine family.
    pub envs_dir: String,
    /// Directory with the Python wrapper scripts.
    pub scripts_dir: String,
    /// Staging area for per-invocation temp working directories.
    pub work_dir: String,
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            envs_dir: "~/.markbridge/envs".into(),
            scripts_dir: "scripts".into(),
            work_dir: ".markbridge-work".into(),
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Per-family wall-clock ceilings. These fire even if the caller never
    /// cancels; a hung external tool must not stall a worker slot forever.
    pub markitdown_timeout_seconds: u64,
    pub docling_timeout_seconds: u64,
    pub paddle_timeout_seconds: u64,
    pub marker_timeout_seconds: u64,
    pub doctor_timeout_seconds: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            markitdown_timeout_seconds: 600,
            docling_timeout_seconds: 1800,
            paddle_timeout_seconds: 1800,
            marker_timeout_seconds: 1800,
            doctor_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub ocr: bool,
    pub force_full_page_ocr: bool,
    /// "none" | "embedded" | "referenced"
    pub image_mode: String,
    /// OCR sub-engines for the Docling family: "rapidocr" | "ppocr-v5".
    /// More than one selected fans out into one conversion per backend.
    pub ocr_backends: Vec<String>,
    /// "overwrite" | "skip" | "rename"
    pub overwrite: String,
    pub language: String,
}
impl Default for Conversion {
    fn default() -> Self {
        Self {
            ocr: true,
            force_full_page_ocr: false,
            image_mode: "none".into(),
            ocr_backends: vec!["rapidocr".into()],
            overwrite: "overwrite".into(),
            language: "en".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Engines {
    /// Extra environment variables passed to every engine process.
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    /// Log engine stdout/stderr lines at debug level as they stream in.
    pub trace_process_output: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            trace_process_output: true,
            dump_effective_config: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    /// Require the scripts dir to live under the current working directory.
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            pin_scripts_dir: false,
        }
    }
}
