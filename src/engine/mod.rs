//! Engine model: which external tool runs, with which options, and what it
//! names its output.
//!
//! Dispatch is one adapter implementation per engine rather than parallel
//! match arms scattered across naming, venv selection and command building;
//! adding an engine means adding one adapter.

pub mod adapters;

use crate::envs::EngineFamily;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use adapters::{EngineAdapter, adapter_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionEngine {
    MarkItDown,
    DoclingCpu,
    DoclingGpu,
    PaddleOcrCpu,
    PaddleOcrGpu,
    MarkerCpu,
    MarkerGpu,
}

impl ConversionEngine {
    pub const ALL: [ConversionEngine; 7] = [
        ConversionEngine::MarkItDown,
        ConversionEngine::DoclingCpu,
        ConversionEngine::DoclingGpu,
        ConversionEngine::PaddleOcrCpu,
        ConversionEngine::PaddleOcrGpu,
        ConversionEngine::MarkerCpu,
        ConversionEngine::MarkerGpu,
    ];

    pub fn family(self) -> EngineFamily {
        match self {
            ConversionEngine::MarkItDown => EngineFamily::Standard,
            ConversionEngine::DoclingCpu | ConversionEngine::DoclingGpu => EngineFamily::Structured,
            ConversionEngine::PaddleOcrCpu | ConversionEngine::PaddleOcrGpu => {
                EngineFamily::OcrFocused
            }
            ConversionEngine::MarkerCpu | ConversionEngine::MarkerGpu => EngineFamily::HighFidelity,
        }
    }

    pub fn uses_gpu(self) -> bool {
        matches!(
            self,
            ConversionEngine::DoclingGpu
                | ConversionEngine::PaddleOcrGpu
                | ConversionEngine::MarkerGpu
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ConversionEngine::MarkItDown => "markitdown",
            ConversionEngine::DoclingCpu => "docling-cpu",
            ConversionEngine::DoclingGpu => "docling-gpu",
            ConversionEngine::PaddleOcrCpu => "paddle-cpu",
            ConversionEngine::PaddleOcrGpu => "paddle-gpu",
            ConversionEngine::MarkerCpu => "marker-cpu",
            ConversionEngine::MarkerGpu => "marker-gpu",
        }
    }
}

impl FromStr for ConversionEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversionEngine::ALL
            .into_iter()
            .find(|e| e.label() == s)
            .ok_or_else(|| format!("unknown engine: {s} (expected one of markitdown, docling-cpu, docling-gpu, paddle-cpu, paddle-gpu, marker-cpu, marker-gpu)"))
    }
}

/// OCR sub-engine, selectable within the Docling family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcrBackend {
    RapidOcr,
    PpOcrV5,
}

impl OcrBackend {
    pub fn label(self) -> &'static str {
        match self {
            OcrBackend::RapidOcr => "rapidocr",
            OcrBackend::PpOcrV5 => "ppocr-v5",
        }
    }
}

impl FromStr for OcrBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rapidocr" => Ok(OcrBackend::RapidOcr),
            "ppocr-v5" => Ok(OcrBackend::PpOcrV5),
            other => Err(format!(
                "unknown OCR backend: {other} (expected rapidocr or ppocr-v5)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageExportMode {
    None,
    Embedded,
    Referenced,
}

impl FromStr for ImageExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ImageExportMode::None),
            "embedded" => Ok(ImageExportMode::Embedded),
            "referenced" => Ok(ImageExportMode::Referenced),
            other => Err(format!(
                "unknown image mode: {other} (expected none, embedded or referenced)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    Overwrite,
    Skip,
    Rename,
}

impl FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(OverwritePolicy::Overwrite),
            "skip" => Ok(OverwritePolicy::Skip),
            "rename" => Ok(OverwritePolicy::Rename),
            other => Err(format!(
                "unknown overwrite policy: {other} (expected overwrite, skip or rename)"
            )),
        }
    }
}

/// Configuration value object for one conversion. Passed by value into each
/// call, never mutated mid-flight.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub ocr_enabled: bool,
    pub force_full_page_ocr: bool,
    pub image_mode: ImageExportMode,
    /// Zero or more OCR sub-engines. Empty while `ocr_enabled` fails closed
    /// to OCR-disabled at the orchestration boundary.
    pub ocr_backends: Vec<OcrBackend>,
    pub overwrite: OverwritePolicy,
    pub language: String,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            force_full_page_ocr: false,
            image_mode: ImageExportMode::None,
            ocr_backends: vec![OcrBackend::RapidOcr],
            overwrite: OverwritePolicy::Overwrite,
            language: "en".into(),
        }
    }
}

/// Output filename suffix for (engine, OCR backend). Total over every
/// combination; a set engine never maps to an empty suffix. Appended before
/// the `.md` extension so concurrent engines writing next to each other
/// never collide.
pub fn output_suffix(engine: ConversionEngine, backend: Option<OcrBackend>) -> &'static str {
    match (engine, backend) {
        (ConversionEngine::MarkItDown, _) => "_markitdown",
        (ConversionEngine::DoclingCpu, Some(OcrBackend::PpOcrV5)) => "_docling_v5_cpu",
        (ConversionEngine::DoclingGpu, Some(OcrBackend::PpOcrV5)) => "_docling_v5_gpu",
        (ConversionEngine::DoclingCpu, _) => "_docling_cpu",
        (ConversionEngine::DoclingGpu, _) => "_docling_gpu",
        (ConversionEngine::PaddleOcrCpu, _) => "_paddle_cpu",
        (ConversionEngine::PaddleOcrGpu, _) => "_paddle_gpu",
        (ConversionEngine::MarkerCpu, _) => "_marker_cpu",
        (ConversionEngine::MarkerGpu, _) => "_marker_gpu",
    }
}
