//! One adapter per engine: command construction and output conventions.
//!
//! The external tools disagree about everything that happens after the
//! process exits. MarkItDown, Docling and PaddleOCR write the primary
//! artifact exactly where they are told; Marker takes an output *directory*
//! and derives the filename from the input stem. Docling's referenced-image
//! mode drops sibling folders next to the markdown file; Marker writes an
//! `<stem>_images` folder. Each adapter encodes its tool's convention so the
//! orchestrator can stay generic.

use crate::engine::{ConversionEngine, ConversionOptions, ImageExportMode, OcrBackend};
use crate::error::ConvertError;
use crate::scripts::{DOCLING_SCRIPT, DOCLING_V5_SCRIPT, MARKER_SCRIPT, MARKITDOWN_SCRIPT, PADDLE_SCRIPT};
use regex::Regex;
use std::path::{Path, PathBuf};

pub trait EngineAdapter: Send + Sync {
    fn engine(&self) -> ConversionEngine;

    /// Wrapper script to run. The Docling family switches scripts per OCR
    /// sub-engine; everyone else ignores the backend.
    fn script(&self, backend: Option<OcrBackend>) -> &'static str;

    /// Whether this engine handles the input's format at all.
    fn supports(&self, input: &Path) -> bool;

    /// Argument list for the wrapper script. Pure and deterministic:
    /// identical inputs always produce the identical command line.
    fn build_command(
        &self,
        input: &Path,
        staged_output: &Path,
        opts: &ConversionOptions,
        backend: Option<OcrBackend>,
    ) -> Vec<String>;

    /// Where the tool actually left the primary artifact, if anywhere.
    fn locate_output(&self, work_dir: &Path, input: &Path, staged_output: &Path)
    -> Option<PathBuf>;

    /// Move the primary artifact (and companion image folders, when the
    /// image mode asks for external files) to the final destination,
    /// rewriting in-document image references to match. Overwrites a
    /// pre-existing destination cleanly.
    fn relocate_artifacts(
        &self,
        located: &Path,
        dest: &Path,
        opts: &ConversionOptions,
    ) -> Result<(), ConvertError>;
}

pub fn adapter_for(engine: ConversionEngine) -> Box<dyn EngineAdapter> {
    use crate::envs::EngineFamily;
    match engine.family() {
        EngineFamily::Standard => Box::new(StandardAdapter { engine }),
        EngineFamily::Structured => Box::new(StructuredAdapter { engine }),
        EngineFamily::OcrFocused => Box::new(OcrAdapter { engine }),
        EngineFamily::HighFidelity => Box::new(HighFidelityAdapter { engine }),
    }
}

fn ext_of(input: &Path) -> String {
    input
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn path_arg(p: &Path) -> String {
    p.display().to_string()
}

// ---------------------------------------------------------------------------
// MarkItDown
// ---------------------------------------------------------------------------

/// General-purpose converter; flat-file output at the requested path.
struct StandardAdapter {
    engine: ConversionEngine,
}

const MARKITDOWN_EXTS: &[&str] = &[
    "pdf", "docx", "pptx", "xlsx", "html", "htm", "csv", "json", "xml", "epub", "txt", "md", "jpg",
    "jpeg", "png",
];

impl EngineAdapter for StandardAdapter {
    fn engine(&self) -> ConversionEngine {
        self.engine
    }

    fn script(&self, _backend: Option<OcrBackend>) -> &'static str {
        MARKITDOWN_SCRIPT
    }

    fn supports(&self, input: &Path) -> bool {
        MARKITDOWN_EXTS.contains(&ext_of(input).as_str())
    }

    fn build_command(
        &self,
        input: &Path,
        staged_output: &Path,
        _opts: &ConversionOptions,
        _backend: Option<OcrBackend>,
    ) -> Vec<String> {
        vec![path_arg(input), "-o".into(), path_arg(staged_output)]
    }

    fn locate_output(
        &self,
        _work_dir: &Path,
        _input: &Path,
        staged_output: &Path,
    ) -> Option<PathBuf> {
        staged_output.exists().then(|| staged_output.to_path_buf())
    }

    fn relocate_artifacts(
        &self,
        located: &Path,
        dest: &Path,
        _opts: &ConversionOptions,
    ) -> Result<(), ConvertError> {
        move_file(located, dest)
    }
}

// ---------------------------------------------------------------------------
// Docling
// ---------------------------------------------------------------------------

/// Structured-layout converter. Writes the markdown at the requested path;
/// referenced-image mode adds two sibling folders named after the output
/// stem (`<stem>/` for table images, `<stem>_artifacts/` for page/picture
/// images).
struct StructuredAdapter {
    engine: ConversionEngine,
}

const DOCLING_EXTS: &[&str] = &[
    "pdf", "docx", "pptx", "html", "htm", "png", "jpg", "jpeg", "tiff", "bmp",
];

impl EngineAdapter for StructuredAdapter {
    fn engine(&self) -> ConversionEngine {
        self.engine
    }

    fn script(&self, backend: Option<OcrBackend>) -> &'static str {
        match backend {
            Some(OcrBackend::PpOcrV5) => DOCLING_V5_SCRIPT,
            _ => DOCLING_SCRIPT,
        }
    }

    fn supports(&self, input: &Path) -> bool {
        DOCLING_EXTS.contains(&ext_of(input).as_str())
    }

    fn build_command(
        &self,
        input: &Path,
        staged_output: &Path,
        opts: &ConversionOptions,
        _backend: Option<OcrBackend>,
    ) -> Vec<String> {
        let mut args = vec![path_arg(input), path_arg(staged_output)];
        args.push("--image-mode".into());
        args.push(
            match opts.image_mode {
                ImageExportMode::None => "placeholder",
                ImageExportMode::Embedded => "embedded",
                ImageExportMode::Referenced => "referenced",
            }
            .into(),
        );
        if !opts.ocr_enabled {
            args.push("--no-ocr".into());
        }
        if opts.force_full_page_ocr {
            args.push("--force-ocr".into());
        }
        if self.engine.uses_gpu() {
            args.push("--gpu".into());
        }
        args
    }

    fn locate_output(
        &self,
        _work_dir: &Path,
        _input: &Path,
        staged_output: &Path,
    ) -> Option<PathBuf> {
        staged_output.exists().then(|| staged_output.to_path_buf())
    }

    fn relocate_artifacts(
        &self,
        located: &Path,
        dest: &Path,
        opts: &ConversionOptions,
    ) -> Result<(), ConvertError> {
        move_file(located, dest)?;
        if opts.image_mode == ImageExportMode::Referenced {
            let old_stem = stem_of(located);
            let new_stem = stem_of(dest);
            let src_dir = located.parent().unwrap_or(Path::new("."));
            let dest_dir = dest.parent().unwrap_or(Path::new("."));
            for suffix in ["", "_artifacts"] {
                let companion = src_dir.join(format!("{old_stem}{suffix}"));
                if companion.is_dir() {
                    move_dir(&companion, &dest_dir.join(format!("{new_stem}{suffix}")))?;
                }
            }
            rewrite_image_refs(dest, &old_stem, &new_stem)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PaddleOCR
// ---------------------------------------------------------------------------

/// OCR-focused converter; flat-file output, internal temp dirs are the
/// tool's own business.
struct OcrAdapter {
    engine: ConversionEngine,
}

const PADDLE_EXTS: &[&str] = &["pdf", "png", "jpg", "jpeg", "bmp", "tiff"];

impl EngineAdapter for OcrAdapter {
    fn engine(&self) -> ConversionEngine {
        self.engine
    }

    fn script(&self, _backend: Option<OcrBackend>) -> &'static str {
        PADDLE_SCRIPT
    }

    fn supports(&self, input: &Path) -> bool {
        PADDLE_EXTS.contains(&ext_of(input).as_str())
    }

    fn build_command(
        &self,
        input: &Path,
        staged_output: &Path,
        opts: &ConversionOptions,
        _backend: Option<OcrBackend>,
    ) -> Vec<String> {
        let mut args = vec![
            path_arg(input),
            path_arg(staged_output),
            "--lang".into(),
            opts.language.clone(),
        ];
        if self.engine.uses_gpu() {
            args.push("--use_gpu".into());
        }
        args
    }

    fn locate_output(
        &self,
        _work_dir: &Path,
        _input: &Path,
        staged_output: &Path,
    ) -> Option<PathBuf> {
        staged_output.exists().then(|| staged_output.to_path_buf())
    }

    fn relocate_artifacts(
        &self,
        located: &Path,
        dest: &Path,
        _opts: &ConversionOptions,
    ) -> Result<(), ConvertError> {
        move_file(located, dest)
    }
}

// ---------------------------------------------------------------------------
// Marker
// ---------------------------------------------------------------------------

/// High-fidelity converter. Takes an output *directory* and writes
/// `<input_stem>.md` plus an `<input_stem>_images/` folder inside it.
struct HighFidelityAdapter {
    engine: ConversionEngine,
}

impl EngineAdapter for HighFidelityAdapter {
    fn engine(&self) -> ConversionEngine {
        self.engine
    }

    fn script(&self, _backend: Option<OcrBackend>) -> &'static str {
        MARKER_SCRIPT
    }

    fn supports(&self, input: &Path) -> bool {
        ext_of(input) == "pdf"
    }

    fn build_command(
        &self,
        input: &Path,
        staged_output: &Path,
        opts: &ConversionOptions,
        _backend: Option<OcrBackend>,
    ) -> Vec<String> {
        let out_dir = staged_output.parent().unwrap_or(Path::new("."));
        let mut args = vec![
            path_arg(input),
            path_arg(out_dir),
            "--language".into(),
            opts.language.clone(),
        ];
        if self.engine.uses_gpu() {
            args.push("--use-gpu".into());
        }
        args
    }

    fn locate_output(&self, work_dir: &Path, input: &Path, _staged_output: &Path) -> Option<PathBuf> {
        let candidate = work_dir.join(format!("{}.md", stem_of(input)));
        candidate.exists().then_some(candidate)
    }

    fn relocate_artifacts(
        &self,
        located: &Path,
        dest: &Path,
        opts: &ConversionOptions,
    ) -> Result<(), ConvertError> {
        move_file(located, dest)?;
        if opts.image_mode != ImageExportMode::None {
            let old_stem = stem_of(located);
            let new_stem = stem_of(dest);
            let images = located
                .parent()
                .unwrap_or(Path::new("."))
                .join(format!("{old_stem}_images"));
            if images.is_dir() {
                let dest_images = dest
                    .parent()
                    .unwrap_or(Path::new("."))
                    .join(format!("{new_stem}_images"));
                move_dir(&images, &dest_images)?;
                rewrite_image_refs(dest, &old_stem, &new_stem)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Relocation helpers
// ---------------------------------------------------------------------------

fn stem_of(p: &Path) -> String {
    p.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string()
}

fn relocate_err(path: &Path, source: std::io::Error) -> ConvertError {
    ConvertError::Relocate {
        path: path.to_path_buf(),
        source,
    }
}

/// Move with clean overwrite; falls back to copy+remove across filesystems.
fn move_file(src: &Path, dest: &Path) -> Result<(), ConvertError> {
    if dest.exists() {
        std::fs::remove_file(dest).map_err(|e| relocate_err(dest, e))?;
    }
    if std::fs::rename(src, dest).is_err() {
        std::fs::copy(src, dest).map_err(|e| relocate_err(dest, e))?;
        std::fs::remove_file(src).map_err(|e| relocate_err(src, e))?;
    }
    Ok(())
}

fn move_dir(src: &Path, dest: &Path) -> Result<(), ConvertError> {
    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| relocate_err(dest, e))?;
    }
    if std::fs::rename(src, dest).is_err() {
        copy_dir_recursive(src, dest)?;
        std::fs::remove_dir_all(src).map_err(|e| relocate_err(src, e))?;
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), ConvertError> {
    std::fs::create_dir_all(dest).map_err(|e| relocate_err(dest, e))?;
    let entries = std::fs::read_dir(src).map_err(|e| relocate_err(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| relocate_err(src, e))?;
        let target = dest.join(entry.file_name());
        let path = entry.path();
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            std::fs::copy(&path, &target).map_err(|e| relocate_err(&target, e))?;
        }
    }
    Ok(())
}

/// Rewrite `](old_stem/...` style image links after the output stem changed
/// during relocation. No-op when the stems already match.
fn rewrite_image_refs(markdown: &Path, old_stem: &str, new_stem: &str) -> Result<(), ConvertError> {
    if old_stem == new_stem {
        return Ok(());
    }
    let content = std::fs::read_to_string(markdown).map_err(|e| relocate_err(markdown, e))?;
    let pattern = format!(r"\]\({}((?:_artifacts|_images)?/)", regex::escape(old_stem));
    // The pattern is built from a literal stem; compilation cannot fail on
    // user input, but stay on the error path rather than unwrap.
    let re = Regex::new(&pattern).map_err(|_| ConvertError::Relocate {
        path: markdown.to_path_buf(),
        source: std::io::Error::other("invalid image reference pattern"),
    })?;
    let rewritten = re.replace_all(&content, format!("]({new_stem}$1"));
    if rewritten != content {
        std::fs::write(markdown, rewritten.as_bytes()).map_err(|e| relocate_err(markdown, e))?;
    }
    Ok(())
}
