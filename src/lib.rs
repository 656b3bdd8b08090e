//! markbridge: document-to-Markdown conversion orchestrator.
//!
//! Converts documents by shelling out to external Python tools (MarkItDown,
//! Docling, PaddleOCR, Marker), each installed in its own isolated virtual
//! environment. This crate is the orchestration core: environment
//! resolution, deadlock-free subprocess execution with timeout and
//! cancellation, per-engine command/output conventions, and
//! bounded-concurrency batch scheduling. Rendering of the produced Markdown
//! is someone else's problem.

pub mod batch;
pub mod cli;
pub mod config;
pub mod engine;
pub mod envs;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod scripts;
pub mod util;
