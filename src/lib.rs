//! # docforge
//!
//! Turns technical PDFs into structured documents: extracted layout and
//! text, materialised images enriched with OCR/classification/structured
//! data, and an LLM-backed structured-extraction surface driven by
//! user-authored JSON templates.
//!
//! ## Why this crate?
//!
//! Traditional text-extraction tools flatten a PDF's layout away — tables,
//! figures, and formulas come out as noise or go missing entirely. This
//! crate routes a document through a layout/OCR engine to recover that
//! structure, crops out every chart/table/diagram as a standalone image,
//! and runs each one through a vision model so downstream search and
//! extraction can reason over what's actually on the page instead of just
//! the body text.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes
//!  │
//!  ├─ 1. Decode      classify input_class, pick an engine strategy
//!  ├─ 2. Layout      run the strategy's engines, normalise to pages+text
//!  ├─ 3. Materialise rasterise pages (spawn_blocking), crop croppable regions
//!  ├─ 4. Blob        persist every image artifact, record content hashes
//!  ├─ 5. Vision      OCR + classify + structured-data per image, bounded pool
//!  ├─ 6. Embed       generate an embedding candidate per enriched artifact
//!  └─ 7. Extract     render a template, call an LLM, coerce to the schema
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docforge::context::Context;
//! use docforge::orchestrator::{IngestOptions, Orchestrator};
//! use docforge::progress::NoopProgressSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = Context::from_env().await?;
//!     let orchestrator = Orchestrator::new(ctx);
//!     let bytes = std::fs::read("document.pdf")?;
//!     let document = orchestrator
//!         .ingest(bytes, "document.pdf".to_string(), IngestOptions::default(), Arc::new(NoopProgressSink))
//!         .await?;
//!     println!("{}", document.markdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `server` | on | Enables the `docforge-server` binary (axum + clap + anyhow) |
//! | `bundled` | on | Bundles pdfium via `pdfium-auto` instead of requiring a system install |
//!
//! Disable `server` when using only the library to avoid pulling in transport deps:
//! ```toml
//! docforge = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod extract;
pub mod jsonparse;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod templates;

#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use context::Context;
pub use error::{ArtifactError, PipelineError};
pub use orchestrator::Orchestrator;
pub use progress::{NoopProgressSink, PipelineStep, ProgressSink};
