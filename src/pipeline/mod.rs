//! Pipeline stages for document ingestion, enrichment, and extraction.
//!
//! Each submodule implements exactly one component from the system design.
//! Keeping stages separate makes each independently testable and lets us
//! swap a backend (e.g. a different layout engine) without touching other
//! stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ layout ──▶ images ──▶ blob ──▶ vision ──▶ embed
//! (bytes)   (C3)       (C4)       (C5)     (C6)       (C7)
//! ```
//!
//! 1. [`input`]   — canonicalise the caller-supplied upload to local bytes
//! 2. [`layout`]  — invoke the strategy-plan engine sequence; normalise the result
//! 3. [`images`]  — merge embedded + region images into one ordered stream,
//!    rasterising pages via pdfium in `spawn_blocking` for region crops
//! 4. [`blob`]    — persist artifact bytes and record metadata
//! 5. [`vision`]  — per-image OCR, classification, and structured-data extraction
//! 6. [`embed`]   — produce the embedding candidate vector for each artifact
//! 7. [`postprocess`] — deterministic markdown cleanup rules applied to
//!    assembled document text

pub mod blob;
pub mod embed;
pub mod images;
pub mod input;
pub mod layout;
pub mod postprocess;
pub mod vision;
