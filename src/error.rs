//! Error types for the document ingestion and extraction pipeline.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the requested operation cannot proceed
//!   at all (bad input, no backend available, template not found). Returned
//!   as `Err(PipelineError)` from the top-level orchestrator operations and
//!   mapped to an HTTP status by the server layer.
//!
//! * [`ArtifactError`] — **Non-fatal**: a single image or extraction call
//!   failed, but the rest of the document is fine. Stored inline on the
//!   [`crate::model::ImageArtifact`] or [`crate::model::ExtractionResult`]
//!   it concerns rather than propagated as an `Err`.
//!
//! The separation lets callers decide their own tolerance: abort on the
//! first failure, log and continue, or collect every per-artifact error for
//! a post-run report.

use thiserror::Error;

/// All fatal errors returned by the pipeline's top-level operations.
///
/// Per-artifact failures use [`ArtifactError`] and are stored on the record
/// they concern rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input is empty or not a supported document type")]
    InputInvalid,

    #[error("no healthy backend offers capability '{capability}'")]
    BackendUnavailable { capability: String },

    #[error("engine '{engine}' failed: {detail}")]
    EngineFailed { engine: String, detail: String },

    #[error("failed to decode input as a document: {0}")]
    DecodeFailed(String),

    #[error("provider '{provider}' is not configured; set its API key or URL")]
    ProviderNotConfigured { provider: String },

    #[error("template '{0}' was not found")]
    TemplateNotFound(String),

    #[error("template '{id}' is invalid: {detail}")]
    TemplateInvalid { id: String, detail: String },

    #[error("document '{0}' was not found")]
    DocumentNotFound(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("blob store error: {0}")]
    BlobStore(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine tag surfaced on the HTTP error envelope.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InputInvalid => "input_invalid",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::EngineFailed { .. } => "engine_failed",
            Self::DecodeFailed(_) => "decode_failed",
            Self::ProviderNotConfigured { .. } => "provider_not_configured",
            Self::TemplateNotFound(_) => "template_not_found",
            Self::TemplateInvalid { .. } => "template_invalid",
            Self::DocumentNotFound(_) => "document_not_found",
            Self::Cancelled => "cancelled",
            Self::BlobStore(_) => "blob_store_error",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// A non-fatal error attached to a single artifact or extraction attempt.
///
/// Never propagated as `Result::Err` past the component that produced it;
/// callers see it inline on the record (`enrichment_error`, `ExtractionResult::error`).
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ArtifactError {
    #[error("enrichment failed: {detail}")]
    EnrichmentFailed { detail: String },

    #[error("extraction timed out after {secs}s")]
    ExtractionTimeout { secs: u64 },

    #[error("could not parse model output as JSON: {snippet}")]
    ExtractionParseError { snippet: String },

    #[error("extraction rejected: {reason}")]
    ExtractionRejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(PipelineError::InputInvalid.tag(), "input_invalid");
        assert_eq!(
            PipelineError::ProviderNotConfigured { provider: "cloud_a".into() }.tag(),
            "provider_not_configured"
        );
    }

    #[test]
    fn artifact_error_is_clone_and_serializable() {
        let e = ArtifactError::ExtractionTimeout { secs: 30 };
        let cloned = e.clone();
        let json = serde_json::to_string(&cloned).unwrap();
        assert!(json.contains("ExtractionTimeout") || json.contains("extraction_timeout"));
    }
}
