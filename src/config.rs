//! Tunable parameters for the ingestion and extraction pipeline.
//!
//! All runtime behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`] or loaded directly from the environment
//! with [`PipelineConfig::from_env`]. Keeping every knob in one struct makes
//! it trivial to share a config across concurrently-running documents and to
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest. [`crate::context::Context`] wires a
//! built `PipelineConfig` together with the backend registry, template
//! registry and HTTP client into the single value every component borrows.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::env;

/// Tunable parameters shared by every component. Cheap to clone; hand a
/// clone to each orchestrating task rather than locking a shared instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Vision-LLM base URL (`VISION_LLM_URL`).
    pub vision_llm_url: Option<String>,
    /// Vision-LLM model tag (`VISION_LLM_MODEL`). Default: "llama3.2-vision".
    pub vision_llm_model: String,
    /// Embeddings backend base URL (`EMBED_SERVICE_URL`).
    pub embed_service_url: Option<String>,
    /// Embedding model tag (`EMBED_MODEL`). Default: "nomic-embed-text".
    pub embed_model: String,
    /// The embeddings backend's advertised vector dimension
    /// (`EMBED_DIMENSION`), when known. A returned vector whose length
    /// doesn't match this is treated as a per-artifact embedding failure
    /// rather than silently stored. `None` skips the check (no advertised
    /// dimension on record for this backend).
    pub embed_dimension: Option<usize>,
    /// Remote layout-extraction backend base URL (`LAYOUT_SERVICE_URL`).
    /// When unset, the registry falls back to a local in-process engine.
    pub layout_service_url: Option<String>,
    /// Default compute device tag (`DEVICE`). Default: "cpu".
    pub device: String,
    /// Default document language (`DOC_LANG`). Default: "en".
    pub lang: String,
    /// On-disk root for the reference blob-store adapter (`BLOB_STORE_DIR`).
    pub blob_store_dir: std::path::PathBuf,
    /// Directory the template loader reads `*.json` files from.
    pub templates_dir: std::path::PathBuf,

    /// Vision-enrichment worker pool size. Default: 3 (local), 8 (cloud) —
    /// see [`PipelineConfig::vision_concurrency_for`].
    pub vision_concurrency: Option<usize>,
    /// Maximum retry attempts on a transient vision-LLM failure. Default: 2.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Layout-extraction per-engine timeout in seconds. Default: 300.
    pub layout_timeout_secs: u64,
    /// Vision-enrichment per-call timeout in seconds. Default: 120.
    pub vision_timeout_secs: u64,
    /// Embedding-call timeout in seconds. Default: 30.
    pub embed_timeout_secs: u64,
    /// Backend health-probe timeout in seconds. Default: 2.
    pub health_probe_timeout_secs: u64,
    /// Backend health-probe interval in seconds. Default: 30.
    pub health_probe_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vision_llm_url: None,
            vision_llm_model: "llama3.2-vision".to_string(),
            embed_service_url: None,
            embed_model: "nomic-embed-text".to_string(),
            embed_dimension: None,
            layout_service_url: None,
            device: "cpu".to_string(),
            lang: "en".to_string(),
            blob_store_dir: std::path::PathBuf::from("./data/blobs"),
            templates_dir: std::path::PathBuf::from("./config/templates"),
            vision_concurrency: None,
            max_retries: 2,
            retry_backoff_ms: 500,
            layout_timeout_secs: 300,
            vision_timeout_secs: 120,
            embed_timeout_secs: 30,
            health_probe_timeout_secs: 2,
            health_probe_interval_secs: 30,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a config from the environment variables the runtime expects,
    /// falling back to [`PipelineConfig::default`] for anything unset.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut builder = Self::builder();
        if let Ok(v) = env::var("VISION_LLM_URL") {
            builder = builder.vision_llm_url(v);
        }
        if let Ok(v) = env::var("VISION_LLM_MODEL") {
            builder = builder.vision_llm_model(v);
        }
        if let Ok(v) = env::var("EMBED_SERVICE_URL") {
            builder = builder.embed_service_url(v);
        }
        if let Ok(v) = env::var("EMBED_MODEL") {
            builder = builder.embed_model(v);
        }
        if let Ok(v) = env::var("EMBED_DIMENSION") {
            if let Ok(dim) = v.parse::<usize>() {
                builder = builder.embed_dimension(dim);
            }
        }
        if let Ok(v) = env::var("LAYOUT_SERVICE_URL") {
            builder = builder.layout_service_url(v);
        }
        if let Ok(v) = env::var("DEVICE") {
            builder = builder.device(v);
        }
        if let Ok(v) = env::var("DOC_LANG") {
            builder = builder.lang(v);
        }
        if let Ok(v) = env::var("BLOB_STORE_DIR") {
            builder = builder.blob_store_dir(v);
        }
        builder.build()
    }

    /// Vision-enrichment pool size, defaulting by whether the configured
    /// backend is a local model or a rate-limited cloud provider.
    pub fn vision_concurrency_for(&self, is_cloud_provider: bool) -> usize {
        self.vision_concurrency.unwrap_or(if is_cloud_provider { 8 } else { 3 })
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn vision_llm_url(mut self, url: impl Into<String>) -> Self {
        self.config.vision_llm_url = Some(url.into());
        self
    }

    pub fn vision_llm_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_llm_model = model.into();
        self
    }

    pub fn embed_service_url(mut self, url: impl Into<String>) -> Self {
        self.config.embed_service_url = Some(url.into());
        self
    }

    pub fn embed_model(mut self, model: impl Into<String>) -> Self {
        self.config.embed_model = model.into();
        self
    }

    pub fn embed_dimension(mut self, dim: usize) -> Self {
        self.config.embed_dimension = Some(dim);
        self
    }

    pub fn layout_service_url(mut self, url: impl Into<String>) -> Self {
        self.config.layout_service_url = Some(url.into());
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.device = device.into();
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.config.lang = lang.into();
        self
    }

    pub fn blob_store_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.blob_store_dir = dir.into();
        self
    }

    pub fn templates_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.templates_dir = dir.into();
        self
    }

    pub fn vision_concurrency(mut self, n: usize) -> Self {
        self.config.vision_concurrency = Some(n.max(1));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.vision_llm_model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("vision_llm_model must not be empty".into()));
        }
        if c.embed_model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("embed_model must not be empty".into()));
        }
        Ok(self.config)
    }
}

/// Fidelity level requested for structured-data extraction from a
/// classified image — chart/table/diagram shapes differ, so the vision
/// enricher branches its prompt by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredImageKind {
    Chart,
    Table,
    Diagram,
}

impl StructuredImageKind {
    pub fn from_classification_tag(tag: &str) -> Option<Self> {
        match tag {
            "chart" => Some(Self::Chart),
            "table" => Some(Self::Table),
            "diagram" => Some(Self::Diagram),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = PipelineConfig::default();
        assert_eq!(c.vision_llm_model, "llama3.2-vision");
        assert_eq!(c.embed_model, "nomic-embed-text");
    }

    #[test]
    fn builder_rejects_empty_model() {
        let err = PipelineConfig::builder().vision_llm_model("").build().unwrap_err();
        assert_eq!(err.tag(), "invalid_config");
    }

    #[test]
    fn vision_concurrency_defaults_by_provider_kind() {
        let c = PipelineConfig::default();
        assert_eq!(c.vision_concurrency_for(false), 3);
        assert_eq!(c.vision_concurrency_for(true), 8);
    }

    #[test]
    fn embed_dimension_defaults_to_unset() {
        let c = PipelineConfig::default();
        assert_eq!(c.embed_dimension, None);
        let c = PipelineConfig::builder().embed_dimension(768).build().unwrap();
        assert_eq!(c.embed_dimension, Some(768));
    }

    #[test]
    fn structured_image_kind_from_tag() {
        assert_eq!(StructuredImageKind::from_classification_tag("chart"), Some(StructuredImageKind::Chart));
        assert_eq!(StructuredImageKind::from_classification_tag("photo"), None);
    }
}
