//! Orchestrator: the state machine driving a document through decode →
//! layout → images → blob → vision → embed, and the entry point for the
//! structured-extraction call on an already-ingested document.
//!
//! A document's lifecycle lives entirely in memory for the duration of the
//! process — this is a reference deployment, not a durable job queue. A
//! production deployment would swap the in-memory maps for a real store
//! without touching the stage functions themselves.

use crate::context::Context;
use crate::decode;
use crate::error::PipelineError;
use crate::extract::{self, ExtractionOverrides, ExtractionRequest};
use crate::model::{DocumentRecord, ExtractionResult, ImageArtifact, VariableType};
use crate::pipeline::{blob, embed, images, input, layout, vision};
use crate::progress::{PipelineStep, ProgressCallback};
use edgequake_llm::ProviderFactory;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct IngestOptions {
    pub extract_charts: bool,
    pub chart_provider: String,
    pub device: Option<String>,
    pub lang: Option<String>,
    pub images_only: bool,
    /// Checked between pipeline stages; a caller that cancels mid-ingest
    /// gets [`PipelineError::Cancelled`] instead of a stage it no longer
    /// wants the result of.
    pub cancellation_token: CancellationToken,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            extract_charts: true,
            chart_provider: "auto".to_string(),
            device: None,
            lang: None,
            images_only: false,
            cancellation_token: CancellationToken::new(),
        }
    }
}

#[derive(Debug)]
pub struct EnrichSummary {
    pub enriched_count: usize,
    pub failed_count: usize,
}

/// Owns in-memory document and artifact state for the lifetime of the
/// process, plus every stage dependency pulled from [`Context`].
pub struct Orchestrator {
    ctx: Context,
    documents: RwLock<HashMap<Uuid, DocumentRecord>>,
    artifacts: RwLock<HashMap<Uuid, Vec<ImageArtifact>>>,
}

impl Orchestrator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx, documents: RwLock::new(HashMap::new()), artifacts: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &crate::config::PipelineConfig {
        &self.ctx.config
    }

    pub fn blobs(&self) -> &blob::FsBlobStore {
        &self.ctx.blobs
    }

    pub fn templates(&self) -> &crate::templates::TemplateRegistry {
        &self.ctx.templates
    }

    /// Ingest a document: classify, extract layout, materialise images,
    /// persist blobs. Does not run vision enrichment or embeddings — call
    /// [`Orchestrator::enrich`] next.
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        filename: String,
        options: IngestOptions,
        progress: ProgressCallback,
    ) -> Result<DocumentRecord, PipelineError> {
        let document_id = Uuid::new_v4();
        progress.on_start(document_id);
        progress.on_step(document_id, PipelineStep::Created, "document received".to_string(), Some(0));

        let device = options.device.unwrap_or_else(|| self.ctx.config.device.clone());
        let lang = options.lang.unwrap_or_else(|| self.ctx.config.lang.clone());
        let declared_mime = if input::is_url(&filename) { "application/octet-stream" } else { "application/pdf" };
        let cancel = options.cancellation_token;

        let result = self.run_ingest(document_id, bytes, filename, declared_mime, &device, &lang, options.images_only, &cancel, &progress).await;

        match &result {
            Ok(document) => {
                self.documents.write().await.insert(document_id, document.clone());
                progress.on_step(document_id, PipelineStep::ImagesMaterialised, "images materialised".to_string(), Some(60));
                progress.on_complete(document_id, PipelineStep::ImagesMaterialised);
            }
            Err(e) => {
                progress.on_step(document_id, PipelineStep::Failed, e.to_string(), None);
                progress.on_complete(document_id, PipelineStep::Failed);
            }
        }
        result
    }

    async fn run_ingest(
        &self,
        document_id: Uuid,
        bytes: Vec<u8>,
        filename: String,
        declared_mime: &str,
        device: &str,
        lang: &str,
        images_only: bool,
        cancel: &CancellationToken,
        progress: &ProgressCallback,
    ) -> Result<DocumentRecord, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::InputInvalid);
        }

        let (input_class, plan) = if declared_mime == "application/pdf" {
            decode::classify(&bytes, bytes.len() as u64).await?
        } else {
            decode::classify_non_pdf(declared_mime)
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let layout_timeout = Duration::from_secs(self.ctx.config.layout_timeout_secs);
        let layout_out = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            out = layout::extract(&self.ctx.http, &self.ctx.registry, &plan, &bytes, &filename, input_class, device, lang, layout_timeout) => out?,
        };

        progress.on_step(document_id, PipelineStep::LayoutDone, "layout extraction complete".to_string(), Some(30));

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut document = layout_out.document;
        document.id = document_id;
        document.markdown = crate::pipeline::postprocess::clean_markdown(&document.markdown);
        let _ = images_only;

        let pdf_bytes = bytes;
        let pages = document.pages.clone();
        let embedded = layout_out.embedded_images;
        let materialised = tokio::task::spawn_blocking(move || images::materialise_with_bytes(document_id, &pdf_bytes, &pages, embedded))
            .await
            .map_err(|e| PipelineError::Internal(format!("image materialisation task panicked: {e}")))??;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut stored_artifacts = Vec::with_capacity(materialised.len());
        for (mut artifact, image_bytes) in materialised {
            self.ctx.blobs.put(&mut artifact, &image_bytes).await?;
            stored_artifacts.push(artifact);
        }
        self.artifacts.write().await.insert(document_id, stored_artifacts);

        Ok(document)
    }

    /// Run vision enrichment and embedding generation over every artifact of
    /// an already-ingested document. A second call with `force_refresh: false`
    /// over artifacts already enriched by a prior call is a no-op: only
    /// artifacts with no `enriched_at` yet are sent through the vision pool.
    pub async fn enrich(&self, document_id: Uuid, provider_alias: &str, force_refresh: bool, progress: ProgressCallback) -> Result<EnrichSummary, PipelineError> {
        self.enrich_cancellable(document_id, provider_alias, force_refresh, &CancellationToken::new(), progress).await
    }

    /// Same as [`Orchestrator::enrich`], but short-circuits at the next
    /// cancellation point (before the vision pool starts, and before each
    /// per-artifact embedding call) when `cancel` is tripped.
    pub async fn enrich_cancellable(
        &self,
        document_id: Uuid,
        provider_alias: &str,
        force_refresh: bool,
        cancel: &CancellationToken,
        progress: ProgressCallback,
    ) -> Result<EnrichSummary, PipelineError> {
        let document = self.documents.read().await.get(&document_id).cloned().ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;
        let artifacts = self.artifacts.write().await.remove(&document_id).unwrap_or_default();

        if artifacts.is_empty() {
            progress.on_step(document_id, PipelineStep::Enriched, "no images to enrich".to_string(), Some(90));
            self.artifacts.write().await.insert(document_id, artifacts);
            return Ok(EnrichSummary { enriched_count: 0, failed_count: 0 });
        }

        let (already_enriched, to_process): (Vec<_>, Vec<_>) =
            artifacts.into_iter().partition(|a| !force_refresh && a.enriched_at.is_some());

        if to_process.is_empty() {
            progress.on_step(document_id, PipelineStep::Enriched, "already enriched, nothing to refresh".to_string(), Some(90));
            self.artifacts.write().await.insert(document_id, already_enriched);
            return Ok(EnrichSummary { enriched_count: 0, failed_count: 0 });
        }

        if cancel.is_cancelled() {
            let mut restored = already_enriched;
            restored.extend(to_process);
            self.artifacts.write().await.insert(document_id, restored);
            return Err(PipelineError::Cancelled);
        }

        let (concrete, default_model) = extract::resolve_alias(provider_alias)
            .ok_or_else(|| PipelineError::ProviderNotConfigured { provider: provider_alias.to_string() })?;
        let is_cloud = concrete != "ollama";
        let model = if is_cloud { default_model } else { self.ctx.config.vision_llm_model.as_str() };
        if !extract::is_configured(concrete) {
            return Err(PipelineError::ProviderNotConfigured { provider: provider_alias.to_string() });
        }
        let provider = ProviderFactory::create_llm_provider(concrete, model)
            .map_err(|e| PipelineError::ProviderNotConfigured { provider: format!("{provider_alias}: {e}") })?;

        let page_text_by_number: HashMap<usize, String> = document.pages.iter().map(|p| (p.page_number, p.text.clone())).collect();

        let enriched = vision::enrich_all(&provider, &self.ctx.config, is_cloud, self.ctx.blobs.root(), to_process, &page_text_by_number).await;

        let embed_timeout = Duration::from_secs(self.ctx.config.embed_timeout_secs);
        let mut final_artifacts = Vec::with_capacity(enriched.len());
        let mut failed_count = 0;
        for mut artifact in enriched {
            let ok = artifact.enrichment_error.is_none();
            if !ok {
                failed_count += 1;
            } else if cancel.is_cancelled() {
                // Abandon remaining embedding calls; the artifact keeps its
                // vision-enrichment fields but gets no embedding.
            } else if let Some(text) = artifact.description.clone() {
                let outcome = embed::embed(
                    &self.ctx.http,
                    &self.ctx.registry,
                    &self.ctx.config.embed_model,
                    &text,
                    self.ctx.config.embed_dimension,
                    embed_timeout,
                )
                .await;
                artifact.embedding = outcome.vector;
                artifact.embedding_generated = outcome.generated;
            }
            progress.on_artifact_enriched(document_id, artifact.id, ok);
            final_artifacts.push(artifact);
        }

        let enriched_count = final_artifacts.len() - failed_count;
        final_artifacts.extend(already_enriched);
        self.artifacts.write().await.insert(document_id, final_artifacts);

        progress.on_step(document_id, PipelineStep::Enriched, format!("enriched {enriched_count} of {} images", enriched_count + failed_count), Some(90));
        progress.on_step(document_id, PipelineStep::Ready, "document ready".to_string(), Some(100));
        progress.on_complete(document_id, PipelineStep::Ready);

        Ok(EnrichSummary { enriched_count, failed_count })
    }

    pub async fn document(&self, document_id: Uuid) -> Option<DocumentRecord> {
        self.documents.read().await.get(&document_id).cloned()
    }

    pub async fn artifacts_for(&self, document_id: Uuid) -> Vec<ImageArtifact> {
        self.artifacts.read().await.get(&document_id).cloned().unwrap_or_default()
    }

    /// Run structured extraction against an ingested document's assembled
    /// markdown text.
    pub async fn extract(
        &self,
        document_id: Uuid,
        template_id: Option<String>,
        inline_variables: Vec<(String, String, VariableType)>,
        provider: &str,
        model: Option<&str>,
        overrides: ExtractionOverrides,
    ) -> Result<ExtractionResult, PipelineError> {
        let document = self.documents.read().await.get(&document_id).cloned().ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;

        let request = match template_id {
            Some(id) => ExtractionRequest::Named { template_id: id },
            None => ExtractionRequest::Inline { variables: inline_variables },
        };

        extract::extract(&self.ctx.templates, request, &document.markdown, provider, model, overrides).await
    }

    /// Run structured extraction against caller-supplied text directly,
    /// bypassing the document store (`POST /extract-structured`).
    pub async fn extract_text(
        &self,
        text: &str,
        template_id: Option<String>,
        inline_variables: Vec<(String, String, VariableType)>,
        provider: &str,
        model: Option<&str>,
        overrides: ExtractionOverrides,
    ) -> Result<ExtractionResult, PipelineError> {
        let request = match template_id {
            Some(id) => ExtractionRequest::Named { template_id: id },
            None => ExtractionRequest::Inline { variables: inline_variables },
        };
        extract::extract(&self.ctx.templates, request, text, provider, model, overrides).await
    }
}

/// Resolve document bytes either from a multipart upload or a URL,
/// sharing the same [`input::ResolvedInput`] shape downstream.
pub async fn resolve_input(
    uploaded: Option<(Vec<u8>, String)>,
    url: Option<String>,
    download_timeout_secs: u64,
) -> Result<input::ResolvedInput, PipelineError> {
    match (uploaded, url) {
        (Some((bytes, filename)), _) => input::resolve_uploaded(bytes, filename, "application/pdf"),
        (None, Some(url)) => input::resolve_from_url(&url, download_timeout_secs).await,
        (None, None) => Err(PipelineError::InputInvalid),
    }
}

/// Wall-clock helper shared by the HTTP handlers for the `processing_time`
/// field in responses.
pub fn elapsed_secs(started: Instant) -> f64 {
    started.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentRecord, ImageArtifact, ImageOrigin};

    #[test]
    fn ingest_options_default_extracts_charts() {
        let opts = IngestOptions::default();
        assert!(opts.extract_charts);
        assert_eq!(opts.chart_provider, "auto");
    }

    async fn test_orchestrator() -> (Orchestrator, tempfile::TempDir) {
        let blob_dir = tempfile::tempdir().unwrap();
        let config = crate::config::PipelineConfig::builder()
            .blob_store_dir(blob_dir.path().to_path_buf())
            .templates_dir(std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/templates"))
            .build()
            .unwrap();
        let ctx = Context::build(config).await.expect("context should build without any registered backends");
        (Orchestrator::new(ctx), blob_dir)
    }

    #[tokio::test]
    async fn enrich_cancellable_short_circuits_before_touching_any_backend() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let document = DocumentRecord::new("doc.pdf", 10, "application/pdf");
        let document_id = document.id;
        let artifact = ImageArtifact::new(document_id, Some(1), 0, ImageOrigin::Region, "image/png", 10, 10, b"fake");

        orchestrator.documents.write().await.insert(document_id, document);
        orchestrator.artifacts.write().await.insert(document_id, vec![artifact]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .enrich_cancellable(document_id, "local", false, &cancel, Arc::new(crate::progress::NoopProgressSink))
            .await
            .unwrap_err();

        assert_eq!(err.tag(), "cancelled");
        // the artifact is put back rather than lost
        assert_eq!(orchestrator.artifacts_for(document_id).await.len(), 1);
    }

    #[tokio::test]
    async fn enrich_rejects_unknown_provider_alias_before_any_network_call() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let document = DocumentRecord::new("doc.pdf", 10, "application/pdf");
        let document_id = document.id;
        let artifact = ImageArtifact::new(document_id, Some(1), 0, ImageOrigin::Region, "image/png", 10, 10, b"fake");

        orchestrator.documents.write().await.insert(document_id, document);
        orchestrator.artifacts.write().await.insert(document_id, vec![artifact]);

        let err = orchestrator.enrich(document_id, "cloud_zzz", false, Arc::new(crate::progress::NoopProgressSink)).await.unwrap_err();

        assert_eq!(err.tag(), "provider_not_configured");
    }

    #[tokio::test]
    async fn enrich_without_force_refresh_is_a_noop_on_already_enriched_artifacts() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let document = DocumentRecord::new("doc.pdf", 10, "application/pdf");
        let document_id = document.id;
        let mut artifact = ImageArtifact::new(document_id, Some(1), 0, ImageOrigin::Region, "image/png", 10, 10, b"fake");
        artifact.enriched_at = Some(chrono::Utc::now());
        artifact.description = Some("a previous run's caption".to_string());

        orchestrator.documents.write().await.insert(document_id, document);
        orchestrator.artifacts.write().await.insert(document_id, vec![artifact]);

        let summary = orchestrator.enrich(document_id, "local", false, Arc::new(crate::progress::NoopProgressSink)).await.unwrap();

        assert_eq!(summary.enriched_count, 0);
        assert_eq!(summary.failed_count, 0);
        let kept = orchestrator.artifacts_for(document_id).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].description.as_deref(), Some("a previous run's caption"));
    }
}
