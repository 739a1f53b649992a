//! Thin HTTP handlers: deserialize the request, call into the orchestrator,
//! serialize the response. No pipeline logic lives here.

use crate::extract::{self, ExtractionOverrides};
use crate::model::{ImageArtifact, VariableType};
use crate::orchestrator::{self, IngestOptions, Orchestrator};
use crate::server::errors::ApiError;
use axum::extract::{Path, State};
use axum::Json;
use axum_extra::extract::Multipart;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub type SharedOrchestrator = Arc<Orchestrator>;

#[derive(Debug, Default)]
struct ProcessFields {
    file: Option<(Vec<u8>, String)>,
    url: Option<String>,
    extract_charts: Option<bool>,
    chart_provider: Option<String>,
    device: Option<String>,
    lang: Option<String>,
    force_refresh: Option<bool>,
}

async fn read_process_fields(mut multipart: Multipart) -> Result<ProcessFields, ApiError> {
    let mut fields = ProcessFields::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| anyhow::anyhow!(e))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload.pdf").to_string();
                let bytes = field.bytes().await.map_err(|e| anyhow::anyhow!(e))?.to_vec();
                fields.file = Some((bytes, filename));
            }
            "url" => fields.url = Some(field.text().await.map_err(|e| anyhow::anyhow!(e))?),
            "extract_charts" => {
                let v = field.text().await.map_err(|e| anyhow::anyhow!(e))?;
                fields.extract_charts = v.parse::<bool>().ok();
            }
            "chart_provider" => fields.chart_provider = Some(field.text().await.map_err(|e| anyhow::anyhow!(e))?),
            "force_refresh" => {
                let v = field.text().await.map_err(|e| anyhow::anyhow!(e))?;
                fields.force_refresh = v.parse::<bool>().ok();
            }
            "device" => fields.device = Some(field.text().await.map_err(|e| anyhow::anyhow!(e))?),
            "lang" => fields.lang = Some(field.text().await.map_err(|e| anyhow::anyhow!(e))?),
            other => warn!(field = %other, "ignoring unknown multipart field"),
        }
    }
    Ok(fields)
}

#[derive(Debug, Serialize)]
struct ImageSummary {
    name: String,
    base64: String,
    page_number: Option<usize>,
    image_index: usize,
    mime_type: String,
    ocr_text: Option<String>,
    description: Option<String>,
    classification_tag: Option<String>,
    structured_data: Option<serde_json::Value>,
}

impl ImageSummary {
    fn from_artifact(artifact: &ImageArtifact, bytes: &[u8]) -> Self {
        let page = artifact.page_number.map(|p| p.to_string()).unwrap_or_else(|| "noPage".to_string());
        Self {
            name: format!("{page}_{}", artifact.image_index),
            base64: STANDARD.encode(bytes),
            page_number: artifact.page_number,
            image_index: artifact.image_index,
            mime_type: artifact.mime.clone(),
            ocr_text: artifact.ocr_text.clone(),
            description: artifact.description.clone(),
            classification_tag: artifact.classification_tag.clone(),
            structured_data: artifact.structured_data.clone(),
        }
    }
}

/// Map the multipart `chart_provider` field (`auto|local|cloud_a`) to a
/// structured-extraction provider alias for [`Orchestrator::enrich`].
fn enrichment_provider_alias(chart_provider: &str) -> &str {
    match chart_provider {
        "auto" | "local" => "local",
        other => other,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ProcessResponse {
    success: bool,
    text: String,
    images: Vec<ImageSummary>,
    metadata: serde_json::Value,
    processing_time: f64,
}

/// `POST /process`: ingest a PDF (upload or URL), return assembled markdown
/// plus every materialised image inlined as base64.
pub async fn process(State(orchestrator): State<SharedOrchestrator>, multipart: Multipart) -> Result<Json<ProcessResponse>, ApiError> {
    process_impl(orchestrator, multipart, false).await
}

/// `POST /extract-images-only`: same pipeline, `text` forced empty in the
/// response so callers that only want images skip paying for markdown they
/// discard.
pub async fn extract_images_only(State(orchestrator): State<SharedOrchestrator>, multipart: Multipart) -> Result<Json<ProcessResponse>, ApiError> {
    process_impl(orchestrator, multipart, true).await
}

async fn process_impl(orchestrator: SharedOrchestrator, multipart: Multipart, images_only: bool) -> Result<Json<ProcessResponse>, ApiError> {
    let started = Instant::now();
    let fields = read_process_fields(multipart).await?;

    let download_timeout = orchestrator.config().layout_timeout_secs;
    let options = IngestOptions {
        extract_charts: fields.extract_charts.unwrap_or(true),
        chart_provider: fields.chart_provider.unwrap_or_else(|| "auto".to_string()),
        device: fields.device,
        lang: fields.lang,
        images_only,
        ..IngestOptions::default()
    };
    let resolved = orchestrator::resolve_input(fields.file, fields.url, download_timeout).await?;

    let extract_charts = options.extract_charts;
    let provider_alias = enrichment_provider_alias(&options.chart_provider).to_string();
    let force_refresh = fields.force_refresh.unwrap_or(false);

    let document = orchestrator
        .ingest(resolved.bytes, resolved.filename, options, Arc::new(crate::progress::NoopProgressSink))
        .await?;

    if extract_charts {
        orchestrator
            .enrich(document.id, &provider_alias, force_refresh, Arc::new(crate::progress::NoopProgressSink))
            .await?;
    }
    let artifacts = orchestrator.artifacts_for(document.id).await;

    let mut images = Vec::with_capacity(artifacts.len());
    for artifact in &artifacts {
        match orchestrator.blobs().get(&artifact.blob_ref).await {
            Ok(bytes) => images.push(ImageSummary::from_artifact(artifact, &bytes)),
            Err(e) => warn!(document_id = %document.id, artifact_id = %artifact.id, error = %e, "skipping image in response, blob read failed"),
        }
    }

    let metadata = serde_json::json!({
        "document_id": document.id,
        "filename": document.filename,
        "input_class": document.input_class,
        "pages": document.page_count(),
        "formula_count": document.formula_count,
        "table_count": document.table_count,
        "image_region_count": document.image_region_count,
        "embedded_image_count": document.embedded_image_count,
        "provenance": document.provenance,
    });

    Ok(Json(ProcessResponse {
        success: true,
        text: if images_only { String::new() } else { document.markdown },
        images,
        metadata,
        processing_time: orchestrator::elapsed_secs(started),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    backend: &'static str,
    platform: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// `GET /health`.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "docforge",
        version: env!("CARGO_PKG_VERSION"),
        backend: "pdfium",
        platform: std::env::consts::OS,
        timestamp: chrono::Utc::now(),
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct ProviderSummary {
    alias: String,
    configured: bool,
}

/// `GET /providers`: structured-extraction providers and which are
/// configured in this environment.
pub async fn providers() -> Json<Vec<ProviderSummary>> {
    let list = extract::list_providers()
        .into_iter()
        .map(|p| ProviderSummary { alias: p.alias, configured: p.configured })
        .collect();
    Json(list)
}

/// `GET /templates`.
pub async fn list_templates(State(orchestrator): State<SharedOrchestrator>) -> Json<Vec<crate::model::ExtractionTemplate>> {
    Json(orchestrator.templates().list().into_iter().cloned().collect())
}

/// `GET /templates/{id}`.
pub async fn get_template(State(orchestrator): State<SharedOrchestrator>, Path(id): Path<String>) -> Result<Json<crate::model::ExtractionTemplate>, ApiError> {
    orchestrator
        .templates()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::from(crate::error::PipelineError::TemplateNotFound(id)))
}

#[derive(Debug, Deserialize)]
pub struct ExtractStructuredRequest {
    text: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default)]
    template_id: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<usize>,
    #[serde(default)]
    max_text_length: Option<usize>,
    #[serde(default)]
    timeout: Option<u64>,
}

fn default_provider() -> String {
    "local".to_string()
}

#[derive(Debug, Serialize)]
pub struct ExtractStructuredResponse {
    success: bool,
    data: Option<serde_json::Value>,
    model: String,
    provider: String,
    error: Option<String>,
    processing_time: f64,
}

/// `POST /extract-structured`: run structured extraction against
/// caller-supplied text, bypassing the document store entirely.
pub async fn extract_structured(
    State(orchestrator): State<SharedOrchestrator>,
    Json(req): Json<ExtractStructuredRequest>,
) -> Result<Json<ExtractStructuredResponse>, ApiError> {
    let started = Instant::now();
    let overrides = ExtractionOverrides {
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        max_text_length: req.max_text_length,
        timeout_secs: req.timeout,
    };
    let variables: Vec<(String, String, VariableType)> = Vec::new();

    // `ProviderNotConfigured` is reported on the result envelope rather than
    // as an HTTP error: a caller probing an unconfigured alias still gets a
    // 200 with `success=false`, matching every other extraction outcome.
    let result = match orchestrator.extract_text(&req.text, req.template_id, variables, &req.provider, req.model.as_deref(), overrides).await {
        Ok(result) => result,
        Err(crate::error::PipelineError::ProviderNotConfigured { provider }) => {
            return Ok(Json(ExtractStructuredResponse {
                success: false,
                data: None,
                model: req.model.unwrap_or_default(),
                provider,
                error: Some("ProviderNotConfigured".to_string()),
                processing_time: orchestrator::elapsed_secs(started),
            }));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(ExtractStructuredResponse {
        success: result.success,
        data: result.data,
        model: result.model,
        provider: result.provider,
        error: result.error.map(|e| e.to_string()),
        processing_time: orchestrator::elapsed_secs(started),
    }))
}
