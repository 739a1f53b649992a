//! Vision enricher: per-image OCR + classification, optional
//! structured-data extraction, and the embedding candidate text, run over a
//! bounded worker pool. Per-artifact failures are isolated onto the
//! artifact's `enrichment_error` field and never fail the document.

use crate::config::{PipelineConfig, StructuredImageKind};
use crate::error::ArtifactError;
use crate::jsonparse::parse_json_response;
use crate::model::ImageArtifact;
use crate::prompts::{structured_data_prompt, VISION_OCR_CLASSIFY_PROMPT};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const EMBEDDING_CANDIDATE_LIMIT: usize = 2000;
const SURROUNDING_TEXT_LIMIT: usize = 500;

/// Enrich every artifact concurrently, bounded by `concurrency`. Returns
/// the same artifacts with enrichment fields populated (or
/// `enrichment_error` set on failure) plus the embedding-candidate text for
/// artifacts that succeeded, keyed by artifact id.
pub async fn enrich_all(
    provider: &Arc<dyn LLMProvider>,
    config: &PipelineConfig,
    is_cloud_provider: bool,
    blob_root: &std::path::Path,
    mut artifacts: Vec<ImageArtifact>,
    page_text_by_number: &std::collections::HashMap<usize, String>,
) -> Vec<ImageArtifact> {
    let concurrency = config.vision_concurrency_for(is_cloud_provider).min(artifacts.len().max(1));
    let timeout = Duration::from_secs(config.vision_timeout_secs);

    let jobs = artifacts.drain(..).map(|artifact| {
        let provider = Arc::clone(provider);
        let surrounding = artifact
            .page_number
            .and_then(|p| page_text_by_number.get(&p))
            .map(|t| t.chars().take(SURROUNDING_TEXT_LIMIT).collect::<String>())
            .unwrap_or_default();
        async move { enrich_one(&provider, artifact, blob_root, &surrounding, timeout, config.max_retries, config.retry_backoff_ms).await }
    });

    stream::iter(jobs).buffer_unordered(concurrency).collect().await
}

async fn enrich_one(
    provider: &Arc<dyn LLMProvider>,
    mut artifact: ImageArtifact,
    blob_root: &std::path::Path,
    surrounding_text: &str,
    timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> ImageArtifact {
    match ocr_and_classify(provider, &artifact, blob_root, timeout, max_retries, retry_backoff_ms).await {
        Ok(ocr) => {
            artifact.ocr_text = Some(ocr.ocr_text.clone());
            artifact.classification_tag = Some(ocr.image_type.clone());
            artifact.classification_confidence = Some(ocr.confidence);

            let mut structured_data = None;
            if let Some(kind) = StructuredImageKind::from_classification_tag(&ocr.image_type) {
                match structured_data_call(provider, &artifact, blob_root, kind, timeout).await {
                    Ok(data) => structured_data = Some(data),
                    Err(e) => warn!(artifact_id = %artifact.id, error = %e, "structured-data call failed, continuing without it"),
                }
            }
            artifact.structured_data = structured_data.clone();

            let candidate = build_embedding_candidate(&ocr.ocr_text, surrounding_text, structured_data.as_ref());
            artifact.description = Some(candidate);
            artifact.enriched_at = Some(chrono::Utc::now());
        }
        Err(e) => {
            artifact.enrichment_error = Some(e);
        }
    }
    artifact
}

struct OcrResult {
    ocr_text: String,
    image_type: String,
    confidence: f32,
}

async fn ocr_and_classify(
    provider: &Arc<dyn LLMProvider>,
    artifact: &ImageArtifact,
    blob_root: &std::path::Path,
    timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> Result<OcrResult, ArtifactError> {
    let bytes = fetch_artifact_bytes(blob_root, artifact).await.unwrap_or_default();
    let image = ImageData::new(STANDARD.encode(&bytes), artifact.mime.clone()).with_detail("high");
    let messages = vec![
        ChatMessage::system(VISION_OCR_CLASSIFY_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = CompletionOptions { temperature: Some(0.0), max_tokens: Some(1024), ..Default::default() };

    let raw = call_with_retry(provider, &messages, &options, timeout, max_retries, retry_backoff_ms).await?;
    let value = parse_json_response(&raw).map_err(|snippet| ArtifactError::ExtractionParseError { snippet })?;

    Ok(OcrResult {
        ocr_text: value.get("ocr_text").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        image_type: value.get("image_type").and_then(|v| v.as_str()).unwrap_or("other").to_string(),
        confidence: value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
    })
}

async fn structured_data_call(
    provider: &Arc<dyn LLMProvider>,
    artifact: &ImageArtifact,
    blob_root: &std::path::Path,
    kind: StructuredImageKind,
    timeout: Duration,
) -> Result<serde_json::Value, ArtifactError> {
    let bytes = fetch_artifact_bytes(blob_root, artifact).await.unwrap_or_default();
    let image = ImageData::new(STANDARD.encode(&bytes), artifact.mime.clone()).with_detail("high");
    let messages = vec![
        ChatMessage::system(structured_data_prompt(kind)),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = CompletionOptions { temperature: Some(0.0), max_tokens: Some(1536), ..Default::default() };

    let raw = call_with_retry(provider, &messages, &options, timeout, 1, 300).await?;
    parse_json_response(&raw).map_err(|snippet| ArtifactError::ExtractionParseError { snippet })
}

/// Retry loop shared by both vision calls: connect/5xx errors are transient
/// and retried with exponential backoff; JSON-parse failures are a model
/// output problem, not a transport problem, and are surfaced directly by
/// the caller instead.
async fn call_with_retry(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    options: &CompletionOptions,
    timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> Result<String, ArtifactError> {
    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            sleep(Duration::from_millis(retry_backoff_ms * 2u64.pow(attempt - 1))).await;
        }
        match tokio::time::timeout(timeout, provider.chat(messages, Some(options))).await {
            Ok(Ok(response)) => return Ok(response.content),
            Ok(Err(e)) => last_err = Some(e.to_string()),
            Err(_) => return Err(ArtifactError::ExtractionTimeout { secs: timeout.as_secs() }),
        }
    }
    Err(ArtifactError::EnrichmentFailed { detail: last_err.unwrap_or_else(|| "unknown error".to_string()) })
}

fn build_embedding_candidate(ocr_text: &str, surrounding_text: &str, structured_data: Option<&serde_json::Value>) -> String {
    let structured_json = structured_data.map(|v| v.to_string()).unwrap_or_default();
    let combined = format!("{ocr_text}\n{surrounding_text}\n{structured_json}");
    combined.chars().take(EMBEDDING_CANDIDATE_LIMIT).collect()
}

async fn fetch_artifact_bytes(blob_root: &std::path::Path, artifact: &ImageArtifact) -> Option<Vec<u8>> {
    if artifact.blob_ref.is_empty() {
        return None;
    }
    tokio::fs::read(blob_root.join(&artifact.blob_ref)).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_candidate_is_clamped() {
        let ocr = "a".repeat(3000);
        let candidate = build_embedding_candidate(&ocr, "", None);
        assert_eq!(candidate.chars().count(), EMBEDDING_CANDIDATE_LIMIT);
    }

    #[test]
    fn embedding_candidate_includes_structured_data() {
        let data = serde_json::json!({"chart_type": "bar"});
        let candidate = build_embedding_candidate("text", "more", Some(&data));
        assert!(candidate.contains("bar"));
    }
}
