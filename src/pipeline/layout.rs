//! Layout extractor: tries each engine in the decoder's strategy plan, in
//! order, stopping at the first well-formed result. Transport is a
//! multipart upload of the raw document bytes plus device/language form
//! fields.

use crate::decode::StrategyPlan;
use crate::error::PipelineError;
use crate::model::{BoundingBox, DocumentRecord, InputClass, LayoutCategory, LayoutDetection, PageRecord, Provenance};
use crate::registry::{BackendRegistry, Capability};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Raw per-detection shape returned by a layout/OCR engine, before category
/// normalisation maps `raw_category` to [`LayoutCategory`].
#[derive(Debug, Deserialize)]
struct RawDetection {
    raw_category: u32,
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    content: Option<String>,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    page_number: usize,
    text: String,
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawEmbeddedImage {
    page_number: Option<usize>,
    mime: String,
    data_base64: String,
}

#[derive(Debug, Deserialize)]
struct RawLayoutResponse {
    pages: Vec<RawPage>,
    embedded_images: Vec<RawEmbeddedImage>,
    formula_count: usize,
    table_count: usize,
}

#[derive(Debug)]
pub struct LayoutOutput {
    pub document: DocumentRecord,
    pub embedded_images: Vec<(Option<usize>, String, Vec<u8>)>,
}

/// Run the strategy plan against the registered `layout-extraction`
/// backends, falling back to the next engine on failure. Exhaustion of the
/// plan is a fatal [`PipelineError::BackendUnavailable`].
pub async fn extract(
    http: &reqwest::Client,
    registry: &Arc<BackendRegistry>,
    plan: &StrategyPlan,
    bytes: &[u8],
    filename: &str,
    input_class: InputClass,
    device: &str,
    lang: &str,
    timeout: Duration,
) -> Result<LayoutOutput, PipelineError> {
    let base_url = registry
        .resolve("layout")
        .await
        .ok_or(PipelineError::BackendUnavailable { capability: "layout-extraction".into() })?;

    if !registry.is_available(Capability::LayoutExtraction).await {
        return Err(PipelineError::BackendUnavailable { capability: "layout-extraction".into() });
    }

    let mut last_err = None;
    for engine in &plan.engines {
        if plan.skip_heavy_engines && is_heavy_engine(engine) {
            info!(engine, "skipping heavy engine for large input");
            continue;
        }
        let started = Instant::now();
        match call_engine(http, &base_url, engine, bytes, filename, device, lang, timeout).await {
            Ok(raw) => {
                let wall_clock_ms = started.elapsed().as_millis() as u64;
                let output = normalise(raw, filename, bytes.len() as u64, input_class, engine, device, lang, wall_clock_ms);
                return Ok(output);
            }
            Err(e) => {
                warn!(engine, error = %e, "layout engine failed, trying next");
                registry.mark_degraded("layout").await;
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or(PipelineError::BackendUnavailable { capability: "layout-extraction".into() }))
}

fn is_heavy_engine(engine: &str) -> bool {
    matches!(engine, "ocr_thorough" | "layout_remote")
}

async fn call_engine(
    http: &reqwest::Client,
    base_url: &str,
    engine: &str,
    bytes: &[u8],
    filename: &str,
    device: &str,
    lang: &str,
    timeout: Duration,
) -> Result<RawLayoutResponse, PipelineError> {
    let form = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string()))
        .text("engine", engine.to_string())
        .text("device", device.to_string())
        .text("language", lang.to_string())
        .text("enable_formulas", "true")
        .text("enable_tables", "true");

    let url = format!("{}/extract", base_url.trim_end_matches('/'));
    let response = tokio::time::timeout(timeout, http.post(&url).multipart(form).send())
        .await
        .map_err(|_| PipelineError::EngineFailed { engine: engine.to_string(), detail: "timed out".into() })?
        .map_err(|e| PipelineError::EngineFailed { engine: engine.to_string(), detail: e.to_string() })?;

    if !response.status().is_success() {
        return Err(PipelineError::EngineFailed {
            engine: engine.to_string(),
            detail: format!("http {}", response.status()),
        });
    }

    response
        .json::<RawLayoutResponse>()
        .await
        .map_err(|e| PipelineError::EngineFailed { engine: engine.to_string(), detail: format!("bad response body: {e}") })
}

fn normalise(
    raw: RawLayoutResponse,
    filename: &str,
    size_bytes: u64,
    input_class: InputClass,
    engine: &str,
    device: &str,
    lang: &str,
    wall_clock_ms: u64,
) -> LayoutOutput {
    let mut document = DocumentRecord::new(filename, size_bytes, "application/pdf");
    document.input_class = input_class;
    document.formula_count = raw.formula_count;
    document.table_count = raw.table_count;
    document.provenance = Provenance {
        engine: engine.to_string(),
        device: device.to_string(),
        language: lang.to_string(),
        wall_clock_ms,
    };

    let mut markdown_parts = Vec::with_capacity(raw.pages.len());
    let mut image_region_count = 0usize;

    for page in raw.pages {
        let detections = page
            .detections
            .into_iter()
            .filter_map(|d| {
                let category = LayoutCategory::from_engine_id(d.raw_category)?;
                if category.is_croppable() {
                    image_region_count += 1;
                }
                Some(LayoutDetection {
                    category,
                    bbox: BoundingBox { x0: d.x0, y0: d.y0, x1: d.x1, y1: d.y1 },
                    content: d.content,
                    confidence: d.confidence,
                })
            })
            .collect();

        markdown_parts.push(page.text.clone());
        document.pages.push(PageRecord { page_number: page.page_number, text: page.text, detections });
    }

    document.markdown = markdown_parts.join("\n\n");
    document.image_region_count = image_region_count;
    document.embedded_image_count = raw.embedded_images.len();

    let embedded_images = raw
        .embedded_images
        .into_iter()
        .filter_map(|img| {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.decode(&img.data_base64).ok().map(|bytes| (img.page_number, img.mime, bytes))
        })
        .collect();

    LayoutOutput { document, embedded_images }
}
