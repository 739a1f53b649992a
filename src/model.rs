//! Data model shared by every pipeline stage.
//!
//! Records are produced by one component and consumed read-only by the
//! next; nothing past [`DocumentRecord::new`] mutates the document's
//! identity or page sequence. Enrichment fields on [`ImageArtifact`] are the
//! one place where a record is legitimately updated in place after
//! publication, and only by overwriting `None` with `Some`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an input was classified by the document decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputClass {
    TextPdf,
    ScannedPdf,
    Mixed,
    Image,
    Office,
    Unknown,
}

/// Layout-detection category, normalised from whichever engine produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutCategory {
    Text,
    Title,
    Formula,
    Table,
    Figure,
    Image,
}

impl LayoutCategory {
    /// Normalise an engine-specific category id (see component design for the table).
    pub fn from_engine_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Image),
            3 => Some(Self::Figure),
            5 => Some(Self::Table),
            7 => Some(Self::Title),
            13 => Some(Self::Formula),
            14 => Some(Self::Text),
            _ => None,
        }
    }

    /// True for categories the image materialiser crops as regions.
    pub fn is_croppable(self) -> bool {
        matches!(self, Self::Image | Self::Figure | Self::Table)
    }
}

/// Normalised bounding box in page-local coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutDetection {
    pub category: LayoutCategory,
    pub bbox: BoundingBox,
    pub content: Option<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-indexed page number.
    pub page_number: usize,
    pub text: String,
    pub detections: Vec<LayoutDetection>,
}

/// Where an [`ImageArtifact`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    /// Extracted directly from the PDF's embedded object stream.
    Embedded,
    /// Cropped from a rendered page raster by a detection's bounding box.
    Region,
}

/// Processing provenance recorded on a [`DocumentRecord`] by the layout extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub engine: String,
    pub device: String,
    pub language: String,
    pub wall_clock_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub filename: String,
    pub size_bytes: u64,
    pub declared_mime: String,
    pub input_class: InputClass,
    pub pages: Vec<PageRecord>,
    pub markdown: String,
    pub formula_count: usize,
    pub table_count: usize,
    pub image_region_count: usize,
    pub embedded_image_count: usize,
    pub provenance: Provenance,
}

impl DocumentRecord {
    pub fn new(filename: impl Into<String>, size_bytes: u64, declared_mime: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            size_bytes,
            declared_mime: declared_mime.into(),
            input_class: InputClass::Unknown,
            pages: Vec::new(),
            markdown: String::new(),
            formula_count: 0,
            table_count: 0,
            image_region_count: 0,
            embedded_image_count: 0,
            provenance: Provenance::default(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Per-type vision-model structured-data payload (chart axes/series, table
/// headers/rows, diagram components/connections). Kept as `serde_json::Value`
/// since the shape is determined by `classification_tag`, not a fixed schema.
pub type StructuredData = serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page_number: Option<usize>,
    pub image_index: usize,
    pub origin: ImageOrigin,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub byte_len: u64,
    pub content_hash: String,
    pub blob_ref: String,

    pub ocr_text: Option<String>,
    pub description: Option<String>,
    pub classification_tag: Option<String>,
    pub classification_confidence: Option<f32>,
    pub structured_data: Option<StructuredData>,
    pub embedding: Option<Vec<f64>>,
    pub embedding_generated: bool,
    pub enriched_at: Option<chrono::DateTime<chrono::Utc>>,
    pub enrichment_error: Option<crate::error::ArtifactError>,
}

impl ImageArtifact {
    pub fn new(
        document_id: Uuid,
        page_number: Option<usize>,
        image_index: usize,
        origin: ImageOrigin,
        mime: impl Into<String>,
        width: u32,
        height: u32,
        bytes: &[u8],
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            page_number,
            image_index,
            origin,
            mime: mime.into(),
            width,
            height,
            byte_len: bytes.len() as u64,
            content_hash: crate::pipeline::blob::content_hash(bytes),
            blob_ref: String::new(),
            ocr_text: None,
            description: None,
            classification_tag: None,
            classification_confidence: None,
            structured_data: None,
            embedding: None,
            embedding_generated: false,
            enriched_at: None,
            enrichment_error: None,
        }
    }

    /// Key an artifact is deduplicated and addressed by: page, index within
    /// the page, and origin must together be unique for a given document.
    pub fn identity_key(&self) -> (Option<usize>, usize, ImageOrigin) {
        (self.page_number, self.image_index, self.origin)
    }
}

/// A single named value a template asks the extractor to fill in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub children: Vec<TemplateVariable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Bool,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateParameters {
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub strict_schema: bool,
}

fn default_max_text_length() -> usize {
    8000
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_output_tokens() -> usize {
    2048
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for TemplateParameters {
    fn default() -> Self {
        Self {
            max_text_length: default_max_text_length(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
            strict_schema: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionTemplate {
    pub id: String,
    pub name: String,
    pub category: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub variables: Vec<TemplateVariable>,
    #[serde(default)]
    pub parameters: TemplateParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub template_id: String,
    pub provider: String,
    pub model: String,
    pub wall_clock_ms: u64,
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<crate::error::ArtifactError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_category_normalises_known_ids() {
        assert_eq!(LayoutCategory::from_engine_id(0), Some(LayoutCategory::Image));
        assert_eq!(LayoutCategory::from_engine_id(13), Some(LayoutCategory::Formula));
        assert_eq!(LayoutCategory::from_engine_id(99), None);
    }

    #[test]
    fn croppable_categories() {
        assert!(LayoutCategory::Table.is_croppable());
        assert!(!LayoutCategory::Text.is_croppable());
    }

    #[test]
    fn identity_key_distinguishes_origin() {
        let doc_id = Uuid::new_v4();
        let a = ImageArtifact::new(doc_id, Some(1), 0, ImageOrigin::Embedded, "image/png", 10, 10, b"abc");
        let b = ImageArtifact::new(doc_id, Some(1), 0, ImageOrigin::Region, "image/png", 10, 10, b"abc");
        assert_ne!(a.identity_key(), b.identity_key());
    }
}
