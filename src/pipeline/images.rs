//! Image materialiser: merges embedded PDF images with region crops taken
//! from rendered page rasters into a single ordered stream, assigning
//! stable, dense per-page indices. Page rasterisation reuses the
//! spawn_blocking isolation pdfium requires everywhere else in this crate —
//! the library wraps a C++ implementation with thread-local state and is
//! not safe to call from an async context.

use crate::model::{BoundingBox, ImageArtifact, ImageOrigin, LayoutCategory, PageRecord};
use image::{DynamicImage, GenericImageView};
use pdfium_render::prelude::*;
use std::io::Cursor;
use uuid::Uuid;

const RENDER_SCALE: f32 = 2.0;

struct PendingCrop {
    page_number: usize,
    bbox: BoundingBox,
    top: f32,
}

/// Build the ordered image stream for a document: every embedded image,
/// plus a crop for every croppable detection on every page, sorted into
/// reading order (top-to-bottom, left tiebreak) with dense 0-based indices
/// assigned per page. Returns each artifact alongside its encoded bytes so
/// the blob store stage can persist them without re-deriving content.
pub fn materialise_with_bytes(
    document_id: Uuid,
    pdf_bytes: &[u8],
    pages: &[PageRecord],
    embedded_images: Vec<(Option<usize>, String, Vec<u8>)>,
) -> Result<Vec<(ImageArtifact, Vec<u8>)>, crate::error::PipelineError> {
    let mut out = Vec::new();

    let mut per_page_embedded: std::collections::HashMap<Option<usize>, Vec<(String, Vec<u8>)>> =
        std::collections::HashMap::new();
    for (page_number, mime, bytes) in embedded_images {
        per_page_embedded.entry(page_number).or_default().push((mime, bytes));
    }
    for (page, items) in per_page_embedded {
        for (index, (mime, bytes)) in items.into_iter().enumerate() {
            let (w, h) = png_or_source_dims(&bytes).unwrap_or((0, 0));
            let artifact = ImageArtifact::new(document_id, page, index, ImageOrigin::Embedded, mime, w, h, &bytes);
            out.push((artifact, bytes));
        }
    }

    let pending: Vec<PendingCrop> = pages
        .iter()
        .flat_map(|p| {
            p.detections.iter().filter(|d| d.category.is_croppable()).map(move |d| PendingCrop {
                page_number: p.page_number,
                bbox: d.bbox,
                top: d.bbox.y0,
            })
        })
        .collect();

    if !pending.is_empty() {
        let rendered = render_pages_for_crops(pdf_bytes, &pending)?;
        let mut by_page: std::collections::HashMap<usize, Vec<&PendingCrop>> = std::collections::HashMap::new();
        for crop in &pending {
            by_page.entry(crop.page_number).or_default().push(crop);
        }
        for (page_number, mut crops) in by_page {
            crops.sort_by(|a, b| a.top.partial_cmp(&b.top).unwrap().then(a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap()));
            let base_index = out.iter().filter(|(a, _)| a.page_number == Some(page_number)).count();
            for (offset, crop) in crops.into_iter().enumerate() {
                if let Some(raster) = rendered.get(&page_number) {
                    let cropped = crop_region(raster, crop.bbox, RENDER_SCALE);
                    let png_bytes = encode_png(&cropped);
                    let artifact = ImageArtifact::new(
                        document_id,
                        Some(page_number),
                        base_index + offset,
                        ImageOrigin::Region,
                        "image/png",
                        cropped.width(),
                        cropped.height(),
                        &png_bytes,
                    );
                    out.push((artifact, png_bytes));
                }
            }
        }
    }

    Ok(out)
}

fn render_pages_for_crops(
    pdf_bytes: &[u8],
    pending: &[PendingCrop],
) -> Result<std::collections::HashMap<usize, DynamicImage>, crate::error::PipelineError> {
    let page_numbers: std::collections::HashSet<usize> = pending.iter().map(|c| c.page_number).collect();
    let owned = pdf_bytes.to_vec();
    let numbers: Vec<usize> = page_numbers.into_iter().collect();

    render_pages_blocking(&owned, &numbers)
}

fn render_pages_blocking(
    pdf_bytes: &[u8],
    page_numbers: &[usize],
) -> Result<std::collections::HashMap<usize, DynamicImage>, crate::error::PipelineError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| crate::error::PipelineError::DecodeFailed(format!("{e:?}")))?;

    let pages = document.pages();

    let mut out = std::collections::HashMap::new();
    for &page_number in page_numbers {
        let idx = page_number.saturating_sub(1) as u16;
        let page = match pages.get(idx) {
            Ok(p) => p,
            Err(_) => continue,
        };
        // Target size is the page's own native point size times RENDER_SCALE,
        // not a fixed pixel cap, so crop_region's bbox * RENDER_SCALE lines
        // up with the actual raster regardless of the page's physical size.
        let width = (page.width().value * RENDER_SCALE) as i32;
        let height = (page.height().value * RENDER_SCALE) as i32;
        let render_config = PdfRenderConfig::new().set_target_width(width).set_target_height(height);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| crate::error::PipelineError::DecodeFailed(format!("{e:?}")))?;
        out.insert(page_number, bitmap.as_image());
    }
    Ok(out)
}

fn crop_region(raster: &DynamicImage, bbox: BoundingBox, scale: f32) -> DynamicImage {
    let (w, h) = raster.dimensions();
    let x0 = (bbox.x0 * scale).clamp(0.0, w as f32) as u32;
    let y0 = (bbox.y0 * scale).clamp(0.0, h as f32) as u32;
    let x1 = (bbox.x1 * scale).clamp(0.0, w as f32) as u32;
    let y1 = (bbox.y1 * scale).clamp(0.0, h as f32) as u32;
    let crop_w = x1.saturating_sub(x0).max(1).min(w - x0.min(w - 1));
    let crop_h = y1.saturating_sub(y0).max(1).min(h - y0.min(h - 1));
    raster.crop_imm(x0, y0, crop_w, crop_h)
}

fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("PNG encoding into an in-memory buffer cannot fail");
    buf.into_inner()
}

fn png_or_source_dims(bytes: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory(bytes).ok().map(|img| img.dimensions())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_region_clamps_to_raster_bounds() {
        let img = DynamicImage::new_rgb8(100, 100);
        let bbox = BoundingBox { x0: 40.0, y0: 40.0, x1: 1000.0, y1: 1000.0 };
        let cropped = crop_region(&img, bbox, 1.0);
        assert!(cropped.width() <= 100 && cropped.height() <= 100);
    }

    #[test]
    fn materialise_with_bytes_produces_no_artifacts_for_empty_document() {
        let doc_id = Uuid::new_v4();
        let out = materialise_with_bytes(doc_id, &[], &[], vec![]).unwrap();
        assert!(out.is_empty());
    }
}
