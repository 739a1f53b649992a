//! Document decoder: classifies raw input bytes into an
//! [`InputClass`] and a prioritised [`StrategyPlan`] before any engine is
//! invoked. CPU-bound pdfium access runs inside `spawn_blocking`, mirroring
//! how page rasterisation is isolated in [`crate::pipeline::images`].

use crate::error::PipelineError;
use crate::model::InputClass;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

/// Ordered engine names a [`crate::pipeline::layout`] call should try, most
/// preferred first. File-size-aware gates are applied by the caller, not
/// baked into the plan, since they depend on which engines are registered.
#[derive(Debug, Clone)]
pub struct StrategyPlan {
    pub engines: Vec<&'static str>,
    pub skip_heavy_engines: bool,
}

const MAX_LIGHT_ENGINE_BYTES: u64 = 100 * 1024 * 1024;

/// Classify a PDF by sampling its first `min(3, n)` pages.
///
/// `first-match-wins`: the threshold bands are checked in a fixed order,
/// and the first one that matches decides the class.
pub async fn classify(bytes: &[u8], size_bytes: u64) -> Result<(InputClass, StrategyPlan), PipelineError> {
    let owned = bytes.to_vec();
    let sample = tokio::task::spawn_blocking(move || classify_blocking(&owned))
        .await
        .map_err(|e| PipelineError::Internal(format!("decode task panicked: {e}")))??;

    let class = classify_from_sample(sample.chars, sample.images, sample.sample_pages);
    let plan = strategy_for(class, size_bytes);
    Ok((class, plan))
}

struct Sample {
    chars: usize,
    images: usize,
    sample_pages: usize,
}

fn classify_blocking(bytes: &[u8]) -> Result<Sample, PipelineError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| PipelineError::DecodeFailed(format!("{e:?}")))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let sample_pages = total.min(3);

    let mut chars = 0usize;
    let mut images = 0usize;
    for idx in 0..sample_pages {
        let page = match pages.get(idx as u16) {
            Ok(p) => p,
            Err(e) => {
                warn!("decode: failed to open page {idx}: {e:?}");
                continue;
            }
        };
        if let Ok(text) = page.text() {
            chars += text.all().chars().count();
        }
        images += page.objects().iter().filter(|o| o.as_image_object().is_some()).count();
    }

    debug!(chars, images, sample_pages, "document decoder sample");
    Ok(Sample { chars, images, sample_pages: sample_pages.max(1) })
}

fn classify_from_sample(chars: usize, images: usize, sample_pages: usize) -> InputClass {
    let avg_images_per_page = images as f64 / sample_pages as f64;

    if chars > 8000 {
        InputClass::TextPdf
    } else if chars > 3000 && avg_images_per_page > 2.0 {
        InputClass::Mixed
    } else if chars > 3000 {
        InputClass::TextPdf
    } else if chars > 500 && images > sample_pages {
        InputClass::Mixed
    } else if chars > 500 {
        InputClass::TextPdf
    } else if images > 0 {
        InputClass::ScannedPdf
    } else {
        InputClass::Unknown
    }
}

fn strategy_for(class: InputClass, size_bytes: u64) -> StrategyPlan {
    let skip_heavy_engines = size_bytes > MAX_LIGHT_ENGINE_BYTES;
    let engines: Vec<&'static str> = match class {
        InputClass::TextPdf => vec!["layout_native", "layout_remote", "text_only_pdf"],
        InputClass::Mixed => vec!["layout_native", "layout_remote", "ocr_fast", "ocr_thorough"],
        InputClass::ScannedPdf | InputClass::Image => vec!["ocr_fast", "ocr_thorough"],
        InputClass::Office => vec!["layout_remote", "text_only_pdf"],
        InputClass::Unknown => vec!["layout_native", "layout_remote", "text_only_pdf", "ocr_fast"],
    };
    StrategyPlan { engines, skip_heavy_engines }
}

/// Classify input that is not a PDF at all (declared image MIME routes
/// straight to vision-OCR).
pub fn classify_non_pdf(declared_mime: &str) -> (InputClass, StrategyPlan) {
    if declared_mime.starts_with("image/") {
        (InputClass::Image, StrategyPlan { engines: vec!["ocr_fast", "ocr_thorough"], skip_heavy_engines: false })
    } else {
        (InputClass::Office, StrategyPlan { engines: vec!["layout_remote", "text_only_pdf"], skip_heavy_engines: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_char_count_wins_regardless_of_images() {
        assert_eq!(classify_from_sample(9000, 50, 3), InputClass::TextPdf);
    }

    #[test]
    fn mixed_requires_more_than_two_images_per_page_on_average() {
        assert_eq!(classify_from_sample(4000, 7, 3), InputClass::Mixed);
        assert_eq!(classify_from_sample(4000, 6, 3), InputClass::TextPdf);
    }

    #[test]
    fn low_band_mixed_needs_images_over_sample_pages() {
        assert_eq!(classify_from_sample(600, 4, 3), InputClass::Mixed);
        assert_eq!(classify_from_sample(600, 3, 3), InputClass::TextPdf);
    }

    #[test]
    fn scanned_when_only_images_present() {
        assert_eq!(classify_from_sample(10, 2, 3), InputClass::ScannedPdf);
    }

    #[test]
    fn unknown_when_nothing_extracted() {
        assert_eq!(classify_from_sample(0, 0, 3), InputClass::Unknown);
    }

    #[test]
    fn classify_is_deterministic_for_fixed_sample() {
        let a = classify_from_sample(1200, 1, 3);
        let b = classify_from_sample(1200, 1, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn non_pdf_image_routes_to_ocr() {
        let (class, plan) = classify_non_pdf("image/png");
        assert_eq!(class, InputClass::Image);
        assert_eq!(plan.engines.first(), Some(&"ocr_fast"));
    }

    #[test]
    fn large_file_skips_heavy_engines() {
        let plan = strategy_for(InputClass::TextPdf, 200 * 1024 * 1024);
        assert!(plan.skip_heavy_engines);
    }
}
