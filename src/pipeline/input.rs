//! Input resolution: turn an uploaded file or a remote URL into document
//! bytes ready for classification.
//!
//! Unlike a CLI tool, the server never sees a local path — callers hand over
//! either multipart bytes directly or a URL to fetch. Either way the result
//! is the same shape so the rest of the pipeline doesn't care which path was
//! taken.

use crate::error::PipelineError;
use tracing::{debug, info};

const MAGIC_PDF: &[u8; 4] = b"%PDF";

/// Document bytes plus the filename they arrived under, ready to hand to
/// the classifier.
#[derive(Debug)]
pub struct ResolvedInput {
    pub bytes: Vec<u8>,
    pub filename: String,
}

/// Check if the input string looks like a URL rather than a bare filename.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Validate bytes uploaded directly via multipart. Rejects empty uploads;
/// a declared PDF mime with a bad magic number is rejected too, since
/// decoding it downstream would only produce a less legible error.
pub fn resolve_uploaded(
    bytes: Vec<u8>,
    filename: String,
    declared_mime: &str,
) -> Result<ResolvedInput, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InputInvalid);
    }
    if declared_mime == "application/pdf" && !looks_like_pdf(&bytes) {
        return Err(PipelineError::InputInvalid);
    }
    debug!(filename, size = bytes.len(), "resolved uploaded input");
    Ok(ResolvedInput { bytes, filename })
}

/// Download a URL and return its bytes, applying the same magic-byte check
/// as an upload whenever the response declares a PDF content type.
pub async fn resolve_from_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, PipelineError> {
    info!(url, "downloading document from url");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::Internal(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::Internal(format!("download of '{url}' timed out after {timeout_secs}s"))
        } else {
            PipelineError::Internal(format!("download of '{url}' failed: {e}"))
        }
    })?;

    if !response.status().is_success() {
        return Err(PipelineError::Internal(format!(
            "download of '{url}' returned HTTP {}",
            response.status()
        )));
    }

    let is_pdf_declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/pdf"))
        .unwrap_or(false);
    let filename = extract_filename(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::Internal(format!("reading body of '{url}' failed: {e}")))?
        .to_vec();

    if bytes.is_empty() {
        return Err(PipelineError::InputInvalid);
    }
    if is_pdf_declared && !looks_like_pdf(&bytes) {
        return Err(PipelineError::InputInvalid);
    }

    info!(url, size = bytes.len(), "downloaded document");
    Ok(ResolvedInput { bytes, filename })
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == MAGIC_PDF
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
