//! Embedding generator: calls the embeddings backend for each
//! artifact's candidate text, clamping input length and handling the
//! backend's declared dimension.

use crate::registry::BackendRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const MAX_INPUT_CHARS: usize = 2000;
const EMPTY_INPUT_SENTINEL: &str = "[no content]";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f64>,
}

pub struct EmbedOutcome {
    pub vector: Option<Vec<f64>>,
    pub generated: bool,
}

/// Produce an embedding for `text`, truncated to 2000 characters (empty
/// input is replaced by a sentinel so the backend always receives
/// non-empty text). A dimension mismatch against `expected_dim` is fatal to
/// only this artifact's embedding field, never the whole document.
pub async fn embed(
    http: &reqwest::Client,
    registry: &Arc<BackendRegistry>,
    model: &str,
    text: &str,
    expected_dim: Option<usize>,
    timeout: Duration,
) -> EmbedOutcome {
    let base_url = match registry.resolve("embeddings").await {
        Some(u) => u,
        None => {
            warn!("no embeddings backend registered");
            return EmbedOutcome { vector: None, generated: false };
        }
    };

    let clamped: String = if text.trim().is_empty() {
        EMPTY_INPUT_SENTINEL.to_string()
    } else {
        text.chars().take(MAX_INPUT_CHARS).collect()
    };

    let url = format!("{}/embeddings", base_url.trim_end_matches('/'));
    let request = EmbedRequest { model, input: &clamped };

    let result = tokio::time::timeout(timeout, http.post(&url).json(&request).send()).await;
    let response = match result {
        Ok(Ok(r)) if r.status().is_success() => r,
        Ok(Ok(r)) => {
            warn!(status = %r.status(), "embedding call returned an error status");
            return EmbedOutcome { vector: None, generated: false };
        }
        Ok(Err(e)) => {
            warn!(error = %e, "embedding call failed");
            return EmbedOutcome { vector: None, generated: false };
        }
        Err(_) => {
            warn!("embedding call timed out");
            return EmbedOutcome { vector: None, generated: false };
        }
    };

    let parsed: EmbedResponse = match response.json().await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "embedding response body was not the expected shape");
            return EmbedOutcome { vector: None, generated: false };
        }
    };

    if let Some(dim) = expected_dim {
        if parsed.embedding.len() != dim {
            warn!(got = parsed.embedding.len(), expected = dim, "embedding dimension mismatch");
            return EmbedOutcome { vector: None, generated: false };
        }
    }

    EmbedOutcome { vector: Some(parsed.embedding), generated: true }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_text_under_limit() {
        let text = "x".repeat(5000);
        let clamped: String = text.chars().take(MAX_INPUT_CHARS).collect();
        assert_eq!(clamped.chars().count(), MAX_INPUT_CHARS);
    }

    #[test]
    fn empty_sentinel_is_stable() {
        assert_eq!(EMPTY_INPUT_SENTINEL, "[no content]");
    }
}
