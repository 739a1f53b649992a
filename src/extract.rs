//! Structured extractor: renders a template against document text and asks
//! a configured LLM provider to fill it in as JSON.
//!
//! Provider names exposed to callers (`local`, `cloud_a`, `cloud_b`) are a
//! fixed alias layer over whatever concrete provider backs each slot, so
//! callers never need to know the difference between Ollama and OpenAI.

use crate::error::{ArtifactError, PipelineError};
use crate::jsonparse::{normalise_nulls, parse_json_response};
use crate::model::{ExtractionResult, ExtractionTemplate, VariableType};
use crate::templates::{inline_template, render, TemplateRegistry};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed alias -> concrete provider/model mapping.
const PROVIDER_ALIASES: &[(&str, &str, &str)] = &[
    ("local", "ollama", "llama3.1"),
    ("cloud_a", "openai", "gpt-4.1-nano"),
    ("cloud_b", "anthropic", "claude-3-5-haiku-20241022"),
];

/// One entry per alias, reporting whether its backing credentials/endpoint
/// are present in the environment.
pub struct ProviderInfo {
    pub alias: String,
    pub configured: bool,
}

pub fn list_providers() -> Vec<ProviderInfo> {
    PROVIDER_ALIASES
        .iter()
        .map(|(alias, concrete, _)| ProviderInfo { alias: alias.to_string(), configured: is_configured(concrete) })
        .collect()
}

pub(crate) fn is_configured(concrete_provider: &str) -> bool {
    match concrete_provider {
        "openai" => std::env::var("OPENAI_API_KEY").map(|v| !v.is_empty()).unwrap_or(false),
        "anthropic" => std::env::var("ANTHROPIC_API_KEY").map(|v| !v.is_empty()).unwrap_or(false),
        "ollama" => true,
        _ => false,
    }
}

/// Exposed to [`crate::orchestrator`] so vision enrichment resolves the same
/// alias -> concrete-provider/default-model mapping as structured extraction,
/// instead of re-deriving it.
pub(crate) fn resolve_alias(alias: &str) -> Option<(&'static str, &'static str)> {
    PROVIDER_ALIASES
        .iter()
        .find(|(a, _, _)| *a == alias)
        .map(|(_, concrete, default_model)| (*concrete, *default_model))
}

fn resolve_provider(alias: &str, model: Option<&str>) -> Result<(Arc<dyn LLMProvider>, String), PipelineError> {
    let (concrete, default_model) =
        resolve_alias(alias).ok_or_else(|| PipelineError::ProviderNotConfigured { provider: alias.to_string() })?;
    if !is_configured(concrete) {
        return Err(PipelineError::ProviderNotConfigured { provider: alias.to_string() });
    }
    let model = model.unwrap_or(default_model).to_string();
    let provider = ProviderFactory::create_llm_provider(concrete, &model)
        .map_err(|e| PipelineError::ProviderNotConfigured { provider: format!("{alias}: {e}") })?;
    Ok((provider, model))
}

/// What to extract: either a registered template by id, or the deprecated
/// inline variable list.
pub enum ExtractionRequest {
    Named { template_id: String },
    Inline { variables: Vec<(String, String, VariableType)> },
}

#[derive(Default)]
pub struct ExtractionOverrides {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub max_text_length: Option<usize>,
    pub timeout_secs: Option<u64>,
}

pub async fn extract(
    registry: &TemplateRegistry,
    request: ExtractionRequest,
    text: &str,
    provider_alias: &str,
    model: Option<&str>,
    overrides: ExtractionOverrides,
) -> Result<ExtractionResult, PipelineError> {
    let template: ExtractionTemplate = match request {
        ExtractionRequest::Named { template_id } => {
            registry.get(&template_id).cloned().ok_or(PipelineError::TemplateNotFound(template_id))?
        }
        ExtractionRequest::Inline { variables } => inline_template(variables),
    };

    let (provider, resolved_model) = resolve_provider(provider_alias, model)?;
    let rendered = render(&template, text, overrides.max_text_length);

    let temperature = overrides.temperature.unwrap_or(rendered.effective_params.temperature);
    let max_tokens = overrides.max_tokens.unwrap_or(rendered.effective_params.max_output_tokens);
    let timeout = Duration::from_secs(overrides.timeout_secs.unwrap_or(rendered.effective_params.timeout_secs));

    let messages = vec![ChatMessage::system(rendered.system_prompt), ChatMessage::user(rendered.user_prompt)];
    let options = CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens as usize),
        ..Default::default()
    };

    let started = Instant::now();
    let outcome = run_completion(&provider, &messages, &options, timeout).await;
    let wall_clock_ms = started.elapsed().as_millis() as u64;

    let (success, data, error) = match outcome {
        Ok(raw) => match parse_json_response(&raw) {
            Ok(value) => {
                let value = if rendered.effective_params.strict_schema { coerce_strict(value, &template) } else { Ok(value) };
                match value {
                    Ok(v) => (true, Some(v), None),
                    Err(e) => (false, None, Some(e)),
                }
            }
            Err(snippet) => (false, None, Some(ArtifactError::ExtractionParseError { snippet })),
        },
        Err(e) => (false, None, Some(e)),
    };

    Ok(ExtractionResult { template_id: template.id, provider: provider_alias.to_string(), model: resolved_model, wall_clock_ms, success, data, error })
}

async fn run_completion(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    options: &CompletionOptions,
    timeout: Duration,
) -> Result<String, ArtifactError> {
    match tokio::time::timeout(timeout, provider.chat(messages, Some(options))).await {
        Ok(Ok(response)) => Ok(response.content),
        Ok(Err(e)) => Err(ArtifactError::EnrichmentFailed { detail: e.to_string() }),
        Err(_) => Err(ArtifactError::ExtractionTimeout { secs: timeout.as_secs() }),
    }
}

/// Coerce parsed JSON to the template's schema: normalise missing-value
/// strings to null, then reject any top-level key the template doesn't
/// declare.
fn coerce_strict(value: serde_json::Value, template: &ExtractionTemplate) -> Result<serde_json::Value, ArtifactError> {
    let normalised = normalise_nulls(value);
    let serde_json::Value::Object(map) = normalised else {
        return Err(ArtifactError::ExtractionRejected { reason: "response is not a JSON object".to_string() });
    };
    let known: std::collections::HashSet<&str> = template.variables.iter().map(|v| v.name.as_str()).collect();
    for key in map.keys() {
        if !known.contains(key.as_str()) {
            return Err(ArtifactError::ExtractionRejected { reason: format!("unexpected key '{key}' not declared by template") });
        }
    }
    Ok(serde_json::Value::Object(map))
}
