//! Template loader: loads extraction templates from a directory into an
//! in-memory registry at startup, validates them, and renders prompts.
//!
//! Templates are user-authored JSON files; validation happens once at load
//! time so a malformed template fails fast at startup rather than mid-request.

use crate::error::PipelineError;
use crate::model::{ExtractionTemplate, TemplateVariable, VariableType};
use crate::prompts::render_user_prompt;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const MAX_VARIABLE_DEPTH: usize = 8;

pub struct TemplateRegistry {
    templates: HashMap<String, ExtractionTemplate>,
}

impl TemplateRegistry {
    /// Load every `*.json` file in `dir`. A directory that doesn't exist
    /// yields an empty registry rather than an error, since a deployment
    /// with no templates configured is valid — only `extract-structured`
    /// calls naming a template will fail.
    pub async fn load_dir(dir: &Path) -> Result<Self, PipelineError> {
        let mut templates = HashMap::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(_) => {
                warn!(dir = %dir.display(), "templates directory not found, starting with an empty registry");
                return Ok(Self { templates });
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| PipelineError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
            let template: ExtractionTemplate = serde_json::from_str(&raw).map_err(|e| {
                PipelineError::TemplateInvalid { id: path.display().to_string(), detail: e.to_string() }
            })?;
            validate(&template)?;
            info!(id = %template.id, path = %path.display(), "loaded extraction template");
            templates.insert(template.id.clone(), template);
        }

        Ok(Self { templates })
    }

    pub fn get(&self, id: &str) -> Option<&ExtractionTemplate> {
        self.templates.get(id)
    }

    pub fn list(&self) -> Vec<&ExtractionTemplate> {
        self.templates.values().collect()
    }
}

fn validate(template: &ExtractionTemplate) -> Result<(), PipelineError> {
    if template.id.trim().is_empty() || template.name.trim().is_empty() {
        return Err(PipelineError::TemplateInvalid {
            id: template.id.clone(),
            detail: "id and name must be non-empty".to_string(),
        });
    }
    if template.system_prompt.trim().is_empty() || template.user_prompt_template.trim().is_empty() {
        return Err(PipelineError::TemplateInvalid {
            id: template.id.clone(),
            detail: "system_prompt and user_prompt_template must be non-empty".to_string(),
        });
    }
    validate_variables(&template.id, &template.variables, 1)
}

fn validate_variables(template_id: &str, variables: &[TemplateVariable], depth: usize) -> Result<(), PipelineError> {
    if depth > MAX_VARIABLE_DEPTH {
        return Err(PipelineError::TemplateInvalid {
            id: template_id.to_string(),
            detail: format!("variable nesting exceeds max depth {MAX_VARIABLE_DEPTH}"),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for var in variables {
        if var.name.trim().is_empty() {
            return Err(PipelineError::TemplateInvalid {
                id: template_id.to_string(),
                detail: "variable name must be non-empty".to_string(),
            });
        }
        if !seen.insert(var.name.as_str()) {
            return Err(PipelineError::TemplateInvalid {
                id: template_id.to_string(),
                detail: format!("duplicate sibling variable name '{}'", var.name),
            });
        }
        if !var.children.is_empty() && !matches!(var.var_type, VariableType::Object | VariableType::Array) {
            return Err(PipelineError::TemplateInvalid {
                id: template_id.to_string(),
                detail: format!("variable '{}' has children but type is not object/array", var.name),
            });
        }
        validate_variables(template_id, &var.children, depth + 1)?;
    }
    Ok(())
}

/// Human-readable bullet list of top-level variables, used in the rendered
/// user prompt.
fn variables_list(variables: &[TemplateVariable]) -> String {
    variables
        .iter()
        .map(|v| {
            let req = if v.required { "required" } else { "optional" };
            format!("- {} ({:?}, {}): {}", v.name, v.var_type, req, v.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// JSON-schema-shaped string built from the variable tree, used to steer
/// JSON-mode completion. Not a full JSON Schema document, just an example
/// shape the model can follow.
fn json_schema_string(variables: &[TemplateVariable]) -> String {
    fn build(vars: &[TemplateVariable]) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for v in vars {
            let value = match v.var_type {
                VariableType::String => serde_json::Value::String(format!("<{}>", v.name)),
                VariableType::Number => serde_json::Value::String("<number>".to_string()),
                VariableType::Bool => serde_json::Value::String("<true|false>".to_string()),
                VariableType::Array => serde_json::Value::Array(vec![build(&v.children)]),
                VariableType::Object => build(&v.children),
            };
            obj.insert(v.name.clone(), value);
        }
        serde_json::Value::Object(obj)
    }
    build(variables).to_string()
}

pub struct RenderedPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    pub effective_params: crate::model::TemplateParameters,
}

/// Render a template against `text`, truncated to the smaller of the
/// template's own limit and any caller-supplied override.
pub fn render(
    template: &ExtractionTemplate,
    text: &str,
    max_text_length_override: Option<usize>,
) -> RenderedPrompt {
    let limit = max_text_length_override
        .map(|o| o.min(template.parameters.max_text_length))
        .unwrap_or(template.parameters.max_text_length);
    let clamped_text: String = text.chars().take(limit).collect();

    let schema = json_schema_string(&template.variables);
    let list = variables_list(&template.variables);
    let user_prompt = render_user_prompt(&template.user_prompt_template, &list, &clamped_text, &schema);
    let system_prompt = format!("{}\n\n{}", crate::prompts::EXTRACTION_JSON_MODE_PREFIX, template.system_prompt);

    RenderedPrompt { system_prompt, user_prompt, effective_params: template.parameters.clone() }
}

/// Wrap a caller-supplied flat variable list into a throwaway template so
/// the deprecated inline-variables extraction path shares rendering and
/// coercion code with named templates instead of duplicating it.
pub fn inline_template(variables: Vec<(String, String, VariableType)>) -> ExtractionTemplate {
    ExtractionTemplate {
        id: "inline".to_string(),
        name: "inline".to_string(),
        category: "inline".to_string(),
        system_prompt: "Extract the requested fields from the document text.".to_string(),
        user_prompt_template: "Fields to extract:\n{variables_list}\n\nExpected shape:\n{json_schema}\n\nDocument text:\n{text}".to_string(),
        variables: variables
            .into_iter()
            .map(|(name, description, var_type)| TemplateVariable { name, description, var_type, required: false, children: Vec::new() })
            .collect(),
        parameters: crate::model::TemplateParameters::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TemplateParameters;

    fn sample_template() -> ExtractionTemplate {
        ExtractionTemplate {
            id: "t1".to_string(),
            name: "Test".to_string(),
            category: "general".to_string(),
            system_prompt: "You extract fields.".to_string(),
            user_prompt_template: "{variables_list}\n{json_schema}\n{text}".to_string(),
            variables: vec![TemplateVariable {
                name: "title".to_string(),
                description: "document title".to_string(),
                var_type: VariableType::String,
                required: true,
                children: Vec::new(),
            }],
            parameters: TemplateParameters::default(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_template() {
        assert!(validate(&sample_template()).is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_sibling_names() {
        let mut t = sample_template();
        t.variables.push(t.variables[0].clone());
        let err = validate(&t).unwrap_err();
        assert_eq!(err.tag(), "template_invalid");
    }

    #[test]
    fn validate_rejects_children_on_scalar_type() {
        let mut t = sample_template();
        t.variables[0].children.push(TemplateVariable {
            name: "nested".to_string(),
            description: "x".to_string(),
            var_type: VariableType::String,
            required: false,
            children: Vec::new(),
        });
        assert!(validate(&t).is_err());
    }

    #[test]
    fn validate_rejects_depth_beyond_limit() {
        let mut leaf = TemplateVariable {
            name: "leaf".to_string(),
            description: "x".to_string(),
            var_type: VariableType::String,
            required: false,
            children: Vec::new(),
        };
        for i in 0..MAX_VARIABLE_DEPTH + 1 {
            leaf = TemplateVariable {
                name: format!("level{i}"),
                description: "x".to_string(),
                var_type: VariableType::Object,
                required: false,
                children: vec![leaf],
            };
        }
        let mut t = sample_template();
        t.variables = vec![leaf];
        assert!(validate(&t).is_err());
    }

    #[test]
    fn render_clamps_text_and_substitutes_placeholders() {
        let t = sample_template();
        let rendered = render(&t, &"x".repeat(20000), None);
        assert_eq!(rendered.user_prompt.matches('x').count(), t.parameters.max_text_length);
        assert!(rendered.system_prompt.contains("JSON"));
    }

    #[test]
    fn render_honours_override_when_smaller() {
        let t = sample_template();
        let rendered = render(&t, &"x".repeat(20000), Some(10));
        assert_eq!(rendered.user_prompt.matches('x').count(), 10);
    }

    #[test]
    fn inline_template_builds_a_usable_template() {
        let t = inline_template(vec![("amount".to_string(), "total amount".to_string(), VariableType::Number)]);
        assert!(validate(&t).is_ok());
        assert_eq!(t.variables.len(), 1);
    }
}
