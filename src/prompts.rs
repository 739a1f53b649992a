//! Prompts for the vision enricher and structured extractor.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing default behaviour (e.g. the
//!    JSON fields the vision model is asked for) requires editing exactly
//!    one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without spinning up a real LLM, making prompt regressions easy to
//!    catch.

/// Fixed prompt for the vision enricher's first call: OCR plus
/// classification, always requested as JSON.
pub const VISION_OCR_CLASSIFY_PROMPT: &str = r#"Examine this image extracted from a technical document. Respond with a single JSON object and nothing else:

{
  "ocr_text": "<all legible text in the image, empty string if none>",
  "image_type": "<one of: chart, table, diagram, photo, screenshot, other>",
  "subtype": "<finer-grained type, e.g. 'bar_chart', 'line_chart', 'flowchart'>",
  "confidence": <0.0-1.0>,
  "key_elements": ["<short phrase>", ...],
  "technical_domain": "<e.g. 'medical', 'finance', 'engineering', 'general'>"
}

Do not wrap the JSON in markdown fences. Do not add commentary."#;

/// Structured-data prompt for `image_type = chart`.
pub const CHART_DATA_PROMPT: &str = r#"This image is a chart. Extract its data as a single JSON object:

{
  "chart_type": "<bar|line|pie|scatter|other>",
  "title": "<chart title or empty string>",
  "axes": {"x": "<x axis label>", "y": "<y axis label>"},
  "series": [{"name": "<series name>", "values": [<numbers>]}]
}

Do not wrap the JSON in markdown fences. Do not add commentary."#;

/// Structured-data prompt for `image_type = table`.
pub const TABLE_DATA_PROMPT: &str = r#"This image is a table. Extract its contents as a single JSON object:

{
  "headers": ["<column name>", ...],
  "rows": [["<cell>", ...], ...]
}

Preserve every row in reading order. Do not wrap the JSON in markdown fences. Do not add commentary."#;

/// Structured-data prompt for `image_type = diagram`.
pub const DIAGRAM_DATA_PROMPT: &str = r#"This image is a diagram. Extract its structure as a single JSON object:

{
  "components": [{"id": "<short id>", "label": "<text>"}],
  "connections": [{"from": "<component id>", "to": "<component id>", "label": "<optional edge label>"}]
}

Do not wrap the JSON in markdown fences. Do not add commentary."#;

/// Pick the structured-data prompt for a classification tag, or `None` if
/// the tag doesn't warrant a second call (the structured-data pass only fires for
/// chart/table/diagram).
pub fn structured_data_prompt(kind: crate::config::StructuredImageKind) -> &'static str {
    use crate::config::StructuredImageKind::*;
    match kind {
        Chart => CHART_DATA_PROMPT,
        Table => TABLE_DATA_PROMPT,
        Diagram => DIAGRAM_DATA_PROMPT,
    }
}

/// System prompt used for every structured-extraction call, prepended to
/// the template's own system prompt so the model always knows to answer in
/// JSON regardless of what the template author wrote.
pub const EXTRACTION_JSON_MODE_PREFIX: &str =
    "Respond with a single JSON object conforming exactly to the requested schema. \
Do not wrap the JSON in markdown fences. Do not add commentary before or after it.";

/// Render the user prompt template's placeholders. Literal replacement
/// only — templates never nest.
pub fn render_user_prompt(template: &str, variables_list: &str, text: &str, json_schema: &str) -> String {
    template
        .replace("{variables_list}", variables_list)
        .replace("{text}", text)
        .replace("{json_schema}", json_schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StructuredImageKind;

    #[test]
    fn structured_prompt_picks_chart() {
        assert_eq!(structured_data_prompt(StructuredImageKind::Chart), CHART_DATA_PROMPT);
    }

    #[test]
    fn render_user_prompt_substitutes_all_placeholders() {
        let rendered = render_user_prompt(
            "Vars: {variables_list}\nText: {text}\nSchema: {json_schema}",
            "name, age",
            "hello world",
            "{}",
        );
        assert_eq!(rendered, "Vars: name, age\nText: hello world\nSchema: {}");
    }

    #[test]
    fn render_user_prompt_does_not_recurse() {
        // A variable value that itself contains a placeholder token must
        // not be substituted again.
        let rendered = render_user_prompt("{text}", "name", "{text}", "{}");
        assert_eq!(rendered, "{text}");
    }
}
