//! Shared three-stage JSON-extraction parse chain used by the vision
//! enricher and the structured extractor whenever a model is asked for JSON
//! but may not honour JSON mode exactly.
//!
//! Stage 1: parse the raw text as-is.
//! Stage 2: strip a single leading/trailing markdown code fence and retry.
//! Stage 3: scan for the outermost balanced `{...}` span and parse that.
//!
//! This replaces exception-driven control flow (try/parse/catch/fallback)
//! with an explicit chain of fallible steps, each one a plain function.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").unwrap());

/// Maximum characters of the raw response kept in the error snippet when
/// every stage fails.
const SNIPPET_LIMIT: usize = 500;

pub fn parse_json_response(raw: &str) -> Result<Value, String> {
    if let Ok(v) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(v);
    }

    if let Some(caps) = FENCE_RE.captures(raw.trim()) {
        if let Ok(v) = serde_json::from_str::<Value>(&caps[1]) {
            return Ok(v);
        }
    }

    if let Some(span) = balanced_braces(raw) {
        if let Ok(v) = serde_json::from_str::<Value>(span) {
            return Ok(v);
        }
    }

    let mut snippet: String = raw.chars().take(SNIPPET_LIMIT).collect();
    if raw.chars().count() > SNIPPET_LIMIT {
        snippet.push('…');
    }
    Err(snippet)
}

/// Find the first top-level balanced `{...}` span by bracket counting,
/// ignoring braces inside string literals.
fn balanced_braces(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Predicate deciding whether a string value counts as "missing" for
/// null-handling purposes — the single place this decision is made.
pub fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a")
}

/// Recursively replace missing string values with `Value::Null`.
pub fn normalise_nulls(value: Value) -> Value {
    match value {
        Value::String(s) if is_missing(&s) => Value::Null,
        Value::Array(items) => Value::Array(items.into_iter().map(normalise_nulls).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, normalise_nulls(v))).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json_directly() {
        let v = parse_json_response(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn strips_markdown_fence() {
        let v = parse_json_response("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extracts_balanced_braces_from_surrounding_prose() {
        let v = parse_json_response("Sure, here you go: {\"a\": {\"b\": 2}} — hope that helps!").unwrap();
        assert_eq!(v["a"]["b"], 2);
    }

    #[test]
    fn ignores_braces_inside_string_literals() {
        let v = parse_json_response(r#"noise {"a": "a { b } c"} trailing"#).unwrap();
        assert_eq!(v["a"], "a { b } c");
    }

    #[test]
    fn fails_with_truncated_snippet_when_nothing_parses() {
        let err = parse_json_response("not json at all").unwrap_err();
        assert_eq!(err, "not json at all");
    }

    #[test]
    fn is_missing_recognises_empty_and_na() {
        assert!(is_missing(""));
        assert!(is_missing("  "));
        assert!(is_missing("N/A"));
        assert!(is_missing("n/a"));
        assert!(!is_missing("present"));
    }

    #[test]
    fn normalise_nulls_recurses_into_nested_structures() {
        let input = serde_json::json!({"a": "N/A", "b": {"c": ""}, "d": ["x", "N/A"]});
        let out = normalise_nulls(input);
        assert_eq!(out["a"], Value::Null);
        assert_eq!(out["b"]["c"], Value::Null);
        assert_eq!(out["d"][1], Value::Null);
        assert_eq!(out["d"][0], "x");
    }
}
