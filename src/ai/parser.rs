//! Strict parsing of model output into factoids.
//!
//! Degradation rules: a malformed element is dropped, not the whole
//! response; a response that yields zero valid elements is a parse failure
//! and sends the caller to the fallback generator.

use serde_json::Value;

use crate::error::FactoidError;
use crate::factoid::{truncate_text, Factoid, InsightType};

const DEFAULT_CONFIDENCE: f32 = 0.8;

/// Parse raw completion text into at least one factoid.
pub fn parse_factoids(raw: &str) -> Result<Vec<Factoid>, FactoidError> {
    let stripped = strip_code_fences(raw);

    let value: Value = serde_json::from_str(stripped)
        .map_err(|e| FactoidError::Parse(format!("invalid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(FactoidError::Parse(
            "top-level value is not an array".to_string(),
        ));
    };

    let mut factoids = Vec::with_capacity(items.len());
    for item in &items {
        match parse_element(item) {
            Some(f) => factoids.push(f),
            None => tracing::debug!(element = %item, "dropping factoid without text"),
        }
    }

    if factoids.is_empty() {
        return Err(FactoidError::Parse(
            "no valid factoid elements after filtering".to_string(),
        ));
    }
    Ok(factoids)
}

fn parse_element(item: &Value) -> Option<Factoid> {
    let text = item.get("text")?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }

    let insight_type = item
        .get("insight_type")
        .and_then(|v| serde_json::from_value::<InsightType>(v.clone()).ok())
        .unwrap_or(InsightType::General);

    let confidence = item
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .unwrap_or(DEFAULT_CONFIDENCE);

    Some(Factoid {
        text: truncate_text(text),
        insight_type,
        confidence: confidence.clamp(0.0, 1.0),
    })
}

/// Strip a Markdown code-fence wrapper (```json ... ``` or ``` ... ```),
/// which some models emit despite instructions.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line, if any.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factoid::MAX_FACTOID_CHARS;

    #[test]
    fn parses_plain_array_with_defaults() {
        let out = parse_factoids(r#"[{"text": "Debt rose 58% since 2019"}]"#).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Debt rose 58% since 2019");
        assert_eq!(out[0].insight_type, InsightType::General);
        assert!((out[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n[{\"text\": \"x\", \"insight_type\": \"trend\"}]\n```";
        let out = parse_factoids(raw).unwrap();
        assert_eq!(out[0].insight_type, InsightType::Trend);
    }

    #[test]
    fn element_without_text_is_dropped_not_fatal() {
        let raw = r#"[{"insight_type": "trend"}, {"text": "kept"}]"#;
        let out = parse_factoids(raw).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "kept");
    }

    #[test]
    fn all_elements_invalid_is_a_parse_error() {
        let err = parse_factoids(r#"[{"insight_type": "trend"}, {"text": "   "}]"#).unwrap_err();
        assert!(matches!(err, FactoidError::Parse(_)));
    }

    #[test]
    fn non_array_top_level_is_rejected() {
        let err = parse_factoids(r#"{"text": "not a list"}"#).unwrap_err();
        assert!(matches!(err, FactoidError::Parse(_)));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(parse_factoids("the council is doing fine").is_err());
    }

    #[test]
    fn long_text_is_truncated() {
        let long = "x".repeat(400);
        let raw = format!(r#"[{{"text": "{long}"}}]"#);
        let out = parse_factoids(&raw).unwrap();
        assert_eq!(out[0].text.chars().count(), MAX_FACTOID_CHARS);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let out = parse_factoids(r#"[{"text": "x", "confidence": 3.5}]"#).unwrap();
        assert!((out[0].confidence - 1.0).abs() < 1e-6);
    }
}
