//! Recovers an [`AnalysisResult`] from raw completion text.
//!
//! Grammar, first match wins:
//! - a fence tagged ```` ```json ```` : content up to the next fence (or end of text)
//! - any fence ```` ``` ```` : content up to the next fence (or end of text)
//! - otherwise the whole text
//!
//! The selected span then goes through a deliberately narrow normalisation
//! (newlines removed, literal double spaces collapsed once) before JSON parsing.
//! That step can alter string values that contain intentional double spaces.

use serde_json::Value;

use super::model::AnalysisResult;
use crate::errors::AnalysisError;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

pub fn extract_payload(raw: &str) -> &str {
    if let Some(span) = fenced_span(raw, JSON_FENCE) {
        return span;
    }
    if let Some(span) = fenced_span(raw, FENCE) {
        return span;
    }
    raw
}

fn fenced_span<'a>(raw: &'a str, opener: &str) -> Option<&'a str> {
    let start = raw.find(opener)? + opener.len();
    let rest = &raw[start..];
    Some(match rest.find(FENCE) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

pub fn normalize_whitespace(payload: &str) -> String {
    payload
        .replace('\n', "")
        .replace("  ", " ")
        .trim()
        .to_string()
}

pub fn parse_analysis(raw: &str) -> Result<AnalysisResult, AnalysisError> {
    let payload = normalize_whitespace(extract_payload(raw));
    let value: Value =
        serde_json::from_str(&payload).map_err(|err| AnalysisError::MalformedOutput {
            reason: err.to_string(),
            raw: raw.to_string(),
        })?;
    let result: AnalysisResult = serde_json::from_value(value)
        .map_err(|err| AnalysisError::SchemaViolation(err.to_string()))?;
    result.validate()?;
    Ok(result)
}
