use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::AnalysisError;

/// Location of an image attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub source_url: String,
    #[serde(default)]
    pub headers_for_fetch: BTreeMap<String, String>,
}

impl ImageRef {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            headers_for_fetch: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers_for_fetch.insert(name.into(), value.into());
        self
    }
}

/// Normalised input for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    raw_text: String,
    images: Vec<ImageRef>,
}

impl AnalysisRequest {
    pub fn new(raw_text: impl Into<String>, images: Vec<ImageRef>) -> Self {
        Self {
            raw_text: raw_text.into(),
            images,
        }
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty() && self.images.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    Vision,
    Ocr,
}

impl fmt::Display for TextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextSource::Vision => write!(f, "vision"),
            TextSource::Ocr => write!(f, "ocr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub source: TextSource,
    pub text: String,
}

/// Joins per-image texts in arrival order. No deduplication.
pub fn join_extracted(texts: &[ExtractedText]) -> String {
    texts
        .iter()
        .map(|item| item.text.as_str())
        .collect::<Vec<&str>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImplementationComplexity {
    #[serde(alias = "low", alias = "LOW")]
    Low,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "high", alias = "HIGH")]
    High,
}

impl fmt::Display for ImplementationComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImplementationComplexity::Low => write!(f, "Low"),
            ImplementationComplexity::Medium => write!(f, "Medium"),
            ImplementationComplexity::High => write!(f, "High"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalComponents {
    pub identity_provider: Vec<String>,
    pub network_architecture: Vec<String>,
    pub security_rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub name: String,
    pub approach: String,
    pub technical_components: TechnicalComponents,
    pub implementation_complexity: ImplementationComplexity,
    #[serde(deserialize_with = "deserialize_score")]
    pub security_posture_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub selected_solution: String,
    pub technical_reasons: Vec<String>,
    pub implementation_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub solutions: Vec<Solution>,
    pub recommendation: Recommendation,
}

impl AnalysisResult {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.solutions.is_empty() {
            return Err(AnalysisError::SchemaViolation(
                "`solutions` must contain at least one entry".to_string(),
            ));
        }
        if let Some(idx) = self
            .solutions
            .iter()
            .position(|solution| solution.name.trim().is_empty())
        {
            return Err(AnalysisError::SchemaViolation(format!(
                "solution #{} has an empty name",
                idx + 1
            )));
        }
        let selected = &self.recommendation.selected_solution;
        let matches = self
            .solutions
            .iter()
            .filter(|solution| &solution.name == selected)
            .count();
        match matches {
            1 => Ok(()),
            0 => Err(AnalysisError::SchemaViolation(format!(
                "recommendation.selected_solution '{selected}' does not match any solution name"
            ))),
            n => Err(AnalysisError::SchemaViolation(format!(
                "recommendation.selected_solution '{selected}' matches {n} solutions"
            ))),
        }
    }

    pub fn selected(&self) -> Option<&Solution> {
        self.solutions
            .iter()
            .find(|solution| solution.name == self.recommendation.selected_solution)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramResult {
    pub image_url: String,
}

fn deserialize_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("security_posture_score out of range")),
        Value::String(raw) => raw.trim().parse::<f64>().map_err(|_| {
            serde::de::Error::custom(format!(
                "security_posture_score must be a number, got '{raw}'"
            ))
        }),
        other => Err(serde::de::Error::custom(format!(
            "security_posture_score must be a number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn solution(name: &str) -> Value {
        json!({
            "name": name,
            "approach": "Identity-aware proxy in front of every service",
            "technical_components": {
                "identity_provider": ["OIDC"],
                "network_architecture": ["Private subnets"],
                "security_rationale": "Every hop is authenticated."
            },
            "implementation_complexity": "Medium",
            "security_posture_score": 8
        })
    }

    #[test]
    fn score_accepts_numeric_strings() {
        let mut raw = solution("A");
        raw["security_posture_score"] = json!("7.5");
        let parsed: Solution = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.security_posture_score, 7.5);
    }

    #[test]
    fn complexity_accepts_lowercase() {
        let mut raw = solution("A");
        raw["implementation_complexity"] = json!("high");
        let parsed: Solution = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.implementation_complexity, ImplementationComplexity::High);
    }

    #[test]
    fn duplicate_selected_names_fail_validation() {
        let result: AnalysisResult = serde_json::from_value(json!({
            "solutions": [solution("A"), solution("A")],
            "recommendation": {
                "selected_solution": "A",
                "technical_reasons": [],
                "implementation_steps": []
            }
        }))
        .unwrap();
        let err = result.validate().unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn join_extracted_keeps_arrival_order() {
        let texts = vec![
            ExtractedText {
                source: TextSource::Ocr,
                text: "second upload".to_string(),
            },
            ExtractedText {
                source: TextSource::Vision,
                text: "second upload".to_string(),
            },
        ];
        assert_eq!(join_extracted(&texts), "second upload\nsecond upload");
    }
}
