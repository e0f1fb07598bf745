use thiserror::Error;

/// One failed extraction attempt, kept so the combined error can show every cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: String,
    pub message: String,
}

impl StrategyFailure {
    pub fn new(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("image analysis failed: {}", format_failures(.0))]
    ExtractionFailed(Vec<StrategyFailure>),
    #[error("empty response from {0}")]
    EmptyResponse(String),
    #[error("malformed model output: {reason}")]
    MalformedOutput { reason: String, raw: String },
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("diagram response did not contain an image URL")]
    MissingImageUrl,
    #[error("selected solution details not found: {0}")]
    SolutionNotFound(String),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidInput(_) => "invalid_input",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport_error",
            Self::InvalidImage(_) => "invalid_image",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::EmptyResponse(_) => "empty_response",
            Self::MalformedOutput { .. } => "malformed_output",
            Self::SchemaViolation(_) => "schema_violation",
            Self::MissingImageUrl => "missing_image_url",
            Self::SolutionNotFound(_) => "solution_not_found",
        }
    }

    /// Category description shown in chat. Never includes upstream payloads.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidInput(_) => {
                "an upstream service rejected the request as invalid."
            }
            Self::Unauthorized(_) => "an upstream service rejected the configured credentials.",
            Self::Upstream { .. } => "an upstream service kept failing after several retries.",
            Self::Timeout(_) => "an upstream service did not answer in time.",
            Self::Transport(_) => "an upstream service could not be reached.",
            Self::InvalidImage(_) => {
                "one of the attached files could not be read as an image. Please attach a PNG or JPEG diagram."
            }
            Self::ExtractionFailed(_) => {
                "the attached diagram could not be analyzed (vision analysis and OCR both failed)."
            }
            Self::EmptyResponse(_) => "the analysis service returned an empty response.",
            Self::MalformedOutput { .. } => "the analysis service did not return valid JSON.",
            Self::SchemaViolation(_) => {
                "the analysis service returned JSON in an unexpected shape."
            }
            Self::MissingImageUrl => "the diagram service did not return an image.",
            Self::SolutionNotFound(_) => {
                "the recommended solution is missing from the analysis results."
            }
        }
    }

    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::MalformedOutput { raw, .. } => Some(raw.as_str()),
            _ => None,
        }
    }
}

fn format_failures(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no extraction strategies configured".to_string();
    }
    failures
        .iter()
        .map(|failure| format!("{} error: {}", failure.strategy, failure.message))
        .collect::<Vec<String>>()
        .join(", ")
}
