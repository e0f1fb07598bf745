use std::io::Write;
use std::process::Command;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use secarch_contracts::analysis::{ExtractedText, TextSource};
use secarch_contracts::prompts::{format_ocr_text, format_vision_text, VISION_INSTRUCTION};
use secarch_contracts::{AnalysisError, StrategyFailure};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::http::{HttpClient, HttpRequest};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TESSERACT_BIN: &str = "tesseract";
const VISION_TIMEOUT: Duration = Duration::from_secs(120);

/// Image bytes that are known to decode.
#[derive(Debug, Clone)]
pub struct SourceImage {
    bytes: Vec<u8>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl SourceImage {
    pub fn decode(bytes: Vec<u8>) -> Result<Self, AnalysisError> {
        let format = image::guess_format(&bytes)
            .map_err(|err| AnalysisError::InvalidImage(format!("unrecognized image format: {err}")))?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|err| AnalysisError::InvalidImage(err.to_string()))?;
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            bytes,
            format,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("img")
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// One way of turning a diagram into text.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, image: &SourceImage) -> Result<ExtractedText, AnalysisError>;
}

pub struct GeminiVision {
    http: HttpClient,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl GeminiVision {
    pub fn new(http: HttpClient, api_key: Option<String>) -> Self {
        Self {
            http,
            api_base: GEMINI_API_BASE.to_string(),
            api_key,
            model: DEFAULT_VISION_MODEL.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn payload(image: &SourceImage) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": VISION_INSTRUCTION},
                    {
                        "inlineData": {
                            "mimeType": image.mime_type(),
                            "data": BASE64.encode(image.bytes()),
                        }
                    }
                ]
            }]
        })
    }
}

impl ExtractionStrategy for GeminiVision {
    fn name(&self) -> &str {
        "vision"
    }

    fn extract(&self, image: &SourceImage) -> Result<ExtractedText, AnalysisError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AnalysisError::Unauthorized(
                "GEMINI_API_KEY (or GOOGLE_API_KEY) not set".to_string(),
            ));
        };
        let request = HttpRequest::post_json(self.endpoint(), Self::payload(image))
            .header("x-goog-api-key", api_key)
            .timeout(VISION_TIMEOUT);
        let response = self.http.call_json("gemini", &request)?;
        let text = extract_candidate_text(&response);
        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse("gemini".to_string()));
        }
        debug!(model = %self.model, chars = text.len(), "vision analysis complete");
        Ok(ExtractedText {
            source: TextSource::Vision,
            text: format_vision_text(&text),
        })
    }
}

fn extract_candidate_text(response: &Value) -> String {
    let mut chunks = Vec::new();
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    chunks.push(text.to_string());
                }
            }
        }
    }
    chunks.join("\n")
}

/// OCR through the `tesseract` executable.
pub struct TesseractOcr {
    binary: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn failure(&self, message: impl Into<String>) -> AnalysisError {
        AnalysisError::ExtractionFailed(vec![StrategyFailure::new(self.name(), message)])
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new(DEFAULT_TESSERACT_BIN)
    }
}

impl ExtractionStrategy for TesseractOcr {
    fn name(&self) -> &str {
        "ocr"
    }

    fn extract(&self, image: &SourceImage) -> Result<ExtractedText, AnalysisError> {
        let mut file = tempfile::Builder::new()
            .prefix("secarch-ocr-")
            .suffix(&format!(".{}", image.extension()))
            .tempfile()
            .map_err(|err| self.failure(format!("failed to create temp file: {err}")))?;
        file.write_all(image.bytes())
            .and_then(|_| file.flush())
            .map_err(|err| self.failure(format!("failed to write temp file: {err}")))?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .output()
            .map_err(|err| self.failure(format!("failed to run {}: {err}", self.binary)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        let recognized = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(ExtractedText {
            source: TextSource::Ocr,
            text: format_ocr_text(&recognized),
        })
    }
}

/// Ordered strategies; the first success wins.
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractionChain {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn with(mut self, strategy: Box<dyn ExtractionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .iter()
            .map(|strategy| strategy.name().to_string())
            .collect()
    }

    /// Undecodable bytes fail with `InvalidImage` before any strategy runs.
    pub fn extract(&self, bytes: Vec<u8>) -> Result<ExtractedText, AnalysisError> {
        let image = SourceImage::decode(bytes)?;
        let (width, height) = image.dimensions();
        debug!(mime = image.mime_type(), width, height, "decoded source image");

        let mut failures = Vec::new();
        for strategy in &self.strategies {
            match strategy.extract(&image) {
                Ok(extracted) => {
                    if !failures.is_empty() {
                        info!(strategy = strategy.name(), "fallback extraction succeeded");
                    }
                    return Ok(extracted);
                }
                Err(AnalysisError::ExtractionFailed(inner)) => {
                    warn!(strategy = strategy.name(), "extraction strategy failed");
                    failures.extend(inner);
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), error = %err, "extraction strategy failed");
                    failures.push(StrategyFailure::new(strategy.name(), err.to_string()));
                }
            }
        }
        Err(AnalysisError::ExtractionFailed(failures))
    }
}

impl Default for ExtractionChain {
    fn default() -> Self {
        Self::new()
    }
}
