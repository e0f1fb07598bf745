use std::time::Duration;

use secarch_contracts::analysis::{DiagramRequest, DiagramResult};
use secarch_contracts::AnalysisError;
use serde_json::{json, Value};
use tracing::info;

use crate::http::{HttpClient, HttpRequest};

pub const ERASER_API_BASE: &str = "https://app.eraser.io/api";
pub const DIAGRAM_TIMEOUT: Duration = Duration::from_secs(180);

/// Fixed rendering options sent with every diagram request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub theme: &'static str,
    pub format: &'static str,
    pub layout: &'static str,
    pub width: u32,
    pub height: u32,
    pub padding: u32,
    pub scale: f64,
    pub horizontal_spacing: u32,
    pub vertical_spacing: u32,
}

pub const RENDER_OPTIONS: RenderOptions = RenderOptions {
    theme: "light",
    format: "png",
    layout: "vertical",
    width: 1600,
    height: 1200,
    padding: 20,
    scale: 1.5,
    horizontal_spacing: 80,
    vertical_spacing: 80,
};

impl RenderOptions {
    pub fn to_json(&self) -> Value {
        json!({
            "theme": self.theme,
            "format": self.format,
            "layout": self.layout,
            "width": self.width,
            "height": self.height,
            "padding": self.padding,
            "scale": self.scale,
            "spacing": {
                "horizontal": self.horizontal_spacing,
                "vertical": self.vertical_spacing,
            }
        })
    }
}

pub trait DiagramService: Send + Sync {
    fn request_diagram(&self, request: &DiagramRequest) -> Result<DiagramResult, AnalysisError>;
}

pub struct EraserDiagrams {
    http: HttpClient,
    api_base: String,
    api_token: String,
}

impl EraserDiagrams {
    pub fn new(http: HttpClient, api_token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: ERASER_API_BASE.to_string(),
            api_token: api_token.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

impl DiagramService for EraserDiagrams {
    fn request_diagram(&self, request: &DiagramRequest) -> Result<DiagramResult, AnalysisError> {
        let payload = json!({
            "text": request.prompt,
            "type": "architecture",
            "options": RENDER_OPTIONS.to_json(),
        });
        let http_request =
            HttpRequest::post_json(format!("{}/render/prompt", self.api_base), payload)
                .bearer(&self.api_token)
                .header("Accept", "application/json")
                .timeout(DIAGRAM_TIMEOUT);
        let response = self.http.call_json("eraser", &http_request)?;
        let image_url = response
            .get("imageUrl")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(AnalysisError::MissingImageUrl)?;
        info!("diagram rendered");
        Ok(DiagramResult {
            image_url: image_url.to_string(),
        })
    }
}
