pub mod analysis;
pub mod diagram;
pub mod http;
pub mod orchestrator;
pub mod postprocess;
pub mod vision;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;

use secarch_contracts::events::EventWriter;
use secarch_contracts::AnalysisError;

pub use analysis::{CompletionService, OpenAiChat, StructuredAnalyzer};
pub use diagram::{DiagramService, EraserDiagrams};
pub use http::{HttpClient, HttpTransport, ImageFetcher, ReqwestTransport};
pub use orchestrator::{ChatSink, Orchestrator, PipelineOutcome, PipelineState, ReplyTarget};
pub use vision::{ExtractionChain, ExtractionStrategy, GeminiVision, TesseractOcr};

/// Everything needed to wire the production services.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub openai_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub vision_model: String,
    pub tesseract_bin: String,
    pub eraser_api_token: String,
    pub eraser_api_base: String,
    pub diagram_path: PathBuf,
    /// Sent with attachment downloads (the chat platform's bearer token).
    pub attachment_token: Option<String>,
}

impl EngineSettings {
    pub fn new(openai_api_key: impl Into<String>, eraser_api_token: impl Into<String>) -> Self {
        Self {
            openai_api_key: openai_api_key.into(),
            openai_api_base: analysis::OPENAI_API_BASE.to_string(),
            openai_model: analysis::DEFAULT_ANALYSIS_MODEL.to_string(),
            gemini_api_key: None,
            gemini_api_base: vision::GEMINI_API_BASE.to_string(),
            vision_model: vision::DEFAULT_VISION_MODEL.to_string(),
            tesseract_bin: vision::DEFAULT_TESSERACT_BIN.to_string(),
            eraser_api_token: eraser_api_token.into(),
            eraser_api_base: diagram::ERASER_API_BASE.to_string(),
            diagram_path: std::env::temp_dir().join(orchestrator::DEFAULT_DIAGRAM_FILE),
            attachment_token: None,
        }
    }
}

/// Vision first, OCR as the fallback. `fetcher` resolves both inbound
/// attachments and the rendered diagram.
pub fn build_orchestrator(
    settings: &EngineSettings,
    http: HttpClient,
    fetcher: Box<dyn ImageFetcher>,
    events: Option<EventWriter>,
) -> Orchestrator {
    let extraction = ExtractionChain::new()
        .with(Box::new(
            GeminiVision::new(http.clone(), settings.gemini_api_key.clone())
                .with_api_base(&settings.gemini_api_base)
                .with_model(&settings.vision_model),
        ))
        .with(Box::new(TesseractOcr::new(&settings.tesseract_bin)));
    let analyzer = StructuredAnalyzer::new(Box::new(
        OpenAiChat::new(http.clone(), &settings.openai_api_key)
            .with_api_base(&settings.openai_api_base)
            .with_model(&settings.openai_model),
    ));
    let diagrams = EraserDiagrams::new(http, &settings.eraser_api_token)
        .with_api_base(&settings.eraser_api_base);

    let mut orchestrator = Orchestrator::new(fetcher, extraction, analyzer, Box::new(diagrams))
        .with_diagram_path(&settings.diagram_path)
        .with_events(events);
    if let Some(token) = settings.attachment_token.as_deref() {
        orchestrator = orchestrator.with_fetch_header("Authorization", format!("Bearer {token}"));
    }
    orchestrator
}

pub fn build_http_client(events: Option<EventWriter>) -> Result<HttpClient, AnalysisError> {
    Ok(HttpClient::reqwest()?.with_events(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_use_documented_models() {
        let settings = EngineSettings::new("sk", "er");
        assert_eq!(settings.openai_model, "gpt-4");
        assert_eq!(settings.vision_model, "gemini-2.0-flash");
        assert_eq!(settings.tesseract_bin, "tesseract");
        assert!(settings.diagram_path.ends_with("architecture_diagram.png"));
    }

    #[test]
    fn built_orchestrator_tries_vision_then_ocr() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut settings = EngineSettings::new("sk", "er");
        settings.diagram_path = temp.path().join("diagram.png");
        settings.attachment_token = Some("xoxb-1".to_string());
        let http = build_http_client(None)?;

        let orchestrator = build_orchestrator(&settings, http.clone(), Box::new(http), None);
        assert_eq!(orchestrator.extraction_strategies(), vec!["vision", "ocr"]);
        assert_eq!(orchestrator.diagram_path(), settings.diagram_path.as_path());
        assert_eq!(
            orchestrator.fetch_headers().get("Authorization").map(String::as_str),
            Some("Bearer xoxb-1")
        );
        Ok(())
    }

    #[test]
    fn fetch_header_is_absent_without_attachment_token() -> anyhow::Result<()> {
        let http = build_http_client(None)?;
        let settings = EngineSettings::new("sk", "er");
        let orchestrator = build_orchestrator(&settings, http.clone(), Box::new(http), None);
        assert!(orchestrator.fetch_headers().is_empty());
        Ok(())
    }
}
