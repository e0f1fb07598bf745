use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use secarch_contracts::analysis::ImageRef;
use secarch_contracts::AnalysisError;
use secarch_engine::{ChatSink, HttpClient, ImageFetcher, ReplyTarget};
use serde_json::{json, Value};
use tracing::info;

/// Reads local paths from disk and hands `http(s)://` URLs to the HTTP client.
pub struct LocalFirstFetcher {
    http: HttpClient,
}

impl LocalFirstFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

impl ImageFetcher for LocalFirstFetcher {
    fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, AnalysisError> {
        let source = image.source_url.as_str();
        if source.starts_with("http://") || source.starts_with("https://") {
            return self.http.fetch(image);
        }
        let path = source.strip_prefix("file://").unwrap_or(source);
        fs::read(path).map_err(|err| AnalysisError::InvalidImage(format!("{path}: {err}")))
    }
}

/// Prints replies to stdout; the diagram is copied to `diagram_out` when set.
pub struct StdoutSink {
    diagram_out: Option<PathBuf>,
}

impl StdoutSink {
    pub fn new(diagram_out: Option<PathBuf>) -> Self {
        Self { diagram_out }
    }

    fn print(&self, line: &str) -> Result<(), AnalysisError> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}")
            .map_err(|err| AnalysisError::Transport(format!("stdout: {err}")))
    }
}

impl ChatSink for StdoutSink {
    fn post_text(&self, _target: &ReplyTarget, text: &str) -> Result<(), AnalysisError> {
        self.print(text)
    }

    fn post_blocks(
        &self,
        _target: &ReplyTarget,
        fallback_text: &str,
        blocks: &[Value],
    ) -> Result<(), AnalysisError> {
        let rendered = serde_json::to_string_pretty(&json!({
            "text": fallback_text,
            "blocks": blocks,
        }))
        .map_err(|err| AnalysisError::Transport(format!("failed to render blocks: {err}")))?;
        self.print(&rendered)
    }

    fn upload_image(
        &self,
        _target: &ReplyTarget,
        path: &Path,
        title: &str,
        _comment: &str,
    ) -> Result<(), AnalysisError> {
        let Some(out) = self.diagram_out.as_deref() else {
            info!(title, "diagram rendered; pass --diagram-out to keep it");
            return Ok(());
        };
        fs::copy(path, out).map_err(|err| {
            AnalysisError::Transport(format!("failed to copy diagram to {}: {err}", out.display()))
        })?;
        self.print(&format!("{title} written to {}", out.display()))
    }
}
