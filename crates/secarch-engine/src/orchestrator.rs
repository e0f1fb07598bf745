use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use secarch_contracts::analysis::{
    join_extracted, parse_analysis, AnalysisRequest, AnalysisResult, DiagramRequest, ExtractedText,
    ImageRef, Solution, TextSource,
};
use secarch_contracts::chat::blocks::{
    analysis_blocks, diagram_failure_text, failure_text, ANALYSIS_FALLBACK_TEXT, ANALYZING_NOTICE,
    DIAGRAM_COMMENT, DIAGRAM_TITLE, PROMPT_FOR_INPUT,
};
use secarch_contracts::chat::InboundEvent;
use secarch_contracts::events::{
    emit_optional, EventPayload, EventWriter, EXTRACTION_FALLBACK, REQUEST_FINISHED, REQUEST_RECEIVED,
    STATE_CHANGED,
};
use secarch_contracts::prompts::{combined_text, compose_description, diagram_prompt, system_name_for};
use secarch_contracts::AnalysisError;
use serde_json::{json, Value};
use tracing::{error, info, info_span, warn};

use crate::analysis::StructuredAnalyzer;
use crate::diagram::DiagramService;
use crate::http::ImageFetcher;
use crate::postprocess::{flatten, ScopedFile};
use crate::vision::ExtractionChain;

pub const DEFAULT_DIAGRAM_FILE: &str = "architecture_diagram.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Analyzing,
    Parsing,
    Rendering,
    Replying,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Analyzing => "analyzing",
            Self::Parsing => "parsing",
            Self::Rendering => "rendering",
            Self::Replying => "replying",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where replies for one request go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel: Option<String>,
    pub thread: Option<String>,
}

impl ReplyTarget {
    pub fn for_event(event: &InboundEvent) -> Self {
        Self {
            channel: event.channel.clone(),
            thread: event.reply_thread().map(str::to_string),
        }
    }
}

/// Outbound chat surface.
pub trait ChatSink {
    fn post_text(&self, target: &ReplyTarget, text: &str) -> Result<(), AnalysisError>;
    fn post_blocks(
        &self,
        target: &ReplyTarget,
        fallback_text: &str,
        blocks: &[Value],
    ) -> Result<(), AnalysisError>;
    fn upload_image(
        &self,
        target: &ReplyTarget,
        path: &Path,
        title: &str,
        comment: &str,
    ) -> Result<(), AnalysisError>;
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub request_id: String,
    pub states: Vec<PipelineState>,
    pub result: Option<AnalysisResult>,
    pub error: Option<AnalysisError>,
    pub diagram_error: Option<AnalysisError>,
}

impl PipelineOutcome {
    pub fn final_state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }

    pub fn succeeded(&self) -> bool {
        self.final_state() == PipelineState::Replying
    }
}

pub struct Orchestrator {
    fetcher: Box<dyn ImageFetcher>,
    extraction: ExtractionChain,
    analyzer: StructuredAnalyzer,
    diagrams: Box<dyn DiagramService>,
    diagram_path: PathBuf,
    fetch_headers: BTreeMap<String, String>,
    events: Option<EventWriter>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Box<dyn ImageFetcher>,
        extraction: ExtractionChain,
        analyzer: StructuredAnalyzer,
        diagrams: Box<dyn DiagramService>,
    ) -> Self {
        Self {
            fetcher,
            extraction,
            analyzer,
            diagrams,
            diagram_path: std::env::temp_dir().join(DEFAULT_DIAGRAM_FILE),
            fetch_headers: BTreeMap::new(),
            events: None,
        }
    }

    pub fn with_diagram_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagram_path = path.into();
        self
    }

    /// Headers attached when downloading inbound attachments.
    pub fn with_fetch_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fetch_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn diagram_path(&self) -> &Path {
        &self.diagram_path
    }

    /// Extraction strategies in the order they are tried.
    pub fn extraction_strategies(&self) -> Vec<String> {
        self.extraction.strategy_names()
    }

    pub fn fetch_headers(&self) -> &BTreeMap<String, String> {
        &self.fetch_headers
    }

    pub fn handle_event(&self, event: &InboundEvent, sink: &dyn ChatSink) -> PipelineOutcome {
        let request = event.to_request(&self.fetch_headers);
        self.handle(&request, &ReplyTarget::for_event(event), sink)
    }

    pub fn handle(
        &self,
        request: &AnalysisRequest,
        target: &ReplyTarget,
        sink: &dyn ChatSink,
    ) -> PipelineOutcome {
        let mut run = Run::new(self.events.as_ref());
        let span = info_span!("request", id = %run.request_id);
        let _entered = span.enter();

        let mut received = EventPayload::new();
        received.insert("request_id".to_string(), json!(run.request_id));
        received.insert("text_chars".to_string(), json!(request.raw_text().len()));
        received.insert("images".to_string(), json!(request.images().len()));
        emit_optional(self.events.as_ref(), REQUEST_RECEIVED, received);

        if request.is_empty() {
            info!("empty request, prompting for input");
            post_or_log(sink.post_text(target, PROMPT_FOR_INPUT), "prompt");
            return run.finish(None, None);
        }

        run.enter(PipelineState::Extracting);
        let image_text = match self.extract_images(request.images()) {
            Ok(texts) => join_extracted(&texts),
            Err(err) => return run.fail(err, target, sink),
        };
        post_or_log(sink.post_text(target, ANALYZING_NOTICE), "progress notice");

        run.enter(PipelineState::Analyzing);
        let text = request.raw_text();
        let raw = match self
            .analyzer
            .analyze(&system_name_for(text), &compose_description(text, &image_text))
        {
            Ok(raw) => raw,
            Err(err) => return run.fail(err, target, sink),
        };

        run.enter(PipelineState::Parsing);
        let result = match parse_analysis(&raw) {
            Ok(result) => result,
            Err(err) => {
                if let Some(raw) = err.raw_output() {
                    error!(raw = %raw, "unparseable analysis output");
                }
                return run.fail(err, target, sink);
            }
        };
        let selected = match result.selected() {
            Some(solution) => solution.clone(),
            None => {
                let err = AnalysisError::SolutionNotFound(
                    result.recommendation.selected_solution.clone(),
                );
                return run.fail(err, target, sink);
            }
        };

        run.enter(PipelineState::Rendering);
        let blocks = analysis_blocks(&result);
        if let Err(err) = sink.post_blocks(target, ANALYSIS_FALLBACK_TEXT, &blocks) {
            return run.fail(err, target, sink);
        }
        let system = combined_text(text, &image_text);
        let diagram_error = match self.render_diagram(&system, &selected, target, sink) {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "diagram step failed");
                post_or_log(sink.post_text(target, &diagram_failure_text(&err)), "diagram failure");
                Some(err)
            }
        };

        run.enter(PipelineState::Replying);
        run.finish(Some(result), diagram_error)
    }

    fn extract_images(&self, images: &[ImageRef]) -> Result<Vec<ExtractedText>, AnalysisError> {
        let mut texts = Vec::with_capacity(images.len());
        for (idx, image) in images.iter().enumerate() {
            let bytes = self.fetcher.fetch(image)?;
            let extracted = self.extraction.extract(bytes)?;
            info!(image = idx + 1, source = %extracted.source, "image text extracted");
            if extracted.source != TextSource::Vision {
                let mut payload = EventPayload::new();
                payload.insert("image".to_string(), json!(idx + 1));
                payload.insert("source".to_string(), json!(extracted.source.to_string()));
                emit_optional(self.events.as_ref(), EXTRACTION_FALLBACK, payload);
            }
            texts.push(extracted);
        }
        Ok(texts)
    }

    fn render_diagram(
        &self,
        system: &str,
        selected: &Solution,
        target: &ReplyTarget,
        sink: &dyn ChatSink,
    ) -> Result<(), AnalysisError> {
        let diagram = self.diagrams.request_diagram(&DiagramRequest {
            prompt: diagram_prompt(system, selected),
        })?;
        let bytes = self.fetcher.fetch(&ImageRef::new(&diagram.image_url))?;
        let flattened = flatten(&bytes)?;
        let file = ScopedFile::create(&self.diagram_path, &flattened)?;
        sink.upload_image(target, file.path(), DIAGRAM_TITLE, DIAGRAM_COMMENT)
    }
}

fn post_or_log(result: Result<(), AnalysisError>, what: &str) {
    if let Err(err) = result {
        error!(error = %err, "failed to post {what}");
    }
}

/// State trace for one request.
struct Run<'a> {
    request_id: String,
    states: Vec<PipelineState>,
    events: Option<&'a EventWriter>,
}

impl<'a> Run<'a> {
    fn new(events: Option<&'a EventWriter>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            states: vec![PipelineState::Idle],
            events,
        }
    }

    fn current(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }

    fn enter(&mut self, next: PipelineState) {
        let from = self.current();
        info!(from = %from, to = %next, "state change");
        let mut payload = EventPayload::new();
        payload.insert("request_id".to_string(), json!(self.request_id));
        payload.insert("from".to_string(), json!(from.as_str()));
        payload.insert("to".to_string(), json!(next.as_str()));
        emit_optional(self.events, STATE_CHANGED, payload);
        self.states.push(next);
    }

    fn fail(mut self, err: AnalysisError, target: &ReplyTarget, sink: &dyn ChatSink) -> PipelineOutcome {
        error!(kind = err.kind(), error = %err, state = %self.current(), "request failed");
        self.enter(PipelineState::Failed);
        post_or_log(sink.post_text(target, &failure_text(&err)), "failure notice");
        let mut outcome = self.finish(None, None);
        outcome.error = Some(err);
        outcome
    }

    fn finish(self, result: Option<AnalysisResult>, diagram_error: Option<AnalysisError>) -> PipelineOutcome {
        let final_state = self.current();
        let mut payload = EventPayload::new();
        payload.insert("request_id".to_string(), json!(self.request_id));
        payload.insert("state".to_string(), json!(final_state.as_str()));
        payload.insert(
            "diagram_error".to_string(),
            json!(diagram_error.as_ref().map(AnalysisError::kind)),
        );
        emit_optional(self.events, REQUEST_FINISHED, payload);
        PipelineOutcome {
            request_id: self.request_id,
            states: self.states,
            result,
            error: None,
            diagram_error,
        }
    }
}
