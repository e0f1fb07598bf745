use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use secarch_contracts::analysis::{DiagramRequest, DiagramResult, ExtractedText, ImageRef, TextSource};
use secarch_contracts::{AnalysisError, StrategyFailure};
use serde_json::Value;

use crate::analysis::CompletionService;
use crate::diagram::DiagramService;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, ImageFetcher, TransportFault};
use crate::orchestrator::{ChatSink, ReplyTarget};
use crate::vision::{ExtractionStrategy, SourceImage};

/// Replays canned responses in order and records what was sent.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportFault>>>,
    sent: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<HttpResponse, TransportFault>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            sent: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn status(status: u16, body: &str) -> Result<HttpResponse, TransportFault> {
        Ok(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportFault::Other("script exhausted".to_string())))
    }
}

pub fn png_rgb(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 90]));
    encode_png(DynamicImage::ImageRgb8(image))
}

/// 2x1: transparent left pixel, opaque red right pixel.
pub fn png_rgba_half_transparent() -> Vec<u8> {
    let mut image = RgbaImage::new(2, 1);
    image.put_pixel(0, 0, Rgba([10, 20, 30, 0]));
    image.put_pixel(1, 0, Rgba([255, 0, 0, 255]));
    encode_png(DynamicImage::ImageRgba8(image))
}

/// 2x1 indexed PNG: palette entry 0 is dark blue, entry 1 opaque red.
/// `trns` becomes the tRNS chunk when set.
pub fn png_indexed(trns: Option<&[u8]>) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, 2, 1);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_palette(vec![10, 20, 30, 255, 0, 0]);
        if let Some(trns) = trns {
            encoder.set_trns(trns.to_vec());
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 1]).unwrap();
        writer.finish().unwrap();
    }
    bytes
}

fn encode_png(image: DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn sample_analysis_json() -> String {
    r#"```json
{
    "solutions": [
        {
            "name": "Identity-Aware Segmentation",
            "approach": "Put an identity-aware proxy in front of the database",
            "technical_components": {
                "identity_provider": ["OIDC with MFA", "Workload identities"],
                "network_architecture": ["Private database subnet", "Proxy-only ingress"],
                "security_rationale": "The web tier no longer holds implicit trust to the data tier."
            },
            "implementation_complexity": "Medium",
            "security_posture_score": 8
        },
        {
            "name": "Service Mesh mTLS",
            "approach": "Mutual TLS between every hop",
            "technical_components": {
                "identity_provider": ["SPIFFE"],
                "network_architecture": ["Sidecar proxies"],
                "security_rationale": "Every connection is authenticated in both directions."
            },
            "implementation_complexity": "High",
            "security_posture_score": "9"
        }
    ],
    "recommendation": {
        "selected_solution": "Identity-Aware Segmentation",
        "technical_reasons": ["Smallest change", "Removes direct DB access"],
        "implementation_steps": ["Deploy proxy", "Move DB to private subnet"]
    }
}
```"#
        .to_string()
}

pub struct FixedStrategy {
    name: String,
    outcome: Result<ExtractedText, String>,
    calls: Arc<AtomicUsize>,
}

impl FixedStrategy {
    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Err(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding(name: &str, source: TextSource, text: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Ok(ExtractedText {
                source,
                text: text.to_string(),
            }),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls_handle(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl ExtractionStrategy for FixedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, _image: &SourceImage) -> Result<ExtractedText, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(extracted) => Ok(extracted.clone()),
            Err(message) => Err(AnalysisError::ExtractionFailed(vec![StrategyFailure::new(
                self.name.clone(),
                message.clone(),
            )])),
        }
    }
}

pub struct FakeCompletion {
    answer: String,
    prompts: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeCompletion {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn prompts_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }

    pub fn calls_handle(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl CompletionService for FakeCompletion {
    fn name(&self) -> &str {
        "fake"
    }

    fn complete(&self, _system: &str, prompt: &str) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

pub struct FakeDiagrams {
    image_url: Option<String>,
}

impl FakeDiagrams {
    pub fn returning(url: &str) -> Self {
        Self {
            image_url: Some(url.to_string()),
        }
    }

    pub fn missing_url() -> Self {
        Self { image_url: None }
    }
}

impl DiagramService for FakeDiagrams {
    fn request_diagram(&self, _request: &DiagramRequest) -> Result<DiagramResult, AnalysisError> {
        match &self.image_url {
            Some(url) => Ok(DiagramResult {
                image_url: url.clone(),
            }),
            None => Err(AnalysisError::MissingImageUrl),
        }
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    files: BTreeMap<String, Vec<u8>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), bytes);
        self
    }
}

impl ImageFetcher for FakeFetcher {
    fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, AnalysisError> {
        self.files
            .get(&image.source_url)
            .cloned()
            .ok_or_else(|| AnalysisError::Upstream {
                status: 404,
                body: image.source_url.clone(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Text(String),
    Blocks(Vec<Value>),
    Upload {
        title: String,
        comment: String,
        bytes: Vec<u8>,
    },
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ChatSink for RecordingSink {
    fn post_text(&self, _target: &ReplyTarget, text: &str) -> Result<(), AnalysisError> {
        self.calls.lock().unwrap().push(SinkCall::Text(text.to_string()));
        Ok(())
    }

    fn post_blocks(
        &self,
        _target: &ReplyTarget,
        _fallback_text: &str,
        blocks: &[Value],
    ) -> Result<(), AnalysisError> {
        self.calls.lock().unwrap().push(SinkCall::Blocks(blocks.to_vec()));
        Ok(())
    }

    fn upload_image(
        &self,
        _target: &ReplyTarget,
        path: &Path,
        title: &str,
        comment: &str,
    ) -> Result<(), AnalysisError> {
        let bytes = std::fs::read(path).unwrap();
        self.calls.lock().unwrap().push(SinkCall::Upload {
            title: title.to_string(),
            comment: comment.to_string(),
            bytes,
        });
        Ok(())
    }
}
