use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client as ReqwestClient;
use reqwest::header::CONTENT_TYPE;
use secarch_contracts::analysis::ImageRef;
use secarch_contracts::events::{emit_optional, EventWriter, HTTP_ATTEMPT};
use secarch_contracts::AnalysisError;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

/// Additional attempts made after a 5xx response.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Bytes { content_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: HttpBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: HttpBody::Empty,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn post(url: impl Into<String>, body: HttpBody) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: BTreeMap::new(),
            body,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn post_json(url: impl Into<String>, payload: Value) -> Self {
        Self::post(url, HttpBody::Json(payload))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Result<Value, AnalysisError> {
        serde_json::from_slice(&self.body).map_err(|err| AnalysisError::Upstream {
            status: self.status,
            body: format!("invalid JSON payload ({err}): {}", truncate_text(&self.text(), 512)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    Timeout(String),
    Other(String),
}

/// Sends one request and reports the raw status. Retry and error mapping live
/// in [`HttpClient`].
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFault>;
}

pub struct ReqwestTransport {
    http: ReqwestClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AnalysisError> {
        let http = ReqwestClient::builder()
            .user_agent(concat!("secarch-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AnalysisError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { http })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFault> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url),
        }
        .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            HttpBody::Empty => builder,
            HttpBody::Json(payload) => builder.json(payload),
            HttpBody::Form(fields) => builder.form(fields),
            HttpBody::Bytes { content_type, data } => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
        };

        let response = builder.send().map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(classify_reqwest_error)?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportFault {
    if err.is_timeout() {
        TransportFault::Timeout(err.to_string())
    } else {
        TransportFault::Other(err.to_string())
    }
}

/// Uniform request handling shared by every outbound call: bounded retry on
/// server errors and translation into the error taxonomy.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn HttpTransport>,
    max_retries: u32,
    events: Option<EventWriter>,
}

impl HttpClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            max_retries: DEFAULT_MAX_RETRIES,
            events: None,
        }
    }

    pub fn reqwest() -> Result<Self, AnalysisError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retries immediately (no backoff) while the status is >= 500, at most
    /// `max_retries` extra times. Timeouts and other transport faults are
    /// returned without retrying.
    pub fn call(&self, service: &str, request: &HttpRequest) -> Result<HttpResponse, AnalysisError> {
        let endpoint = redact_query(&request.url);
        let mut attempt: u32 = 1;
        let mut response = self.send_once(service, &endpoint, attempt, request)?;
        let mut retries_left = self.max_retries;
        while retries_left > 0 && response.status >= 500 {
            warn!(
                service,
                endpoint = %endpoint,
                status = response.status,
                retries_left,
                "server error, retrying request"
            );
            retries_left -= 1;
            attempt += 1;
            response = self.send_once(service, &endpoint, attempt, request)?;
        }

        match response.status {
            200..=299 => Ok(response),
            400 => {
                let body = response.text();
                error!(service, endpoint = %endpoint, body = %truncate_text(&body, 512), "bad request (400)");
                Err(AnalysisError::InvalidRequest(truncate_text(&body, 512)))
            }
            401 => {
                error!(service, endpoint = %endpoint, "unauthorized (401)");
                Err(AnalysisError::Unauthorized(format!(
                    "{service} rejected the configured credentials"
                )))
            }
            422 => {
                let body = response.text();
                error!(service, endpoint = %endpoint, body = %truncate_text(&body, 512), "unprocessable entity (422)");
                Err(AnalysisError::InvalidInput(truncate_text(&body, 512)))
            }
            status => {
                let body = response.text();
                error!(service, endpoint = %endpoint, status, attempts = attempt, "request failed");
                Err(AnalysisError::Upstream {
                    status,
                    body: truncate_text(&body, 512),
                })
            }
        }
    }

    pub fn call_json(&self, service: &str, request: &HttpRequest) -> Result<Value, AnalysisError> {
        self.call(service, request)?.json()
    }

    fn send_once(
        &self,
        service: &str,
        endpoint: &str,
        attempt: u32,
        request: &HttpRequest,
    ) -> Result<HttpResponse, AnalysisError> {
        let outcome = self.transport.send(request);
        let mut payload = Map::new();
        payload.insert("service".to_string(), json!(service));
        payload.insert("endpoint".to_string(), json!(endpoint));
        payload.insert("attempt".to_string(), json!(attempt));
        match &outcome {
            Ok(response) => {
                debug!(service, endpoint, attempt, status = response.status, "request sent");
                payload.insert("status".to_string(), json!(response.status));
            }
            Err(fault) => {
                error!(service, endpoint, attempt, ?fault, "request failed before a response");
                payload.insert("fault".to_string(), json!(format!("{fault:?}")));
            }
        }
        emit_optional(self.events.as_ref(), HTTP_ATTEMPT, payload);

        outcome.map_err(|fault| match fault {
            TransportFault::Timeout(message) => {
                AnalysisError::Timeout(format!("{service} ({endpoint}): {message}"))
            }
            TransportFault::Other(message) => {
                AnalysisError::Transport(format!("{service} ({endpoint}): {message}"))
            }
        })
    }
}

/// Resolves an [`ImageRef`] to raw bytes.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, AnalysisError>;
}

impl ImageFetcher for HttpClient {
    fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, AnalysisError> {
        let request = HttpRequest::get(&image.source_url).headers(&image.headers_for_fetch);
        let response = self.call("image-download", &request)?;
        debug!(bytes = response.body.len(), "downloaded image");
        Ok(response.body)
    }
}

pub(crate) fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
