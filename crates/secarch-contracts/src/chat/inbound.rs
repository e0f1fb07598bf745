use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::analysis::{AnalysisRequest, ImageRef};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct FileAttachment {
    #[serde(default, alias = "url")]
    pub url_private: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl FileAttachment {
    pub fn is_image(&self) -> bool {
        self.mimetype
            .as_deref()
            .map(|mime| mime.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// Chat event as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct InboundEvent {
    #[serde(default, rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub files: Vec<Option<FileAttachment>>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl InboundEvent {
    /// Accepts a bare event or a `{"payload": {"event": ...}}` envelope.
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        let event = value
            .get("payload")
            .and_then(|payload| payload.get("event"))
            .unwrap_or(value);
        serde_json::from_value(event.clone())
    }

    pub fn reply_thread(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }

    /// Mentions are always handled; plain messages only when they are human
    /// direct messages.
    pub fn should_handle(&self) -> bool {
        match self.event_type.as_str() {
            "app_mention" => true,
            "message" => {
                self.bot_id.is_none()
                    && self.subtype.is_none()
                    && self.channel_type.as_deref() == Some("im")
            }
            _ => false,
        }
    }

    pub fn cleaned_text(&self) -> String {
        strip_mentions(self.text.as_deref().unwrap_or_default())
    }

    pub fn image_files(&self) -> Vec<&FileAttachment> {
        self.files
            .iter()
            .flatten()
            .filter(|file| file.is_image())
            .collect()
    }

    pub fn to_request(&self, fetch_headers: &BTreeMap<String, String>) -> AnalysisRequest {
        let images = self
            .image_files()
            .into_iter()
            .filter_map(|file| file.url_private.as_deref())
            .filter(|url| !url.trim().is_empty())
            .map(|url| ImageRef {
                source_url: url.to_string(),
                headers_for_fetch: fetch_headers.clone(),
            })
            .collect();
        AnalysisRequest::new(self.cleaned_text(), images)
    }
}

/// Removes `<@ID>` tokens (uppercase letters and digits) and trims the result.
pub fn strip_mentions(text: &str) -> String {
    match mention_pattern() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn mention_pattern() -> Option<&'static Regex> {
    static MENTION: OnceLock<Option<Regex>> = OnceLock::new();
    MENTION
        .get_or_init(|| Regex::new(r"<@[A-Z0-9]+>").ok())
        .as_ref()
}
