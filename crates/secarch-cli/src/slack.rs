use std::fs;
use std::path::Path;

use secarch_contracts::AnalysisError;
use secarch_engine::http::{HttpBody, HttpClient, HttpRequest};
use secarch_engine::{ChatSink, ReplyTarget};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: Option<String>,
    pub user: Option<String>,
    pub team: Option<String>,
}

/// Slack Web API calls used by the bot.
#[derive(Clone)]
pub struct SlackClient {
    http: HttpClient,
    api_base: String,
    bot_token: String,
    app_token: String,
}

impl SlackClient {
    pub fn new(http: HttpClient, bot_token: impl Into<String>, app_token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: SLACK_API_BASE.to_string(),
            bot_token: bot_token.into(),
            app_token: app_token.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    fn call(&self, method: &str, request: HttpRequest) -> Result<Value, AnalysisError> {
        let response = self.http.call_json("slack", &request)?;
        check_ok(method, response)
    }

    fn call_json(&self, method: &str, token: &str, payload: Value) -> Result<Value, AnalysisError> {
        let request = HttpRequest::post_json(self.api_url(method), payload).bearer(token);
        self.call(method, request)
    }

    pub fn auth_test(&self) -> Result<BotIdentity, AnalysisError> {
        let response = self.call_json("auth.test", &self.bot_token, json!({}))?;
        let field = |key: &str| response.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(BotIdentity {
            user_id: field("user_id"),
            user: field("user"),
            team: field("team"),
        })
    }

    /// WebSocket URL for a new Socket Mode connection.
    pub fn open_socket_url(&self) -> Result<String, AnalysisError> {
        let response = self.call_json("apps.connections.open", &self.app_token, json!({}))?;
        response
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or_else(|| missing_field("apps.connections.open", "url"))
    }

    pub fn post_message(
        &self,
        target: &ReplyTarget,
        text: &str,
        blocks: Option<&[Value]>,
    ) -> Result<(), AnalysisError> {
        let mut payload = json!({
            "channel": channel_of(target)?,
            "text": text,
        });
        if let Some(thread) = target.thread.as_deref() {
            payload["thread_ts"] = json!(thread);
        }
        if let Some(blocks) = blocks {
            payload["blocks"] = Value::Array(blocks.to_vec());
        }
        self.call_json("chat.postMessage", &self.bot_token, payload)?;
        debug!(chars = text.len(), "message posted");
        Ok(())
    }

    /// External upload flow: reserve an upload URL, send the bytes, then
    /// share the file into the reply thread.
    pub fn upload_file(
        &self,
        target: &ReplyTarget,
        path: &Path,
        title: &str,
        comment: &str,
    ) -> Result<(), AnalysisError> {
        let channel = channel_of(target)?;
        let data = fs::read(path).map_err(|err| {
            AnalysisError::Transport(format!("failed to read {}: {err}", path.display()))
        })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("diagram.png")
            .to_string();

        let method = "files.getUploadURLExternal";
        let reserve = HttpRequest::post(
            self.api_url(method),
            HttpBody::Form(vec![
                ("filename".to_string(), filename),
                ("length".to_string(), data.len().to_string()),
            ]),
        )
        .bearer(&self.bot_token);
        let ticket = self.call(method, reserve)?;
        let upload_url = ticket
            .get("upload_url")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_field(method, "upload_url"))?
            .to_string();
        let file_id = ticket
            .get("file_id")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_field(method, "file_id"))?
            .to_string();

        let size = data.len();
        let upload = HttpRequest::post(
            upload_url,
            HttpBody::Bytes {
                content_type: "application/octet-stream".to_string(),
                data,
            },
        );
        self.http.call("slack-upload", &upload)?;

        let mut complete = json!({
            "files": [{"id": file_id, "title": title}],
            "channel_id": channel,
            "initial_comment": comment,
        });
        if let Some(thread) = target.thread.as_deref() {
            complete["thread_ts"] = json!(thread);
        }
        self.call_json("files.completeUploadExternal", &self.bot_token, complete)?;
        info!(file_id = %file_id, bytes = size, "diagram uploaded");
        Ok(())
    }
}

impl ChatSink for SlackClient {
    fn post_text(&self, target: &ReplyTarget, text: &str) -> Result<(), AnalysisError> {
        self.post_message(target, text, None)
    }

    fn post_blocks(
        &self,
        target: &ReplyTarget,
        fallback_text: &str,
        blocks: &[Value],
    ) -> Result<(), AnalysisError> {
        self.post_message(target, fallback_text, Some(blocks))
    }

    fn upload_image(
        &self,
        target: &ReplyTarget,
        path: &Path,
        title: &str,
        comment: &str,
    ) -> Result<(), AnalysisError> {
        self.upload_file(target, path, title, comment)
    }
}

fn channel_of(target: &ReplyTarget) -> Result<&str, AnalysisError> {
    target
        .channel
        .as_deref()
        .ok_or_else(|| AnalysisError::InvalidRequest("reply target has no channel".to_string()))
}

fn missing_field(method: &str, field: &str) -> AnalysisError {
    AnalysisError::Upstream {
        status: 200,
        body: format!("{method} response has no {field}"),
    }
}

/// Slack answers 200 with `{"ok": false, "error": ...}` for API-level failures.
fn check_ok(method: &str, response: Value) -> Result<Value, AnalysisError> {
    if response.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(response);
    }
    let error = response
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    match error {
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" | "token_expired" => {
            Err(AnalysisError::Unauthorized(format!("{method}: {error}")))
        }
        _ => Err(AnalysisError::InvalidRequest(format!("{method}: {error}"))),
    }
}
