use std::time::Duration;

use secarch_contracts::prompts::{analysis_prompt, ANALYSIS_SYSTEM_INSTRUCTION};
use secarch_contracts::AnalysisError;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::http::{HttpClient, HttpRequest};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gpt-4";
pub const ANALYSIS_TEMPERATURE: f64 = 0.7;
pub const ANALYSIS_MAX_TOKENS: u32 = 4000;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(180);

/// A chat-completion backend: one system instruction, one user prompt, one
/// text answer.
pub trait CompletionService: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, system: &str, prompt: &str) -> Result<String, AnalysisError>;
}

pub struct OpenAiChat {
    http: HttpClient,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(http: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_base: OPENAI_API_BASE.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_ANALYSIS_MODEL.to_string(),
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

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl CompletionService for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, system: &str, prompt: &str) -> Result<String, AnalysisError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": ANALYSIS_TEMPERATURE,
            "max_tokens": ANALYSIS_MAX_TOKENS,
        });
        let request = HttpRequest::post_json(format!("{}/chat/completions", self.api_base), payload)
            .bearer(&self.api_key)
            .timeout(COMPLETION_TIMEOUT);
        let response = self.http.call_json(self.name(), &request)?;
        let content = first_choice_content(&response).unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse(self.name().to_string()));
        }
        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }
}

fn first_choice_content(response: &Value) -> Option<String> {
    response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Produces the raw structured-analysis text for a system.
pub struct StructuredAnalyzer {
    completion: Box<dyn CompletionService>,
}

impl StructuredAnalyzer {
    pub fn new(completion: Box<dyn CompletionService>) -> Self {
        Self { completion }
    }

    pub fn analyze(&self, system_name: &str, description: &str) -> Result<String, AnalysisError> {
        info!(
            service = self.completion.name(),
            system = system_name,
            "requesting structured analysis"
        );
        let prompt = analysis_prompt(system_name, description);
        self.completion.complete(ANALYSIS_SYSTEM_INSTRUCTION, &prompt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::HttpBody;
    use crate::test_support::ScriptedTransport;

    fn chat(transport: &Arc<ScriptedTransport>) -> OpenAiChat {
        OpenAiChat::new(HttpClient::new(transport.clone()), "sk-test")
            .with_api_base("https://openai.test/v1")
    }

    #[test]
    fn request_uses_fixed_sampling_parameters() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::status(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"solutions\":[]}"}}]}"#,
        )]));
        let text = StructuredAnalyzer::new(Box::new(chat(&transport)))
            .analyze("Payment Service", "Web app talks directly to database")
            .unwrap();
        assert_eq!(text, "{\"solutions\":[]}");

        let sent = transport.requests();
        assert_eq!(sent[0].url, "https://openai.test/v1/chat/completions");
        assert_eq!(
            sent[0].headers.get("Authorization"),
            Some(&"Bearer sk-test".to_string())
        );
        let HttpBody::Json(body) = &sent[0].body else {
            panic!("expected JSON body");
        };
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("SYSTEM NAME: Payment Service"));
    }

    #[test]
    fn missing_content_is_an_empty_response() {
        for raw in [
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{"content":null}}]}"#,
            r#"{"choices":[{"message":{"content":"   "}}]}"#,
        ] {
            let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::status(
                200, raw,
            )]));
            let err = chat(&transport).complete("s", "p").unwrap_err();
            assert_eq!(err.kind(), "empty_response", "{raw}");
        }
    }
}
