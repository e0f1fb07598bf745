use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use secarch_engine::EngineSettings;

use crate::slack::SLACK_API_BASE;

pub const DEFAULT_PID_FILE: &str = "slack_analyzer.pid";
pub const DEFAULT_LOG_FILE: &str = "logs/secarchbot.log";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Settings for the long-running bot, read once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub slack_bot_token: String,
    pub slack_signing_secret: String,
    pub slack_app_token: String,
    pub slack_api_base: String,
    pub engine: EngineSettings,
    pub pid_file: PathBuf,
    pub events_path: Option<PathBuf>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Every missing required variable is reported in one error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut vars = Vars::new(lookup);
        let slack_bot_token = vars.required("SLACK_BOT_TOKEN");
        let slack_signing_secret = vars.required("SLACK_SIGNING_SECRET");
        let slack_app_token = vars.required("SLACK_APP_TOKEN");
        let mut engine = vars.engine_settings();
        vars.finish()?;

        engine.attachment_token = Some(slack_bot_token.clone());
        Ok(Self {
            slack_api_base: vars
                .optional(&["SLACK_API_BASE"])
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| SLACK_API_BASE.to_string()),
            pid_file: vars
                .optional(&["SECARCH_PID_FILE"])
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join(DEFAULT_PID_FILE)),
            events_path: vars.optional(&["SECARCH_EVENTS_PATH"]).map(PathBuf::from),
            slack_bot_token,
            slack_signing_secret,
            slack_app_token,
            engine,
        })
    }

    /// Which credentials and options are set, without their values.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "slack_api_base": self.slack_api_base,
            "signing_secret_set": !self.slack_signing_secret.is_empty(),
            "vision_enabled": self.engine.gemini_api_key.is_some(),
            "openai_model": self.engine.openai_model,
            "vision_model": self.engine.vision_model,
            "pid_file": self.pid_file.display().to_string(),
        })
    }
}

/// Settings for the local `analyze` command, which needs no chat credentials.
pub fn engine_settings_from_env() -> Result<EngineSettings> {
    engine_settings_from_lookup(|key| env::var(key).ok())
}

pub fn engine_settings_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EngineSettings> {
    let mut vars = Vars::new(lookup);
    let engine = vars.engine_settings();
    vars.finish()?;
    Ok(engine)
}

pub fn events_path_from_env() -> Option<PathBuf> {
    non_empty_env("SECARCH_EVENTS_PATH").map(PathBuf::from)
}

struct Vars<F> {
    lookup: F,
    missing: Vec<&'static str>,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            missing: Vec::new(),
        }
    }

    fn optional(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| {
            (self.lookup)(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }

    fn required(&mut self, key: &'static str) -> String {
        match self.optional(&[key]) {
            Some(value) => value,
            None => {
                self.missing.push(key);
                String::new()
            }
        }
    }

    fn engine_settings(&mut self) -> EngineSettings {
        let openai_api_key = self.required("OPENAI_API_KEY");
        let eraser_api_token = self.required("ERASER_API_TOKEN");
        let mut engine = EngineSettings::new(openai_api_key, eraser_api_token);
        engine.gemini_api_key = self.optional(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]);
        if let Some(base) = self.optional(&["OPENAI_API_BASE"]) {
            engine.openai_api_base = base;
        }
        if let Some(base) = self.optional(&["GEMINI_API_BASE"]) {
            engine.gemini_api_base = base;
        }
        if let Some(base) = self.optional(&["ERASER_API_BASE"]) {
            engine.eraser_api_base = base;
        }
        if let Some(model) = self.optional(&["SECARCH_OPENAI_MODEL"]) {
            engine.openai_model = model;
        }
        if let Some(model) = self.optional(&["SECARCH_VISION_MODEL"]) {
            engine.vision_model = model;
        }
        if let Some(binary) = self.optional(&["SECARCH_TESSERACT_BIN"]) {
            engine.tesseract_bin = binary;
        }
        if let Some(path) = self.optional(&["SECARCH_DIAGRAM_PATH"]) {
            engine.diagram_path = PathBuf::from(path);
        }
        engine
    }

    fn finish(&self) -> Result<()> {
        if !self.missing.is_empty() {
            bail!(
                "missing required environment variables: {}",
                self.missing.join(", ")
            );
        }
        Ok(())
    }
}

/// Log filter and optional JSON log file.
///
/// `RUST_LOG` wins over `LOG_LEVEL`. `LOG_FILE` unset means
/// [`DEFAULT_LOG_FILE`]; set to an empty value it disables the file sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let filter = non_empty("RUST_LOG")
            .or_else(|| non_empty("LOG_LEVEL").map(|level| level_directive(&level)))
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let file = match lookup("LOG_FILE") {
            None => Some(PathBuf::from(DEFAULT_LOG_FILE)),
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(PathBuf::from(value.trim())),
        };
        Self { filter, file }
    }
}

/// Maps Python-style level names onto tracing directives.
fn level_directive(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

fn non_empty_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("SLACK_SIGNING_SECRET", "sig"),
            ("SLACK_APP_TOKEN", "xapp-1"),
            ("OPENAI_API_KEY", "sk-1"),
            ("ERASER_API_TOKEN", "er-1"),
        ]
    }

    #[test]
    fn every_missing_variable_is_listed() {
        let err = BotConfig::from_lookup(lookup(&[
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("OPENAI_API_KEY", "   "),
        ]))
        .unwrap_err()
        .to_string();
        for key in [
            "SLACK_SIGNING_SECRET",
            "SLACK_APP_TOKEN",
            "OPENAI_API_KEY",
            "ERASER_API_TOKEN",
        ] {
            assert!(err.contains(key), "{key} missing from: {err}");
        }
        assert!(!err.contains("SLACK_BOT_TOKEN"));
    }

    #[test]
    fn defaults_apply_when_optional_values_are_absent() -> anyhow::Result<()> {
        let config = BotConfig::from_lookup(lookup(&full()))?;
        assert_eq!(config.slack_api_base, "https://slack.com/api");
        assert!(config.pid_file.ends_with("slack_analyzer.pid"));
        assert_eq!(config.engine.openai_model, "gpt-4");
        assert_eq!(config.engine.gemini_api_key, None);
        assert_eq!(config.engine.attachment_token.as_deref(), Some("xoxb-1"));
        assert!(config.events_path.is_none());
        assert_eq!(config.summary()["signing_secret_set"], true);
        assert_eq!(config.summary()["vision_enabled"], false);
        Ok(())
    }

    #[test]
    fn optional_values_override_defaults() -> anyhow::Result<()> {
        let mut pairs = full();
        pairs.extend([
            ("GOOGLE_API_KEY", "g-1"),
            ("SECARCH_OPENAI_MODEL", "gpt-4o"),
            ("SLACK_API_BASE", "http://localhost:9000/api/"),
            ("SECARCH_PID_FILE", "/run/secarch.pid"),
            ("SECARCH_DIAGRAM_PATH", "/var/tmp/d.png"),
        ]);
        let config = BotConfig::from_lookup(lookup(&pairs))?;
        assert_eq!(config.engine.gemini_api_key.as_deref(), Some("g-1"));
        assert_eq!(config.engine.openai_model, "gpt-4o");
        assert_eq!(config.slack_api_base, "http://localhost:9000/api");
        assert_eq!(config.pid_file, PathBuf::from("/run/secarch.pid"));
        assert_eq!(config.engine.diagram_path, PathBuf::from("/var/tmp/d.png"));
        Ok(())
    }

    #[test]
    fn local_analysis_needs_only_service_keys() -> anyhow::Result<()> {
        let settings = engine_settings_from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("ERASER_API_TOKEN", "er-1"),
            ("GEMINI_API_KEY", "g-1"),
            ("GOOGLE_API_KEY", "g-2"),
        ]))?;
        assert_eq!(settings.gemini_api_key.as_deref(), Some("g-1"));
        assert!(settings.attachment_token.is_none());
        Ok(())
    }

    #[test]
    fn log_level_falls_back_after_rust_log() {
        let settings = LogSettings::from_lookup(lookup(&[]));
        assert_eq!(settings.filter, "info");
        assert_eq!(settings.file, Some(PathBuf::from("logs/secarchbot.log")));

        let settings = LogSettings::from_lookup(lookup(&[("LOG_LEVEL", "WARNING")]));
        assert_eq!(settings.filter, "warn");

        let settings = LogSettings::from_lookup(lookup(&[
            ("RUST_LOG", "secarch_engine=debug"),
            ("LOG_LEVEL", "ERROR"),
        ]));
        assert_eq!(settings.filter, "secarch_engine=debug");
    }

    #[test]
    fn log_file_can_be_moved_or_disabled() -> anyhow::Result<()> {
        let disabled = LogSettings::from_lookup(lookup(&[("LOG_FILE", "  ")]));
        assert_eq!(disabled.file, None);

        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("bot.log");
        let moved = LogSettings::from_lookup(lookup(&[("LOG_FILE", &path.display().to_string())]));
        assert_eq!(moved.file.as_deref(), Some(path.as_path()));

        open_log_file(&path)?;
        assert!(path.exists());
        Ok(())
    }
}
