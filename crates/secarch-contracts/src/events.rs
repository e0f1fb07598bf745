use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const SESSION_STARTED: &str = "session_started";
pub const REQUEST_RECEIVED: &str = "request_received";
pub const STATE_CHANGED: &str = "state_changed";
pub const HTTP_ATTEMPT: &str = "http_attempt";
pub const EXTRACTION_FALLBACK: &str = "extraction_fallback";
pub const REQUEST_FINISHED: &str = "request_finished";

const RESERVED_KEYS: [&str; 4] = ["type", "session_id", "seq", "ts"];

/// Pipeline event log: one compact JSON object per line.
///
/// Every record carries `type`, `session_id`, a per-writer `seq` starting at 1,
/// and an RFC 3339 `ts`. Payload keys that collide with those are dropped.
/// Clones share the same file handle and sequence.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    state: Mutex<SinkState>,
}

#[derive(Debug, Default)]
struct SinkState {
    file: Option<File>,
    seq: u64,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                state: Mutex::new(SinkState::default()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        state.seq += 1;

        let mut record = Map::new();
        record.insert("type".to_string(), Value::from(event_type));
        record.insert(
            "session_id".to_string(),
            Value::from(self.shared.session_id.as_str()),
        );
        record.insert("seq".to_string(), Value::from(state.seq));
        record.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        record.extend(
            payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str())),
        );

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        if state.file.is_none() {
            state.file = Some(self.open()?);
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;
        }
        Ok(Value::Object(record))
    }

    fn open(&self) -> anyhow::Result<File> {
        let path = &self.shared.path;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open event log {}", path.display()))
    }
}

/// The event log is best effort: write failures never reach the caller.
pub fn emit_optional(writer: Option<&EventWriter>, event_type: &str, payload: EventPayload) {
    if let Some(writer) = writer {
        let _ = writer.emit(event_type, payload);
    }
}
