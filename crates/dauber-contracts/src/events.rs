use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type EventPayload = Map<String, Value>;

/// Envelope keys owned by the writer. Payload keys with these names are
/// dropped.
pub const ENVELOPE_KEYS: [&str; 4] = ["type", "session_id", "seq", "ts"];

/// Append-only log of one studio session, one compact JSON object per line.
///
/// Every line carries `type`, `session_id`, `seq` and `ts`. `seq` starts at 1
/// and is assigned under the file lock, so line order and `seq` order agree
/// across clones of the writer. A front end tailing the file can spot a
/// missing line from a gap in `seq`.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends one event and returns it as written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("session log lock poisoned"))?;

        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert("session_id".to_string(), Value::from(self.session_id()));
        event.insert("seq".to_string(), Value::from(*next_seq));
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        for (key, value) in payload {
            if ENVELOPE_KEYS.contains(&key.as_str()) {
                tracing::debug!(event_type, key = %key, "dropping payload key shadowing envelope");
                continue;
            }
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?
            .write_all(line.as_bytes())?;

        *next_seq += 1;
        Ok(Value::Object(event))
    }

    /// Like [`EventWriter::emit`], but a write failure is logged and dropped.
    /// Event delivery never interrupts a studio session.
    pub fn emit_lossy(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            tracing::warn!(
                event_type,
                path = %self.inner.path.display(),
                "failed to write session event: {err:#}"
            );
        }
    }
}

/// `session-<utc stamp>-<8 hex>`, sortable by start time.
pub fn new_session_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session-{stamp}-{}", &suffix[..8])
}
