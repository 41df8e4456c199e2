use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::slots::SlotKind;

const REDACTED: &str = "[redacted]";

/// Appends one compact JSON object per line to a session's `events.jsonl`.
///
/// Each line starts with `type`, `session_id` and `ts`; payload keys follow
/// and win on collision. Registered secrets are replaced by `[redacted]` in
/// every string of the payload before anything reaches the disk.
#[derive(Clone)]
pub struct EventWriter {
    path: PathBuf,
    session_id: String,
    secrets: Vec<String>,
    lock: Arc<Mutex<()>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
            secrets: Vec::new(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Masks `secret` in every line written from now on. Blank values are ignored.
    pub fn with_secret(mut self, secret: &str) -> Self {
        let secret = secret.trim();
        if !secret.is_empty() {
            self.secrets.push(secret.to_string());
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Object payloads are merged into the line, `null` adds nothing, and any
    /// other value is stored under `value`. Returns the line as written.
    pub fn emit_value(&self, event_type: &str, payload: Value) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), json!(event_type));
        event.insert("session_id".to_string(), json!(self.session_id));
        event.insert("ts".to_string(), json!(now_utc_iso()));
        match self.mask(payload) {
            Value::Object(fields) => event.extend(fields),
            Value::Null => {}
            other => {
                event.insert("value".to_string(), other);
            }
        }

        let event = Value::Object(event);
        self.append(&event)?;
        Ok(event)
    }

    /// A user-facing notice, recorded as a `notice` event.
    pub fn record_notice(
        &self,
        level: &str,
        slot: Option<SlotKind>,
        message: &str,
    ) -> anyhow::Result<Value> {
        let payload = json!({
            "level": level,
            "slot": slot.map(SlotKind::as_str),
            "message": message,
        });
        self.emit_value("notice", payload)
    }

    fn append(&self, event: &Value) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn mask(&self, value: Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.mask_text(text)),
            Value::Array(items) => {
                let items = items.into_iter().map(|item| self.mask(item));
                Value::Array(items.collect())
            }
            Value::Object(fields) => {
                let fields = fields
                    .into_iter()
                    .map(|(key, value)| (key, self.mask(value)));
                Value::Object(fields.collect())
            }
            other => other,
        }
    }

    fn mask_text(&self, mut text: String) -> String {
        for secret in &self.secrets {
            if text.contains(secret.as_str()) {
                text = text.replace(secret.as_str(), REDACTED);
            }
        }
        text
    }
}

impl fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWriter")
            .field("path", &self.path)
            .field("session_id", &self.session_id)
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

/// First 8 bytes of the SHA-256 of an image payload, hex encoded. Lets the
/// log tell images apart without carrying them.
pub fn payload_digest(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(&digest[..8])
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::thread;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{payload_digest, EventWriter};
    use crate::slots::SlotKind;

    fn read_rows(path: &Path) -> anyhow::Result<Vec<Value>> {
        let mut rows = Vec::new();
        for line in fs::read_to_string(path)?.lines() {
            rows.push(serde_json::from_str(line)?);
        }
        Ok(rows)
    }

    #[test]
    fn emit_value_writes_header_then_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let payload = json!({"slot": "subject"});
        let emitted = writer.emit_value("slot_state", payload)?;

        let rows = read_rows(&path)?;
        assert_eq!(rows, vec![emitted]);
        assert_eq!(rows[0]["type"], json!("slot_state"));
        assert_eq!(rows[0]["session_id"], json!("session-123"));
        assert_eq!(rows[0]["slot"], json!("subject"));
        let ts = rows[0]["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn scalar_payload_is_stored_under_value() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "s");

        let scalar = writer.emit_value("tick", json!(3))?;
        let empty = writer.emit_value("session_reset", Value::Null)?;

        assert_eq!(scalar["value"], json!(3));
        assert_eq!(empty.as_object().map(|fields| fields.len()), Some(3));
        Ok(())
    }

    #[test]
    fn secrets_are_masked_in_nested_strings() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "s")
            .with_secret("sk-live-123")
            .with_secret("   ");

        let payload = json!({
            "message": "status 403 for key sk-live-123",
            "details": [{"hint": "sk-live-123 expired"}],
            "status": 403,
        });
        let emitted = writer.emit_value("generation_failed", payload)?;

        let raw = fs::read_to_string(&path)?;
        assert!(!raw.contains("sk-live-123"));
        let message = emitted["message"].as_str();
        assert_eq!(message, Some("status 403 for key [redacted]"));
        assert_eq!(emitted["details"][0]["hint"], json!("[redacted] expired"));
        assert_eq!(emitted["status"], json!(403));
        assert!(!format!("{writer:?}").contains("sk-live-123"));
        Ok(())
    }

    #[test]
    fn notices_carry_level_slot_and_message() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "s");

        let slot = Some(SlotKind::Garment);
        let slotted = writer.record_notice("blocking", slot, "unreadable")?;
        let general = writer.record_notice("info", None, "fallback")?;

        assert_eq!(slotted["type"], json!("notice"));
        assert_eq!(slotted["level"], json!("blocking"));
        assert_eq!(slotted["slot"], json!("garment"));
        assert_eq!(general["slot"], Value::Null);
        assert_eq!(general["message"], json!("fallback"));
        Ok(())
    }

    #[test]
    fn concurrent_emitters_never_interleave_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let handles: Vec<_> = SlotKind::ALL
            .into_iter()
            .map(|slot| {
                let writer = writer.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        writer.emit_value("slot_state", json!({"slot": slot}))?;
                    }
                    anyhow::Ok(())
                })
            })
            .collect();
        for handle in handles {
            let Ok(result) = handle.join() else {
                anyhow::bail!("emitter panicked");
            };
            result?;
        }

        let rows = read_rows(&path)?;
        assert_eq!(rows.len(), 40);
        for row in &rows {
            assert_eq!(row["type"], json!("slot_state"));
        }
        Ok(())
    }

    #[test]
    fn payload_digest_is_short_and_stable() {
        assert_eq!(payload_digest("abc"), "ba7816bf8f01cfea");
        assert_eq!(payload_digest("abc"), payload_digest("abc"));
        assert_ne!(payload_digest("abc"), payload_digest("abd"));
    }
}
