use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub ingestions: u64,
    pub fallbacks: u64,
    pub generations: u64,
    pub failures: u64,
}

pub fn write_summary(
    path: &Path,
    summary: &SessionSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pretty = serde_json::to_string_pretty(&Value::Object(payload))?;
    std::fs::write(path, pretty)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{write_summary, SessionSummary};

    #[test]
    fn summary_round_trips_through_disk_with_extras() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("out").join("summary.json");
        let summary = SessionSummary {
            session_id: "session-1".to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: "2026-01-01T00:01:00Z".to_string(),
            ingestions: 2,
            fallbacks: 1,
            generations: 1,
            failures: 0,
        };
        let mut extra = Map::new();
        extra.insert("gateway".to_string(), json!("dryrun"));
        write_summary(&path, &summary, Some(&extra))?;

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["gateway"], json!("dryrun"));
        assert_eq!(raw["fallbacks"], json!(1));
        assert!(raw["ts"].is_string());
        let parsed: SessionSummary = serde_json::from_value(raw)?;
        assert_eq!(parsed, summary);
        Ok(())
    }
}
