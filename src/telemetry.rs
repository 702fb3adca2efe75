//! Append-only JSONL telemetry sink.
//!
//! Disabled unless `TABMIND_TELEMETRY_DIR` is set. Emission is best-effort:
//! a failed write is logged to stderr and never surfaces to callers.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use crate::env_optional;

#[derive(Debug, Serialize)]
struct TelemetryEvent<'a> {
    ts: String,
    event: &'a str,
    properties: serde_json::Value,
}

#[derive(Clone)]
pub(crate) struct Telemetry {
    dir: Option<PathBuf>,
}

impl Telemetry {
    pub(crate) fn from_env() -> Self {
        Self {
            dir: env_optional("TABMIND_TELEMETRY_DIR").map(PathBuf::from),
        }
    }

    #[cfg(test)]
    pub(crate) fn disabled() -> Self {
        Self { dir: None }
    }

    pub(crate) fn emit(&self, event: &str, properties: serde_json::Value) {
        let Some(dir) = &self.dir else {
            return;
        };
        let entry = TelemetryEvent {
            ts: Utc::now().to_rfc3339(),
            event,
            properties,
        };
        if let Err(e) = Self::append(dir, &entry) {
            eprintln!("[telemetry] dropped event {event}: {e}");
        }
    }

    fn append(dir: &PathBuf, entry: &TelemetryEvent) -> Result<(), Box<dyn std::error::Error>> {
        fs::create_dir_all(dir)?;
        let filename = format!("events-{}.jsonl", Utc::now().format("%Y-%m-%d"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(filename))?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_appends_jsonl() {
        let dir = std::env::temp_dir()
            .join("tabmind_test")
            .join(format!("telemetry_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let telemetry = Telemetry {
            dir: Some(dir.clone()),
        };
        telemetry.emit("integration_connect_started", json!({"kind": "gmail"}));
        telemetry.emit(
            "integration_connect_finished",
            json!({"kind": "gmail", "success": true, "duration_ms": 12}),
        );

        let filename = format!("events-{}.jsonl", Utc::now().format("%Y-%m-%d"));
        let raw = fs::read_to_string(dir.join(filename)).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "integration_connect_started");
        assert_eq!(first["properties"]["kind"], "gmail");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["properties"]["success"], true);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        // No directory configured: emit must be a no-op, not an error.
        Telemetry::disabled().emit("anything", json!({}));
    }
}
