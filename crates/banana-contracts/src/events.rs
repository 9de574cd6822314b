use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Something worth an audit line during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    GenerationStarted {
        model: String,
        output: String,
        session: Option<String>,
    },
    ArtifactWritten {
        path: String,
        bytes: u64,
        metadata_embedded: bool,
    },
    SessionWritten {
        path: String,
        turns: usize,
    },
    GenerationFailed {
        error: String,
    },
    SessionDeleted {
        path: String,
        bytes: u64,
    },
}

/// Append-only JSONL event log: one compact object per line carrying
/// `type`, `run_id` and `ts` alongside the event fields.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    run_id: String,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_run_id(path, Uuid::new_v4().to_string())
    }

    pub fn with_run_id(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&self, event: &RunEvent) -> anyhow::Result<Value> {
        let mut line = Map::new();
        if let Value::Object(fields) = serde_json::to_value(event)? {
            line.extend(fields);
        }
        line.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        line.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');
        file.write_all(&encoded)?;
        Ok(Value::Object(line))
    }
}

/// Records `event` when a log is configured. Logging failures are reported
/// through tracing and never fail the run.
pub fn record_optional(log: Option<&EventLog>, event: RunEvent) {
    if let Some(log) = log {
        if let Err(err) = log.record(&event) {
            tracing::warn!(path = %log.path().display(), "failed to append event: {err:#}");
        }
    }
}
