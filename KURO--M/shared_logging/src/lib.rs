#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the Kuro crates.
//!
//! Every record is appended to a `.jsonl` file and mirrored to `tracing`, so
//! the same line shows up in the operator console and in the durable log.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

impl LogLevel {
    /// Lowercase label used in console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the log (`pipeline`, `dispatcher`, ...).
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Dotted event name, e.g. `pipeline.decision.received`.
    pub message: String,
    /// Request the record belongs to, when emitted inside a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Arbitrary JSON fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            request_id: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Tags the record with a request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Merges the fields of a JSON object into the metadata. Non-object values
    /// are stored under `value`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        match metadata {
            serde_json::Value::Object(map) => self.metadata.extend(map),
            serde_json::Value::Null => {}
            other => {
                self.metadata.insert("value".into(), other);
            }
        }
        self
    }

    /// Emits the record through `tracing` at the matching level.
    pub fn mirror_to_tracing(&self) {
        let fields = serde_json::Value::Object(self.metadata.clone());
        let request_id = self.request_id.as_deref().unwrap_or("-");
        match self.level {
            LogLevel::Debug => tracing::debug!(
                module = %self.module,
                request_id,
                fields = %fields,
                "{}",
                self.message
            ),
            LogLevel::Info => tracing::info!(
                module = %self.module,
                request_id,
                fields = %fields,
                "{}",
                self.message
            ),
            LogLevel::Warn => tracing::warn!(
                module = %self.module,
                request_id,
                fields = %fields,
                "{}",
                self.message
            ),
            LogLevel::Error => tracing::error!(
                module = %self.module,
                request_id,
                fields = %fields,
                "{}",
                self.message
            ),
        }
    }
}

/// Thread-safe JSON logger with append-only semantics.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    writer: Mutex<File>,
    mirror: bool,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path. Records are mirrored to
    /// `tracing` by default.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
            mirror: true,
        })
    }

    /// Disables or enables mirroring to `tracing`.
    #[must_use]
    pub const fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Writes a log record as JSON line.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if self.mirror {
            record.mirror_to_tracing();
        }
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Returns the underlying file path (useful for tests).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("test.log")).unwrap();
        logger
            .log(&LogRecord::new("pipeline", LogLevel::Info, "hello"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"hello\""));
        assert!(!content.contains("request_id"));
    }

    #[test]
    fn record_carries_request_id_and_fields() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("nested/kuro.jsonl"))
            .unwrap()
            .with_mirror(false);
        let record = LogRecord::new("dispatcher", LogLevel::Warn, "dispatch.denied")
            .with_request_id("req-42")
            .with_metadata(serde_json::json!({ "capability": "run_command" }));
        logger.log(&record).unwrap();
        logger.log(&record).unwrap();

        let content = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: LogRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.request_id.as_deref(), Some("req-42"));
        assert_eq!(parsed.level, LogLevel::Warn);
        assert_eq!(parsed.metadata["capability"], "run_command");
    }

    #[test]
    fn scalar_metadata_is_kept_under_value() {
        let record = LogRecord::new("m", LogLevel::Debug, "x").with_metadata(serde_json::json!(3));
        assert_eq!(record.metadata["value"], 3);
    }
}
