//! JSONL event log: append-only line-delimited JSON, one object per event.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! tailing reader never sees a partial line.
//!
//! Degradation chain:
//! 1. Configured file path
//! 2. stderr with `[TVLA-JSONL]` prefix
//! 3. Silent discard (a logging failure must never fail a batch)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Harness event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BatchStart,
    BuildStart,
    BuildReuse,
    BuildComplete,
    RunStart,
    RunComplete,
    RunNoResult,
    ManifestAppend,
    BatchComplete,
    Error,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Run directory name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            run_id: None,
            seed: None,
            path: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn run(mut self, run_id: impl Into<String>, seed: u32) -> Self {
        self.run_id = Some(run_id.into());
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn path(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn ok(mut self, ok: bool) -> Self {
        self.ok = Some(ok);
        self
    }

    #[must_use]
    pub fn error(mut self, err: &HarnessError) -> Self {
        self.error_code = Some(err.code().to_string());
        self.details = Some(err.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Append-only JSONL writer with stderr fallback.
pub struct JsonlWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    lines_written: u64,
}

impl JsonlWriter {
    /// Open the log file in append mode. Falls back to stderr on failure.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match open_append(&path) {
            Ok(file) => Self {
                path,
                writer: Some(BufWriter::new(file)),
                state: WriterState::Normal,
                lines_written: 0,
            },
            Err(err) => {
                let _ = writeln!(
                    io::stderr(),
                    "[TVLA-JSONL] cannot open {}: {err}; using stderr",
                    path.display()
                );
                Self {
                    path,
                    writer: None,
                    state: WriterState::Stderr,
                    lines_written: 0,
                }
            }
        }
    }

    /// Write a single log entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[TVLA-JSONL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut()
            && w.flush().is_err()
        {
            self.degrade();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &str) {
        match self.state {
            WriterState::Normal => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.lines_written += 1;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[TVLA-JSONL] {line}").is_ok() {
                    self.lines_written += 1;
                } else {
                    self.state = WriterState::Discard;
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(
                    io::stderr(),
                    "[TVLA-JSONL] write to {} failed, using stderr",
                    self.path.display()
                );
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| HarnessError::io(parent, source))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| HarnessError::io(path, source))
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_entry_produces_valid_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut writer = JsonlWriter::open(&path);

        writer.write_entry(&LogEntry::new(EventType::BatchStart, Severity::Info));
        writer.write_entry(
            &LogEntry::new(EventType::RunComplete, Severity::Info)
                .run("0000002a", 42)
                .ok(true),
        );
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "batch_start");
        assert_eq!(first["severity"], "info");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["run_id"], "0000002a");
        assert_eq!(second["seed"], 42);
        assert_eq!(writer.lines_written(), 2);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        {
            let mut writer = JsonlWriter::open(&path);
            writer.write_entry(&LogEntry::new(EventType::BuildStart, Severity::Info));
        }
        {
            let mut writer = JsonlWriter::open(&path);
            writer.write_entry(&LogEntry::new(EventType::BuildComplete, Severity::Info));
        }
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn unwritable_path_falls_back_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let writer = JsonlWriter::open(blocker.join("events.jsonl"));
        assert_eq!(writer.state(), "stderr");
    }

    #[test]
    fn optional_fields_omitted_when_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(&path);
        writer.write_entry(&LogEntry::new(EventType::BatchComplete, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"run_id\""));
        assert!(!line.contains("\"seed\""));
        assert!(!line.contains("\"error_code\""));
    }

    #[test]
    fn error_entry_carries_code() {
        let entry = LogEntry::new(EventType::Error, Severity::Error)
            .error(&HarnessError::NoMetadata);
        assert_eq!(entry.error_code.as_deref(), Some("TVH-3004"));
    }
}
