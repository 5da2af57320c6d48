//! Event logging: JSONL event log plus operator-facing stderr diagnostics.

pub mod jsonl;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::logger::jsonl::{JsonlWriter, LogEntry, Severity};

/// Health of the JSONL log file, reported alongside batch results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLogStatus {
    pub path: PathBuf,
    /// `normal`, `stderr` or `discard`.
    pub state: &'static str,
    pub lines_written: u64,
}

impl EventLogStatus {
    pub fn is_degraded(&self) -> bool {
        self.state != "normal"
    }
}

/// Thread-safe, cheaply-cloneable event sink shared by scheduler workers.
///
/// Entries go to the JSONL log when one is configured. Warnings and errors are
/// always mirrored to stderr; info entries only when `verbose` is set.
#[derive(Clone)]
pub struct EventLog {
    writer: Option<Arc<Mutex<JsonlWriter>>>,
    verbose: bool,
}

impl EventLog {
    /// Log to `path` when given, otherwise only to stderr.
    pub fn new(path: Option<&Path>, verbose: bool) -> Self {
        Self {
            writer: path.map(|p| Arc::new(Mutex::new(JsonlWriter::open(p)))),
            verbose,
        }
    }

    /// A sink that records nothing and prints only warnings and errors.
    pub fn disabled() -> Self {
        Self {
            writer: None,
            verbose: false,
        }
    }

    pub fn record(&self, entry: &LogEntry) {
        let mirror = self.verbose || entry.severity != Severity::Info;
        if mirror {
            let label = match entry.severity {
                Severity::Info => "info",
                Severity::Warning => "warning",
                Severity::Error => "error",
            };
            let details = entry.details.as_deref().unwrap_or("");
            let run = entry
                .run_id
                .as_deref()
                .map_or_else(String::new, |id| format!(" [{id}]"));
            let _ = writeln!(
                io::stderr(),
                "[TVLA] {label}: {:?}{run} {details}",
                entry.event
            );
        }
        if let Some(writer) = &self.writer {
            writer.lock().write_entry(entry);
        }
    }

    pub fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.lock().flush();
        }
    }

    /// `None` when no log file is configured.
    pub fn status(&self) -> Option<EventLogStatus> {
        self.writer.as_ref().map(|writer| {
            let writer = writer.lock();
            EventLogStatus {
                path: writer.path().to_path_buf(),
                state: writer.state(),
                lines_written: writer.lines_written(),
            }
        })
    }
}
