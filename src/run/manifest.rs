//! Run manifest: append-only list of per-run metadata files for a multi-run batch.
//!
//! One path per line, relative to the batch root. The file accumulates across
//! invocations and is never truncated. Only the scheduler writes it, once per
//! batch, after every worker has finished.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::core::errors::{HarnessError, Result};

/// File name of the manifest inside the batch root.
pub const MANIFEST_FILENAME: &str = "meta.list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunManifest {
    path: PathBuf,
}

impl RunManifest {
    pub fn new(batch_root: &Path) -> Self {
        Self {
            path: batch_root.join(MANIFEST_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entries` in order with one `write_all`, creating the file if needed.
    pub fn append(&self, entries: &[PathBuf]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut block = String::new();
        for entry in entries {
            block.push_str(&entry.to_string_lossy());
            block.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HarnessError::io(&self.path, source))?;
        file.write_all(block.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| HarnessError::io(&self.path, source))
    }

    /// Entries in file order; a missing manifest is empty.
    pub fn read(&self) -> Result<Vec<PathBuf>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw
                .lines()
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(HarnessError::io(&self.path, source)),
        }
    }
}
