//! TVH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for the TVLA harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("[TVH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TVH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TVH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TVH-1101] file list {path} does not exist")]
    MissingSourceManifest { path: PathBuf },

    #[error("[TVH-1102] malformed source manifest {path}: {details}")]
    MalformedSourceManifest { path: PathBuf, details: String },

    #[error("[TVH-1103] no sources found in the file list {path}")]
    EmptyManifest { path: PathBuf },

    #[error("[TVH-1104] source file {path} does not exist")]
    MissingSource { path: PathBuf },

    #[error("[TVH-1105] no top module specified and no 'top' key found in {path}")]
    MissingTop { path: PathBuf },

    #[error(
        "[TVH-1201] TVLA runs take exactly one test case per invocation, got {count}"
    )]
    TestCaseCardinality { count: usize },

    #[error(
        "[TVH-1202] multi-run batches sample an independent seed per run; a pinned seed is not allowed"
    )]
    PinnedSeedWithMulti,

    #[error("[TVH-1203] number of runs must be a positive integer, got {value}")]
    InvalidRunCount { value: String },

    #[error("[TVH-2001] failed to build the design {top} ({status}): {diagnostic}")]
    BuildFailed {
        top: String,
        status: String,
        diagnostic: String,
    },

    #[error("[TVH-2002] failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[TVH-2003] cocotb-config {flag} failed: {details}")]
    CocotbConfig { flag: String, details: String },

    #[error("[TVH-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TVH-3002] result document parse failure in {path}: {details}")]
    ResultParse { path: PathBuf, details: String },

    #[error("[TVH-3003] no free run identity after {attempts} attempts")]
    IdentityExhausted { attempts: u32 },

    #[error("[TVH-3004] no metadata files were created during the multi test runs")]
    NoMetadata,

    #[error("[TVH-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TVH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HarnessError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "TVH-1001",
            Self::MissingConfig { .. } => "TVH-1002",
            Self::ConfigParse { .. } => "TVH-1003",
            Self::MissingSourceManifest { .. } => "TVH-1101",
            Self::MalformedSourceManifest { .. } => "TVH-1102",
            Self::EmptyManifest { .. } => "TVH-1103",
            Self::MissingSource { .. } => "TVH-1104",
            Self::MissingTop { .. } => "TVH-1105",
            Self::TestCaseCardinality { .. } => "TVH-1201",
            Self::PinnedSeedWithMulti => "TVH-1202",
            Self::InvalidRunCount { .. } => "TVH-1203",
            Self::BuildFailed { .. } => "TVH-2001",
            Self::Spawn { .. } => "TVH-2002",
            Self::CocotbConfig { .. } => "TVH-2003",
            Self::Io { .. } => "TVH-3001",
            Self::ResultParse { .. } => "TVH-3002",
            Self::IdentityExhausted { .. } => "TVH-3003",
            Self::NoMetadata => "TVH-3004",
            Self::Serialization { .. } => "TVH-3101",
            Self::Runtime { .. } => "TVH-3900",
        }
    }

    /// Configuration-class errors are detected before any build or run.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::MissingSourceManifest { .. }
                | Self::MalformedSourceManifest { .. }
                | Self::EmptyManifest { .. }
                | Self::MissingSource { .. }
                | Self::MissingTop { .. }
                | Self::TestCaseCardinality { .. }
                | Self::PinnedSeedWithMulti
                | Self::InvalidRunCount { .. }
        )
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Spawn { .. } | Self::IdentityExhausted { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
