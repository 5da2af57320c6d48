//! Simulator capability interface: compile sources, execute one test case.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::Result;

/// Waveform trace formats the simulator can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    Fst,
    Vcd,
    Saif,
}

impl TraceFormat {
    /// Derive the format from a trace filename's extension.
    ///
    /// No filename means VCD. An unrecognized extension yields `None`, in
    /// which case no format flag is passed and the simulator default applies.
    #[must_use]
    pub fn from_filename(filename: Option<&str>) -> Option<Self> {
        let Some(name) = filename.filter(|n| !n.is_empty()) else {
            return Some(Self::Vcd);
        };
        match Path::new(name).extension()?.to_str()? {
            "fst" => Some(Self::Fst),
            "vcd" => Some(Self::Vcd),
            "saif" => Some(Self::Saif),
            _ => None,
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Fst => "fst",
            Self::Vcd => "vcd",
            Self::Saif => "saif",
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Everything the backend needs to compile the design.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub sources: Vec<PathBuf>,
    pub top: String,
    pub build_dir: PathBuf,
    pub waves: bool,
    pub trace_format: Option<TraceFormat>,
    pub verbose: bool,
}

/// One test-case execution against a built artifact.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteRequest<'a> {
    pub executable: &'a Path,
    pub top: &'a str,
    pub hdl_toplevel_lang: &'a str,
    pub test_module: &'a str,
    pub test_case: &'a str,
    pub run_dir: &'a Path,
    pub seed: u32,
    pub env: &'a BTreeMap<String, String>,
    /// Trace file name, `None` when waves are off.
    pub trace_filename: Option<&'a str>,
    pub verbose: bool,
}

/// A simulator toolchain. The build cache and dispatcher depend only on this.
pub trait SimulatorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Location of the runnable artifact inside `build_dir`.
    fn executable_path(&self, build_dir: &Path, top: &str) -> PathBuf {
        build_dir.join(top)
    }

    /// Compile the design into `request.build_dir`. The directory exists and is empty.
    fn build(&self, request: &BuildRequest) -> Result<()>;

    /// Run one test case. Returns the result document path, or `None` when
    /// the run produced none.
    fn execute(&self, request: &ExecuteRequest<'_>) -> Result<Option<PathBuf>>;
}
