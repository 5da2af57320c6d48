//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! The environment is consulted exactly once, in [`Config::load`]. Everything
//! downstream (build cache, dispatcher, scheduler) receives explicit values.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tvla.toml";

/// Spellings of a true value accepted by the `WAVES` toggle.
pub const TRUTHY_SPELLINGS: [&str; 7] = ["1", "true", "True", "TRUE", "on", "On", "ON"];

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub build: BuildConfig,
    pub run: RunConfig,
    pub paths: PathsConfig,
}

/// Simulator build knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Simulator backend. Only `verilator` is supported.
    pub simulator: String,
    /// Verilator executable name or path.
    pub verilator_bin: String,
    /// `make`, used to compile the verilated model.
    pub make_bin: String,
    /// cocotb's `cocotb-config`, queried for the VPI library and Python paths.
    pub cocotb_config_bin: String,
    /// Extra flags appended after the built-in Verilator flag set.
    pub extra_flags: Vec<String>,
    /// C/C++ flags for the generated model.
    pub cflags: String,
    /// Waveform generation. `None` defers to the CLI and then to `true`.
    pub waves: Option<bool>,
}

/// Per-batch run knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Iterations the test case performs inside one simulation.
    pub num_tests: u64,
    pub trace_filename: String,
    pub meta_filename: String,
    /// Requested worker count; `0` or negative means all available CPUs.
    pub parallel_jobs: i64,
    pub multi_dir_suffix: String,
    pub hdl_toplevel_lang: String,
    /// Cap on seed resampling when looking for a free run identity.
    pub max_identity_attempts: u32,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Root for build and run directories. Defaults to `./tvla_run/<top>`.
    pub test_root: Option<PathBuf>,
    /// JSONL event log. Disabled when unset.
    pub event_log: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            simulator: "verilator".to_string(),
            verilator_bin: "verilator".to_string(),
            make_bin: "make".to_string(),
            cocotb_config_bin: "cocotb-config".to_string(),
            extra_flags: Vec::new(),
            cflags: "-march=native -mtune=native".to_string(),
            waves: None,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_tests: 1_000,
            trace_filename: "tvla.fst".to_string(),
            meta_filename: "meta.json.gz".to_string(),
            parallel_jobs: 0,
            multi_dir_suffix: "multi".to_string(),
            hdl_toplevel_lang: "verilog".to_string(),
            max_identity_attempts: 4_096,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HarnessError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(HarnessError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the event log.
    ///
    /// FNV-1a over the canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Effective waveform setting: explicit request, then config, then on.
    #[must_use]
    pub fn waves_enabled(&self, requested: Option<bool>) -> bool {
        requested.or(self.build.waves).unwrap_or(true)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("TVLA_NUM_TESTS") {
            self.run.num_tests = parse_env_u64("TVLA_NUM_TESTS", &raw)?;
        }
        if let Some(raw) = lookup("TVLA_PARALLEL_JOBS") {
            self.run.parallel_jobs = parse_env_i64("TVLA_PARALLEL_JOBS", &raw)?;
        }
        if let Some(raw) = lookup("TVLA_TRACE_FILENAME") {
            self.run.trace_filename = raw;
        }
        if let Some(raw) = lookup("TVLA_META_FILENAME") {
            self.run.meta_filename = raw;
        }
        if let Some(raw) = lookup("TVLA_EVENT_LOG") {
            self.paths.event_log = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("TVLA_VERILATOR") {
            self.build.verilator_bin = raw;
        }
        if let Some(raw) = lookup("TVLA_MAKE") {
            self.build.make_bin = raw;
        }
        if let Some(raw) = lookup("TVLA_COCOTB_CONFIG") {
            self.build.cocotb_config_bin = raw;
        }

        for name in ["CPPFLAGS", "CFLAGS"] {
            if let Some(raw) = lookup(name) {
                if !self.build.cflags.is_empty() {
                    self.build.cflags.push(' ');
                }
                self.build.cflags.push_str(raw.trim());
            }
        }

        // Any value outside the truthy set turns waves off.
        if let Some(raw) = lookup("WAVES") {
            self.build.waves = Some(is_truthy(&raw));
        }

        Ok(())
    }

    /// Reject settings no batch can run with. Re-run after applying CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if self.build.simulator != "verilator" {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "build.simulator {:?} is not supported (expected \"verilator\")",
                    self.build.simulator
                ),
            });
        }
        for (key, value) in [
            ("build.verilator_bin", &self.build.verilator_bin),
            ("build.make_bin", &self.build.make_bin),
            ("build.cocotb_config_bin", &self.build.cocotb_config_bin),
        ] {
            if value.trim().is_empty() {
                return Err(HarnessError::InvalidConfig {
                    details: format!("{key} must not be empty"),
                });
            }
        }
        if self.run.meta_filename.trim().is_empty() {
            return Err(HarnessError::InvalidConfig {
                details: "run.meta_filename must not be empty".to_string(),
            });
        }
        if self.run.multi_dir_suffix.trim().is_empty() {
            return Err(HarnessError::InvalidConfig {
                details: "run.multi_dir_suffix cannot be empty".to_string(),
            });
        }
        if self.run.max_identity_attempts == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "run.max_identity_attempts must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Whether `raw` is one of the recognized truthy spellings.
///
/// Matching is exact: `yes`, `tRuE` or padded values are false.
#[must_use]
pub fn is_truthy(raw: &str) -> bool {
    TRUTHY_SPELLINGS.contains(&raw)
}

/// Variables whose blank value is meaningful rather than "unset".
const BLANK_IS_A_VALUE: [&str; 1] = ["WAVES"];

fn env_var(name: &str) -> Option<String> {
    present_value(name, env::var(name).ok())
}

fn present_value(name: &str, raw: Option<String>) -> Option<String> {
    raw.filter(|raw| BLANK_IS_A_VALUE.contains(&name) || !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| HarnessError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_i64(name: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|error| HarnessError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
