//! Dispatcher: executes one logical run and reports its outcome.
//!
//! A run failure never escapes as an error. Crashes, missing result documents
//! and unparsable results all become a degraded [`RunOutcome`] so sibling runs
//! in the batch keep going.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::build::{BuildHandle, ExecuteRequest, SimulatorBackend};
use crate::core::errors::{HarnessError, Result};
use crate::logger::EventLog;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::results::{ResultSummary, TestSuite, parse_results_file};
use crate::run::identity::RunIdentity;

/// The one test case a batch runs, and the module that defines it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSelection {
    pub module: String,
    pub case: String,
}

impl TestSelection {
    /// Leakage batches pair runs by seed, so exactly one test case is allowed.
    pub fn single(module: &str, cases: &[String]) -> Result<Self> {
        match cases {
            [case] if !case.trim().is_empty() => Ok(Self {
                module: module.to_string(),
                case: case.clone(),
            }),
            _ => Err(HarnessError::TestCaseCardinality { count: cases.len() }),
        }
    }
}

/// Batch-wide settings shared by every run.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub top: String,
    pub hdl_toplevel_lang: String,
    pub selection: TestSelection,
    /// Environment handed to every run before per-run overrides.
    pub base_env: BTreeMap<String, String>,
    pub trace_filename: String,
    pub meta_filename: String,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    NoResult,
}

/// What one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub identity: RunIdentity,
    pub run_dir: PathBuf,
    pub result_file: Option<PathBuf>,
    pub suites: Vec<TestSuite>,
    /// Metadata file, when the run wrote one.
    pub meta_file: Option<PathBuf>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        if self.result_file.is_none() || self.error.is_some() {
            RunStatus::NoResult
        } else if ResultSummary::from_suites(&self.suites).all_passed() {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        }
    }
}

pub struct Dispatcher {
    backend: Arc<dyn SimulatorBackend>,
    plan: DispatchPlan,
    log: EventLog,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn SimulatorBackend>, plan: DispatchPlan, log: EventLog) -> Self {
        Self { backend, plan, log }
    }

    pub fn plan(&self) -> &DispatchPlan {
        &self.plan
    }

    /// Private copy of the base environment with `overrides` applied.
    pub fn run_env(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.plan.base_env.clone();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Execute one run in `run_dir` against the shared, read-only `build`.
    pub fn run(
        &self,
        identity: &RunIdentity,
        run_dir: &Path,
        build: &BuildHandle,
        overrides: &BTreeMap<String, String>,
    ) -> RunOutcome {
        let started = Instant::now();
        let run_id = identity.dir_name();
        self.log.record(
            &LogEntry::new(EventType::RunStart, Severity::Info)
                .run(&run_id, identity.seed)
                .path(run_dir)
                .details(format!(
                    "{} seed={} mode={:?}",
                    self.plan.selection.case, identity.seed, identity.mode
                )),
        );

        let mut outcome = RunOutcome {
            identity: *identity,
            run_dir: run_dir.to_path_buf(),
            result_file: None,
            suites: Vec::new(),
            meta_file: None,
            error: None,
            elapsed_ms: 0,
        };

        match self.execute(identity, run_dir, build, overrides) {
            Ok(Some((file, suites))) => {
                outcome.result_file = Some(file);
                outcome.suites = suites;
            }
            Ok(None) => {}
            Err(err) => outcome.error = Some(err.to_string()),
        }

        let meta = run_dir.join(&self.plan.meta_filename);
        outcome.meta_file = meta.exists().then_some(meta);
        outcome.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let entry = match outcome.status() {
            RunStatus::NoResult => LogEntry::new(EventType::RunNoResult, Severity::Warning)
                .details(
                    outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "no results file found".to_string()),
                )
                .ok(false),
            status => {
                let summary = ResultSummary::from_suites(&outcome.suites);
                LogEntry::new(EventType::RunComplete, Severity::Info)
                    .details(format!(
                        "{status:?}: {} cases, {} failures, {} errors",
                        summary.cases, summary.failures, summary.errors
                    ))
                    .ok(status == RunStatus::Passed)
            }
        };
        self.log.record(
            &entry
                .run(&run_id, identity.seed)
                .path(run_dir)
                .duration_ms(outcome.elapsed_ms),
        );
        outcome
    }

    fn execute(
        &self,
        identity: &RunIdentity,
        run_dir: &Path,
        build: &BuildHandle,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Option<(PathBuf, Vec<TestSuite>)>> {
        fs::create_dir_all(run_dir).map_err(|source| HarnessError::io(run_dir, source))?;
        let env = self.run_env(overrides);
        let request = ExecuteRequest {
            executable: &build.executable,
            top: &self.plan.top,
            hdl_toplevel_lang: &self.plan.hdl_toplevel_lang,
            test_module: &self.plan.selection.module,
            test_case: &self.plan.selection.case,
            run_dir,
            seed: identity.seed,
            env: &env,
            trace_filename: build.waves.then_some(self.plan.trace_filename.as_str()),
            verbose: self.plan.verbose,
        };

        let Some(file) = self.backend.execute(&request)? else {
            return Ok(None);
        };
        let suites = parse_results_file(&file)?;
        Ok(Some((file, suites)))
    }
}
