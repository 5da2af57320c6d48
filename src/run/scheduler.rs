//! Scheduler: turns one invocation into a batch of runs and fans it out.
//!
//! Paired batches run one seed twice (random, then fixed data). Multi-run
//! batches sample an independent seed per run and record every produced
//! metadata file in the batch manifest once all workers are done.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::Rng;
use serde::Serialize;

use crate::build::BuildHandle;
use crate::core::config::RunConfig;
use crate::core::errors::{HarnessError, Result};
use crate::core::paths::relative_to;
use crate::logger::EventLog;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::results::ResultSummary;
use crate::run::dispatcher::{Dispatcher, RunOutcome, RunStatus};
use crate::run::identity::{RunIdentity, RunMode, mask_seed, next_candidate, random_seed};
use crate::run::manifest::RunManifest;
use crate::run::pool::WorkerPool;

/// Environment toggle that forces the design's stimulus randomization off.
pub const DISABLE_RANDOM_VAR: &str = "TVLA_DISABLE_RANDOM";

/// Batch-wide environment every run starts from.
pub fn base_env(run: &RunConfig, trace_filename: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("TVLA".to_string(), "1".to_string());
    env.insert("NUM_TESTS".to_string(), run.num_tests.to_string());
    env.insert("TRACE_FILENAME".to_string(), trace_filename.to_string());
    env.insert("TVLA_META_FILENAME".to_string(), run.meta_filename.clone());
    env
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "runs")]
pub enum BatchMode {
    /// One seed, random and fixed-data runs.
    Paired,
    /// One seed, random run only.
    Single,
    /// N runs, each with its own sampled seed.
    Multi(usize),
}

/// A validated batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub mode: BatchMode,
    /// Masked pinned seed, paired and single modes only.
    pub seed: Option<u32>,
}

impl BatchPlan {
    pub fn new(mode: BatchMode, seed: Option<i64>) -> Result<Self> {
        match mode {
            BatchMode::Multi(0) => Err(HarnessError::InvalidRunCount {
                value: "0".to_string(),
            }),
            BatchMode::Multi(_) if seed.is_some() => Err(HarnessError::PinnedSeedWithMulti),
            _ => Ok(Self {
                mode,
                seed: seed.map(mask_seed),
            }),
        }
    }

    pub const fn run_count(&self) -> usize {
        match self.mode {
            BatchMode::Paired => 2,
            BatchMode::Single => 1,
            BatchMode::Multi(n) => n,
        }
    }
}

/// Where and how wide a batch runs.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub test_root: PathBuf,
    pub multi_dir_suffix: String,
    pub parallel_jobs: i64,
    pub max_identity_attempts: u32,
    pub meta_filename: String,
}

impl SchedulerSettings {
    pub fn from_config(run: &RunConfig, test_root: PathBuf) -> Self {
        Self {
            test_root,
            multi_dir_suffix: run.multi_dir_suffix.clone(),
            parallel_jobs: run.parallel_jobs,
            max_identity_attempts: run.max_identity_attempts,
            meta_filename: run.meta_filename.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub mode: BatchMode,
    pub workers: usize,
    pub runs: Vec<RunOutcome>,
    pub summary: ResultSummary,
    pub manifest_path: Option<PathBuf>,
    /// Entries appended to the manifest by this batch.
    pub manifest_entries: Vec<PathBuf>,
    /// Run directories that produced no metadata file.
    pub missing: Vec<PathBuf>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|run| run.status() == status).count()
    }
}

struct RunTask {
    identity: RunIdentity,
    run_dir: PathBuf,
    overrides: BTreeMap<String, String>,
}

pub struct Scheduler {
    dispatcher: Dispatcher,
    plan: BatchPlan,
    settings: SchedulerSettings,
    log: EventLog,
}

impl Scheduler {
    pub fn new(
        dispatcher: Dispatcher,
        plan: BatchPlan,
        settings: SchedulerSettings,
        log: EventLog,
    ) -> Self {
        Self {
            dispatcher,
            plan,
            settings,
            log,
        }
    }

    /// `<test_root>/<test_case>`.
    pub fn case_dir(&self) -> PathBuf {
        self.settings
            .test_root
            .join(&self.dispatcher.plan().selection.case)
    }

    /// Root of a multi-run batch, holding its run directories and manifest.
    pub fn batch_root(&self) -> PathBuf {
        self.case_dir().join(&self.settings.multi_dir_suffix)
    }

    /// Run the whole batch against the shared `build`.
    pub fn run<R: Rng + ?Sized>(&self, build: &BuildHandle, rng: &mut R) -> Result<BatchReport> {
        let started = Instant::now();
        let tasks = match self.plan.mode {
            BatchMode::Paired | BatchMode::Single => self.paired_tasks(rng),
            BatchMode::Multi(n) => self.multi_tasks(n, rng)?,
        };

        let pool = WorkerPool::new(tasks.len(), self.settings.parallel_jobs);
        self.log.record(
            &LogEntry::new(EventType::BatchStart, Severity::Info)
                .path(&self.case_dir())
                .details(format!(
                    "{:?}: {} runs on {} workers",
                    self.plan.mode,
                    tasks.len(),
                    pool.workers()
                )),
        );

        let runs = pool.run(tasks, |_, task| {
            self.dispatcher
                .run(&task.identity, &task.run_dir, build, &task.overrides)
        })?;

        let mut report = BatchReport {
            mode: self.plan.mode,
            workers: pool.workers(),
            summary: ResultSummary::from_suites(runs.iter().flat_map(|run| run.suites.iter())),
            runs,
            manifest_path: None,
            manifest_entries: Vec::new(),
            missing: Vec::new(),
            elapsed_ms: 0,
        };

        let outcome = match self.plan.mode {
            BatchMode::Multi(_) => self.record_manifest(&mut report),
            BatchMode::Paired | BatchMode::Single => Ok(()),
        };
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut entry = LogEntry::new(EventType::BatchComplete, Severity::Info)
            .path(&self.case_dir())
            .duration_ms(report.elapsed_ms)
            .details(format!(
                "{} passed, {} failed, {} without results",
                report.count(RunStatus::Passed),
                report.count(RunStatus::Failed),
                report.count(RunStatus::NoResult)
            ))
            .ok(outcome.is_ok());
        if let Err(err) = &outcome {
            entry = entry.error(err);
        }
        self.log.record(&entry);
        self.log.flush();

        outcome.map(|()| report)
    }

    fn paired_tasks<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<RunTask> {
        let seed = self.plan.seed.unwrap_or_else(|| random_seed(rng));
        let modes: &[RunMode] = match self.plan.mode {
            BatchMode::Single => &[RunMode::Random],
            _ => &[RunMode::Random, RunMode::FixedData],
        };
        let case_dir = self.case_dir();

        modes
            .iter()
            .map(|&mode| {
                let identity = RunIdentity::new(seed, mode);
                let mut overrides = BTreeMap::new();
                if mode == RunMode::FixedData {
                    overrides.insert(DISABLE_RANDOM_VAR.to_string(), "1".to_string());
                }
                RunTask {
                    run_dir: case_dir.join(identity.dir_name()),
                    identity,
                    overrides,
                }
            })
            .collect()
    }

    /// Allocate all `count` identities before dispatch, so none collides with
    /// an existing metadata file or with another run of this batch.
    fn multi_tasks<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Result<Vec<RunTask>> {
        let batch_root = self.batch_root();
        if batch_root.is_dir() {
            self.log.record(
                &LogEntry::new(EventType::BatchStart, Severity::Warning)
                    .path(&batch_root)
                    .details("multi-run directory already exists, appending to its results"),
            );
        }
        fs::create_dir_all(&batch_root).map_err(|source| HarnessError::io(&batch_root, source))?;

        let mut claimed: HashSet<u32> = HashSet::with_capacity(count);
        let mut tasks = Vec::with_capacity(count);
        for index in 0..count {
            let identity = next_candidate(
                rng,
                index,
                |candidate| {
                    claimed.contains(&candidate.seed)
                        || self.meta_path(&batch_root, candidate).exists()
                },
                self.settings.max_identity_attempts,
            )?;
            claimed.insert(identity.seed);
            tasks.push(RunTask {
                run_dir: batch_root.join(identity.dir_name()),
                identity,
                overrides: BTreeMap::new(),
            });
        }
        Ok(tasks)
    }

    fn meta_path(&self, batch_root: &Path, identity: &RunIdentity) -> PathBuf {
        batch_root
            .join(identity.dir_name())
            .join(&self.settings.meta_filename)
    }

    fn record_manifest(&self, report: &mut BatchReport) -> Result<()> {
        let batch_root = self.batch_root();
        let manifest = RunManifest::new(&batch_root);

        for run in &report.runs {
            match run.meta_file.as_deref() {
                Some(meta) => report
                    .manifest_entries
                    .push(relative_to(meta, &batch_root).unwrap_or_else(|| meta.to_path_buf())),
                None => report.missing.push(run.run_dir.clone()),
            }
        }

        if !report.missing.is_empty() {
            self.log.record(
                &LogEntry::new(EventType::ManifestAppend, Severity::Warning)
                    .path(manifest.path())
                    .details(format!(
                        "{} of {} runs produced no metadata file",
                        report.missing.len(),
                        report.runs.len()
                    )),
            );
        }
        if report.manifest_entries.is_empty() {
            return Err(HarnessError::NoMetadata);
        }

        manifest.append(&report.manifest_entries)?;
        report.manifest_path = Some(manifest.path().to_path_buf());
        self.log.record(
            &LogEntry::new(EventType::ManifestAppend, Severity::Info)
                .path(manifest.path())
                .details(format!("appended {} entries", report.manifest_entries.len())),
        );
        Ok(())
    }
}
