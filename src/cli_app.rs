//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use tvla_harness::build::{BuildCache, BuildRequest, SimulatorBackend, TraceFormat, VerilatorBackend};
use tvla_harness::core::config::Config;
use tvla_harness::core::errors::HarnessError;
use tvla_harness::core::paths::{build_dir, default_test_root, resolve_absolute_path};
use tvla_harness::design::{self, normalize_test_module};
use tvla_harness::logger::{EventLog, EventLogStatus};
use tvla_harness::logger::jsonl::{EventType, LogEntry, Severity};
use tvla_harness::results::{ResultSummary, TestSuite, parse_results_file};
use tvla_harness::run::{
    BatchMode, BatchPlan, BatchReport, DispatchPlan, Dispatcher, RunManifest, RunStatus,
    Scheduler, SchedulerSettings, TestSelection, base_env,
};

/// TVLA batch runner: paired and multi-run leakage test batches on a Verilator build.
#[derive(Debug, Parser)]
#[command(
    name = "tvla-run",
    author,
    version,
    about = "Run TVLA leakage-test batches on a Verilator simulation",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Build if needed, then run a paired, single or multi-run batch.
    Run(RunArgs),
    /// Show build freshness and batch history for a design.
    Status(StatusArgs),
    /// Parse result documents and summarize them.
    Results(ResultsArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Options shared by commands that locate a design and its outputs.
#[derive(Debug, Clone, Args)]
struct DesignArgs {
    /// Source file list: `.f` (one path per line) or `.json` (`sources`, `top`).
    #[arg(value_name = "FILELIST")]
    filelist: PathBuf,
    /// Top module; overrides the file list's `top`.
    #[arg(long)]
    top: Option<String>,
    /// Root of run and build directories (default: ./tvla_run/<top>).
    #[arg(long, value_name = "DIR")]
    test_root: Option<PathBuf>,
    /// Waveform trace file written by each run.
    #[arg(long, value_name = "NAME")]
    trace_filename: Option<String>,
    /// Build with waveform tracing.
    #[arg(long, overrides_with = "no_waves")]
    waves: bool,
    /// Build without waveform tracing.
    #[arg(long, overrides_with = "waves")]
    no_waves: bool,
}

impl DesignArgs {
    fn waves_request(&self) -> Option<bool> {
        if self.waves {
            Some(true)
        } else if self.no_waves {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[command(flatten)]
    design: DesignArgs,
    /// Test module, as a dotted module name or a `./path/to/module.py` path.
    #[arg(long, value_name = "MODULE")]
    test_module: String,
    /// Test case to run; exactly one per invocation.
    #[arg(long, num_args = 1.., required = true, value_name = "CASE")]
    test_cases: Vec<String>,
    /// Pin the seed of a paired or single batch (masked to 31 bits).
    #[arg(long, allow_negative_numbers = true)]
    seed: Option<i64>,
    /// Force a clean rebuild even if the artifact is fresh.
    #[arg(long)]
    build: bool,
    /// Number of tests each run executes.
    #[arg(long, value_name = "N")]
    num_tests: Option<u64>,
    /// Parallel workers; 0 or negative means all CPUs.
    #[arg(short = 'j', long = "parallel-jobs", allow_negative_numbers = true)]
    parallel_jobs: Option<i64>,
    /// Run only the randomized half of the pair.
    #[arg(long, conflicts_with = "multi")]
    single_test: bool,
    /// Run N independent randomized runs and append them to the batch manifest.
    #[arg(long, visible_alias = "multiple-runs", value_name = "NUM_RUNS")]
    multi: Option<String>,
    /// Sub-directory of the test case directory holding multi-run batches.
    #[arg(long, value_name = "NAME")]
    multi_dir_suffix: Option<String>,
    /// Exit with status 4 when any run failed or produced no results.
    #[arg(long)]
    strict: bool,
    /// Show simulator output and informational events.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct StatusArgs {
    #[command(flatten)]
    design: DesignArgs,
    /// Also report run directories and manifest entries for this test case.
    #[arg(long, value_name = "CASE")]
    test_case: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ResultsArgs {
    /// Result documents to summarize.
    #[arg(value_name = "XML", required = true)]
    files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Batch completed but some runs failed or produced no results (`--strict`),
    /// or a result document reports failures.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        if err.is_configuration() {
            Self::User(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_batch(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Results(args) => run_results(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

/// Map `--single-test` / `--multi` onto a batch mode.
fn batch_mode(single_test: bool, multi: Option<&str>) -> Result<BatchMode, HarnessError> {
    match multi {
        Some(raw) => {
            let runs = raw.trim().parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                HarnessError::InvalidRunCount {
                    value: raw.to_string(),
                }
            })?;
            Ok(BatchMode::Multi(runs))
        }
        None if single_test => Ok(BatchMode::Single),
        None => Ok(BatchMode::Paired),
    }
}

fn resolve_test_root(design: &DesignArgs, config: &Config, top: &str) -> PathBuf {
    let root = design
        .test_root
        .clone()
        .or_else(|| config.paths.test_root.clone())
        .unwrap_or_else(|| default_test_root(top));
    resolve_absolute_path(&root)
}

fn run_batch(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(n) = args.num_tests {
        config.run.num_tests = n;
    }
    if let Some(jobs) = args.parallel_jobs {
        config.run.parallel_jobs = jobs;
    }
    if let Some(name) = &args.design.trace_filename {
        config.run.trace_filename.clone_from(name);
    }
    if let Some(suffix) = &args.multi_dir_suffix {
        config.run.multi_dir_suffix.clone_from(suffix);
    }
    config.validate()?;

    // Everything that can be rejected is rejected before the build starts.
    let selection = TestSelection::single(&normalize_test_module(&args.test_module), &args.test_cases)?;
    let plan = BatchPlan::new(batch_mode(args.single_test, args.multi.as_deref())?, args.seed)?;
    let manifest = design::resolve(&args.design.filelist, args.design.top.as_deref())?;

    let test_root = resolve_test_root(&args.design, &config, &manifest.top);
    let waves = config.waves_enabled(args.design.waves_request());
    let trace_filename = config.run.trace_filename.clone();
    let log = EventLog::new(config.paths.event_log.as_deref(), args.verbose);
    log.record(
        &LogEntry::new(EventType::BatchStart, Severity::Info)
            .path(&config.paths.config_file)
            .details(format!(
                "top={} case={} config_hash={}",
                manifest.top,
                selection.case,
                config.stable_hash()?
            )),
    );

    let backend: Arc<dyn SimulatorBackend> = Arc::new(VerilatorBackend::from_config(&config.build));
    let cache = BuildCache::new(Arc::clone(&backend), log.clone());
    let request = BuildRequest {
        sources: manifest.sources.clone(),
        top: manifest.top.clone(),
        build_dir: build_dir(&test_root),
        waves,
        trace_format: if waves {
            TraceFormat::from_filename(Some(trace_filename.as_str()))
        } else {
            None
        },
        verbose: args.verbose,
    };
    let handle = cache.ensure_built(&request, args.build)?;

    let dispatch = DispatchPlan {
        top: manifest.top.clone(),
        hdl_toplevel_lang: config.run.hdl_toplevel_lang.clone(),
        selection,
        base_env: base_env(&config.run, &trace_filename),
        trace_filename,
        meta_filename: config.run.meta_filename.clone(),
        verbose: args.verbose,
    };
    let scheduler = Scheduler::new(
        Dispatcher::new(backend, dispatch, log.clone()),
        plan,
        SchedulerSettings::from_config(&config.run, test_root),
        log.clone(),
    );
    let report = scheduler.run(&handle, &mut rand::rng());
    log.flush();
    let report = report?;
    let event_log = log.status();

    match output_mode(cli) {
        OutputMode::Human => print_batch_report(&report, handle.rebuilt, event_log.as_ref()),
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "build": handle,
                "batch": report,
                "event_log": event_log,
            });
            write_json_line(&payload)?;
        }
    }

    // Degraded runs are part of the report; only --strict turns them into a failure.
    let unfinished = report.count(RunStatus::Failed) + report.count(RunStatus::NoResult);
    if args.strict && unfinished > 0 {
        return Err(CliError::Partial(format!(
            "{unfinished} of {} runs failed or produced no results",
            report.runs.len()
        )));
    }
    Ok(())
}

fn print_batch_report(report: &BatchReport, rebuilt: bool, event_log: Option<&EventLogStatus>) {
    println!(
        "Build: {}",
        if rebuilt { "rebuilt".yellow() } else { "reused".green() }
    );
    println!("Batch: {:?}, {} runs on {} workers", report.mode, report.runs.len(), report.workers);
    println!();
    println!("  {:<28}  {:>10}  {:<10}  {:>8}", "Run", "Seed", "Status", "Time");
    println!("  {}", "-".repeat(62));
    for run in &report.runs {
        let status = match run.status() {
            RunStatus::Passed => format!("{:<10}", "PASSED").green(),
            RunStatus::Failed => format!("{:<10}", "FAILED").red(),
            RunStatus::NoResult => format!("{:<10}", "NO RESULT").yellow(),
        };
        println!(
            "  {:<28}  {:>10}  {status}  {:>7.1}s",
            run.identity.dir_name(),
            run.identity.seed,
            Duration::from_millis(run.elapsed_ms).as_secs_f64(),
        );
        if let Some(err) = &run.error {
            println!("    {}", err.dimmed());
        }
    }

    let summary = report.summary;
    println!();
    println!(
        "Tests: {} cases, {} passed, {} failures, {} errors, {} skipped",
        summary.cases, summary.passed, summary.failures, summary.errors, summary.skipped
    );

    if let Some(path) = &report.manifest_path {
        println!("Manifest: {} (+{} entries)", path.display(), report.manifest_entries.len());
    }
    for dir in &report.missing {
        println!("  {} no metadata file in {}", "warning:".yellow(), dir.display());
    }
    if let Some(status) = event_log {
        let state = if status.is_degraded() {
            status.state.yellow()
        } else {
            status.state.green()
        };
        println!(
            "Event log: {} ({state}, {} lines)",
            status.path.display(),
            status.lines_written
        );
    }
}

fn run_status(cli: &Cli, args: &StatusArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let manifest = design::resolve(&args.design.filelist, args.design.top.as_deref())?;
    let test_root = resolve_test_root(&args.design, &config, &manifest.top);
    let build_dir = build_dir(&test_root);

    let backend: Arc<dyn SimulatorBackend> = Arc::new(VerilatorBackend::from_config(&config.build));
    let cache = BuildCache::new(backend, EventLog::disabled());
    let executable = cache.executable_path(&build_dir, &manifest.top);
    let freshness = cache.freshness(&manifest.sources, &build_dir, &manifest.top)?;

    let history = match &args.test_case {
        Some(case) => {
            let case_dir = test_root.join(case);
            let batch_root = case_dir.join(&config.run.multi_dir_suffix);
            let run_dirs = count_subdirs(&case_dir)?;
            let entries = RunManifest::new(&batch_root).read()?;
            Some((case.as_str(), case_dir, run_dirs, batch_root, entries.len()))
        }
        None => None,
    };

    match output_mode(cli) {
        OutputMode::Human => {
            println!("TVLA harness v{}", env!("CARGO_PKG_VERSION"));
            println!("  Config: {}", config.paths.config_file.display());
            println!("  Top: {} ({} sources)", manifest.top, manifest.sources.len());
            println!("  Test root: {}", test_root.display());
            println!("  Executable: {}", executable.display());
            let state = if freshness.needs_rebuild() {
                freshness.describe().yellow()
            } else {
                freshness.describe().green()
            };
            println!("  Build: {state}");
            if let Some((case, case_dir, run_dirs, batch_root, entries)) = &history {
                println!("\nTest case {case}:");
                println!("  {}: {run_dirs} run directories", case_dir.display());
                println!("  {}: {entries} manifest entries", batch_root.display());
            }
        }
        OutputMode::Json => {
            let history = history.map(|(case, case_dir, run_dirs, batch_root, entries)| {
                json!({
                    "test_case": case,
                    "case_dir": case_dir,
                    "run_dirs": run_dirs,
                    "batch_root": batch_root,
                    "manifest_entries": entries,
                })
            });
            let payload = json!({
                "command": "status",
                "config_file": config.paths.config_file,
                "top": manifest.top,
                "sources": manifest.sources.len(),
                "test_root": test_root,
                "executable": executable,
                "freshness": freshness,
                "needs_rebuild": freshness.needs_rebuild(),
                "history": history,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

/// Directories directly under `dir`; a missing `dir` counts zero.
fn count_subdirs(dir: &Path) -> Result<usize, CliError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(HarnessError::io(dir, err).into()),
    };
    Ok(entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .count())
}

fn run_results(cli: &Cli, args: &ResultsArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let mut all: Vec<(PathBuf, Vec<TestSuite>)> = Vec::with_capacity(args.files.len());
    for file in &args.files {
        all.push((file.clone(), parse_results_file(file)?));
    }
    let summary = ResultSummary::from_suites(all.iter().flat_map(|(_, suites)| suites.iter()));

    match mode {
        OutputMode::Human => {
            for (file, suites) in &all {
                println!("{}", file.display().to_string().bold());
                for suite in suites {
                    println!(
                        "  suite seed={} errors={} failures={} skipped={}",
                        suite.seed_or_sentinel(),
                        suite.errors,
                        suite.failures,
                        suite.skipped
                    );
                    for case in &suite.test_cases {
                        let padded = format!("{:<20}", case.status);
                        let status = if case.passed() {
                            padded.green()
                        } else {
                            padded.red()
                        };
                        println!(
                            "    {:<32} {status} {:>9.3}s {:>14.0}ns {:>12.2}",
                            case.name, case.time_s, case.sim_time_ns, case.ratio_time
                        );
                    }
                }
            }
            println!(
                "\n{} cases, {} passed, {} failures, {} errors, {} skipped",
                summary.cases, summary.passed, summary.failures, summary.errors, summary.skipped
            );
        }
        OutputMode::Json => {
            let files: Vec<Value> = all
                .iter()
                .map(|(file, suites)| json!({ "file": file, "suites": suites }))
                .collect();
            let payload = json!({
                "command": "results",
                "files": files,
                "summary": summary,
            });
            write_json_line(&payload)?;
        }
    }

    if summary.all_passed() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} failures and {} errors across {} cases",
            summary.failures, summary.errors, summary.cases
        )))
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("TVLA_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        Some(_) | None => fallback,
    }
}
