//! Verilator backend: cocotb-linked model builds, VPI-driven test runs.
//!
//! The model is verilated with `--vpi` and linked against cocotb's
//! `libcocotbvpi_verilator` and its Verilator `main`, then compiled with
//! `make -f Vtop.mk`. At run time the executable loads the Python test module
//! through cocotb's embedded interpreter, which needs the loader environment
//! that `cocotb-config` reports.

#![allow(missing_docs)]

use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::build::backend::{BuildRequest, ExecuteRequest, SimulatorBackend, TraceFormat};
use crate::core::config::BuildConfig;
use crate::core::errors::{HarnessError, Result};

/// Result document written by the execution runtime inside the run directory.
pub const RESULTS_FILENAME: &str = "results.xml";
/// Captured simulator stdout/stderr inside the run directory.
pub const SIM_LOG_FILENAME: &str = "sim.log";

/// Generated model class prefix; Verilator names the makefile `<prefix>.mk`.
const MODEL_PREFIX: &str = "Vtop";

/// Lines of compiler output kept in a build failure diagnostic.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

const BASE_FLAGS: &[&str] = &[
    "-Wno-fatal",
    "-Wno-lint",
    "-Wno-style",
    "-Wno-UNOPTFLAT",
    "-O3",
    "--x-assign",
    "fast",
    "--x-initial",
    "fast",
    "-j",
    "0",
];

const TRACE_FLAGS: &[&str] = &[
    "--trace",
    "--trace-underscore",
    "--trace-structs",
    "--trace-max-array",
    "16384",
    "--trace-max-width",
    "16384",
    "--trace-threads",
    "4",
];

/// Where the cocotb runtime lives, as reported by `cocotb-config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CocotbRuntime {
    /// Directory holding `libcocotbvpi_verilator`.
    pub lib_dir: PathBuf,
    /// cocotb `share` directory.
    pub share_dir: PathBuf,
    pub python_bin: PathBuf,
    pub libpython: PathBuf,
    /// Test module search path, in order.
    pub python_path: Vec<PathBuf>,
}

impl CocotbRuntime {
    /// Query `cocotb_config` for the library, share and interpreter paths.
    ///
    /// The invocation directory heads the module search path, followed by any
    /// inherited `PYTHONPATH`, so test modules next to the caller import.
    pub fn discover(cocotb_config: &str) -> Result<Self> {
        let cwd = env::current_dir().map_err(|source| HarnessError::io(".", source))?;
        let mut python_path = vec![cwd];
        if let Some(inherited) = env::var_os("PYTHONPATH") {
            python_path.extend(env::split_paths(&inherited).filter(|p| !p.as_os_str().is_empty()));
        }
        Ok(Self {
            lib_dir: query_cocotb_config(cocotb_config, "--lib-dir")?,
            share_dir: query_cocotb_config(cocotb_config, "--share")?,
            python_bin: query_cocotb_config(cocotb_config, "--python-bin")?,
            libpython: query_cocotb_config(cocotb_config, "--libpython")?,
            python_path,
        })
    }

    /// cocotb's Verilator `main`, compiled into every model.
    #[must_use]
    pub fn verilator_main(&self) -> PathBuf {
        self.share_dir.join("lib").join("verilator").join("verilator.cpp")
    }

    /// Linker flags for the cocotb VPI library, with an rpath so the model
    /// runs without `LD_LIBRARY_PATH`.
    #[must_use]
    pub fn link_flags(&self) -> String {
        let lib = self.lib_dir.display();
        format!("-Wl,-rpath,{lib} -L{lib} -lcocotbvpi_verilator")
    }

    /// Variables the embedded interpreter needs to find Python and the test module.
    pub fn loader_env(&self) -> Result<Vec<(&'static str, OsString)>> {
        let python_path =
            env::join_paths(&self.python_path).map_err(|err| HarnessError::Runtime {
                details: format!("cannot build PYTHONPATH: {err}"),
            })?;
        Ok(vec![
            ("PYGPI_PYTHON_BIN", self.python_bin.clone().into_os_string()),
            ("LIBPYTHON_LOC", self.libpython.clone().into_os_string()),
            ("PYTHONPATH", python_path),
        ])
    }
}

fn query_cocotb_config(program: &str, flag: &str) -> Result<PathBuf> {
    let output = Command::new(program)
        .arg(flag)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| HarnessError::Spawn {
            program: program.to_string(),
            source,
        })?;
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || value.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HarnessError::CocotbConfig {
            flag: flag.to_string(),
            details: format!("{} {}", output.status, tail_lines(&stderr, 5)).trim().to_string(),
        });
    }
    Ok(PathBuf::from(value))
}

#[derive(Debug)]
pub struct VerilatorBackend {
    verilator_bin: String,
    make_bin: String,
    cocotb_config_bin: String,
    cflags: String,
    extra_flags: Vec<String>,
    runtime: Mutex<Option<Arc<CocotbRuntime>>>,
}

impl VerilatorBackend {
    pub fn new(verilator_bin: impl Into<String>) -> Self {
        let defaults = BuildConfig::default();
        Self {
            verilator_bin: verilator_bin.into(),
            make_bin: defaults.make_bin,
            cocotb_config_bin: defaults.cocotb_config_bin,
            cflags: String::new(),
            extra_flags: Vec::new(),
            runtime: Mutex::new(None),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            verilator_bin: config.verilator_bin.clone(),
            make_bin: config.make_bin.clone(),
            cocotb_config_bin: config.cocotb_config_bin.clone(),
            cflags: config.cflags.clone(),
            extra_flags: config.extra_flags.clone(),
            runtime: Mutex::new(None),
        }
    }

    /// Use `runtime` instead of asking `cocotb-config`.
    #[must_use]
    pub fn with_runtime(self, runtime: CocotbRuntime) -> Self {
        *self.runtime.lock() = Some(Arc::new(runtime));
        self
    }

    /// Resolved once, then shared by the build and every run.
    fn runtime(&self) -> Result<Arc<CocotbRuntime>> {
        let mut slot = self.runtime.lock();
        if let Some(runtime) = slot.as_ref() {
            return Ok(Arc::clone(runtime));
        }
        let runtime = Arc::new(CocotbRuntime::discover(&self.cocotb_config_bin)?);
        *slot = Some(Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Full Verilator argument list for a build request.
    pub fn build_args(&self, request: &BuildRequest, runtime: &CocotbRuntime) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-cc".to_string(),
            "--exe".to_string(),
            "-Mdir".to_string(),
            request.build_dir.display().to_string(),
            "-DCOCOTB_SIM=1".to_string(),
            "--top-module".to_string(),
            request.top.clone(),
            "--vpi".to_string(),
            "--public-flat-rw".to_string(),
            "--prefix".to_string(),
            MODEL_PREFIX.to_string(),
            "-o".to_string(),
            request.top.clone(),
            "-LDFLAGS".to_string(),
            runtime.link_flags(),
        ];
        args.extend(BASE_FLAGS.iter().map(|f| (*f).to_string()));
        if !self.cflags.trim().is_empty() {
            args.push("-CFLAGS".to_string());
            args.push(self.cflags.trim().to_string());
        }

        if request.waves {
            args.extend(TRACE_FLAGS.iter().map(|f| (*f).to_string()));
            match request.trace_format {
                Some(TraceFormat::Fst) => args.push("--trace-fst".to_string()),
                Some(TraceFormat::Vcd) => args.push("--trace-vcd".to_string()),
                Some(TraceFormat::Saif) => args.push("--trace-saif".to_string()),
                None => {}
            }
        }

        args.extend(self.extra_flags.iter().cloned());
        args.push(runtime.verilator_main().display().to_string());
        args.extend(request.sources.iter().map(|s| s.display().to_string()));
        args
    }

    /// `make` invocation compiling the verilated model.
    pub fn make_args(request: &BuildRequest) -> Vec<String> {
        vec![
            "-C".to_string(),
            request.build_dir.display().to_string(),
            "-f".to_string(),
            format!("{MODEL_PREFIX}.mk"),
        ]
    }

    fn run_build_step(&self, program: &str, args: &[String], request: &BuildRequest) -> Result<()> {
        if request.verbose {
            eprintln!("[TVLA] {program} {}", args.join(" "));
        }

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| HarnessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if request.verbose {
            let _ = io::stderr().write_all(&output.stdout);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostic = if stderr.trim().is_empty() {
                tail_lines(&String::from_utf8_lossy(&output.stdout), DIAGNOSTIC_TAIL_LINES)
            } else {
                tail_lines(&stderr, DIAGNOSTIC_TAIL_LINES)
            };
            return Err(HarnessError::BuildFailed {
                top: request.top.clone(),
                status: format!("{program}: {}", output.status),
                diagnostic,
            });
        }
        Ok(())
    }
}

impl SimulatorBackend for VerilatorBackend {
    fn name(&self) -> &'static str {
        "verilator"
    }

    fn build(&self, request: &BuildRequest) -> Result<()> {
        let runtime = self.runtime()?;
        self.run_build_step(&self.verilator_bin, &self.build_args(request, &runtime), request)?;
        self.run_build_step(&self.make_bin, &Self::make_args(request), request)
    }

    fn execute(&self, request: &ExecuteRequest<'_>) -> Result<Option<PathBuf>> {
        let runtime = self.runtime()?;
        let results_file = request.run_dir.join(RESULTS_FILENAME);
        let log_path = request.run_dir.join(SIM_LOG_FILENAME);
        let log = File::create(&log_path).map_err(|source| HarnessError::io(&log_path, source))?;
        let log_err = log
            .try_clone()
            .map_err(|source| HarnessError::io(&log_path, source))?;

        // A stale document from an earlier run must not be mistaken for this one.
        if results_file.exists() {
            fs::remove_file(&results_file)
                .map_err(|source| HarnessError::io(&results_file, source))?;
        }

        let seed = request.seed.to_string();
        let mut command = Command::new(request.executable);
        // cocotb 1.x and 2.x read different names; both are set.
        command
            .current_dir(request.run_dir)
            .envs(runtime.loader_env()?)
            .env("MODULE", request.test_module)
            .env("COCOTB_TEST_MODULES", request.test_module)
            .env("TESTCASE", request.test_case)
            .env("COCOTB_TESTCASE", request.test_case)
            .env("TOPLEVEL", request.top)
            .env("COCOTB_TOPLEVEL", request.top)
            .env("TOPLEVEL_LANG", request.hdl_toplevel_lang)
            .env("RANDOM_SEED", &seed)
            .env("COCOTB_RANDOM_SEED", &seed)
            .env("COCOTB_RESULTS_FILE", &results_file)
            .envs(request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if let Some(trace) = request.trace_filename {
            command.args(["--trace-file", trace]);
        }

        let status = command.status().map_err(|source| HarnessError::Spawn {
            program: request.executable.display().to_string(),
            source,
        })?;
        if request.verbose {
            eprintln!(
                "[TVLA] {} exited with {status} (log: {})",
                request.test_case,
                log_path.display()
            );
        }

        Ok(results_file.exists().then_some(results_file))
    }
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}
