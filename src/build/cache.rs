//! Build cache: decides whether the compiled simulator is stale and rebuilds it.
//!
//! Freshness is derived on every call from filesystem state, never stored:
//!
//! | condition                                   | verdict             |
//! |---------------------------------------------|---------------------|
//! | build dir missing                           | `MissingBuildDir`   |
//! | executable missing                          | `MissingExecutable` |
//! | build tree empty                            | `EmptyBuildDir`     |
//! | newest source newer than newest build entry | `SourcesNewer`      |
//! | otherwise                                   | `Fresh`             |
//!
//! Every rebuild is a clean rebuild.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::Serialize;

use crate::build::backend::{BuildRequest, SimulatorBackend, TraceFormat};
use crate::core::errors::{HarnessError, Result};
use crate::logger::EventLog;
use crate::logger::jsonl::{EventType, LogEntry, Severity};

/// Freshness verdict for a build directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    MissingBuildDir,
    MissingExecutable,
    EmptyBuildDir,
    SourcesNewer,
}

impl Freshness {
    pub const fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Fresh)
    }

    pub const fn describe(self) -> &'static str {
        match self {
            Self::Fresh => "build is up to date",
            Self::MissingBuildDir => "build directory does not exist",
            Self::MissingExecutable => "simulation executable does not exist",
            Self::EmptyBuildDir => "build directory is empty",
            Self::SourcesNewer => "sources have been modified since the last build",
        }
    }
}

/// A built, immutable simulator artifact shared read-only by every run of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildHandle {
    pub top: String,
    pub build_dir: PathBuf,
    pub executable: PathBuf,
    pub waves: bool,
    pub trace_format: Option<TraceFormat>,
    /// Whether this call rebuilt the artifact, and why.
    pub rebuilt: bool,
    pub reason: Freshness,
}

/// Assess freshness of `build_dir` against `sources`.
pub fn assess_freshness(sources: &[PathBuf], build_dir: &Path, executable: &Path) -> Result<Freshness> {
    if !build_dir.is_dir() {
        return Ok(Freshness::MissingBuildDir);
    }
    if !executable.exists() {
        return Ok(Freshness::MissingExecutable);
    }
    let Some(build_mtime) = newest_in_tree(build_dir)? else {
        return Ok(Freshness::EmptyBuildDir);
    };
    let sources_mtime = newest_source(sources)?;
    if sources_mtime.is_some_and(|src| src > build_mtime) {
        return Ok(Freshness::SourcesNewer);
    }
    Ok(Freshness::Fresh)
}

fn newest_source(sources: &[PathBuf]) -> Result<Option<SystemTime>> {
    let mut newest = None;
    for src in sources {
        let mtime = fs::metadata(src)
            .and_then(|m| m.modified())
            .map_err(|source| HarnessError::io(src, source))?;
        newest = newest.max(Some(mtime));
    }
    Ok(newest)
}

/// Newest mtime of any entry below `root` (not counting `root` itself).
fn newest_in_tree(root: &Path) -> Result<Option<SystemTime>> {
    let mut newest = None;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(source) => return Err(HarnessError::io(&dir, source)),
        };
        for entry in entries {
            let entry = entry.map_err(|source| HarnessError::io(&dir, source))?;
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if let Ok(mtime) = meta.modified() {
                newest = newest.max(Some(mtime));
            }
            if meta.is_dir() {
                pending.push(entry.path());
            }
        }
    }
    Ok(newest)
}

/// Owns creation and refresh of the build artifact.
pub struct BuildCache {
    backend: Arc<dyn SimulatorBackend>,
    log: EventLog,
}

impl BuildCache {
    pub fn new(backend: Arc<dyn SimulatorBackend>, log: EventLog) -> Self {
        Self { backend, log }
    }

    pub fn executable_path(&self, build_dir: &Path, top: &str) -> PathBuf {
        self.backend.executable_path(build_dir, top)
    }

    pub fn freshness(&self, sources: &[PathBuf], build_dir: &Path, top: &str) -> Result<Freshness> {
        assess_freshness(sources, build_dir, &self.executable_path(build_dir, top))
    }

    /// Return a handle to a fresh artifact, rebuilding from scratch if stale or `force`d.
    ///
    /// A failed build is returned as an error and nothing from it is reused.
    pub fn ensure_built(&self, request: &BuildRequest, force: bool) -> Result<BuildHandle> {
        let executable = self.executable_path(&request.build_dir, &request.top);
        let freshness = self.freshness(&request.sources, &request.build_dir, &request.top)?;

        let handle = |rebuilt| BuildHandle {
            top: request.top.clone(),
            build_dir: request.build_dir.clone(),
            executable: executable.clone(),
            waves: request.waves,
            trace_format: request.trace_format,
            rebuilt,
            reason: freshness,
        };

        if !force && !freshness.needs_rebuild() {
            self.log.record(
                &LogEntry::new(EventType::BuildReuse, Severity::Info)
                    .path(&request.build_dir)
                    .details(freshness.describe()),
            );
            return Ok(handle(false));
        }

        let why = if force && !freshness.needs_rebuild() {
            "rebuild requested"
        } else {
            freshness.describe()
        };
        self.log.record(
            &LogEntry::new(EventType::BuildStart, Severity::Info)
                .path(&request.build_dir)
                .details(format!("{why}; clean build of {} with {}", request.top, self.backend.name())),
        );

        let started = Instant::now();
        clean_dir(&request.build_dir)?;
        if let Err(err) = self.backend.build(request) {
            self.log
                .record(&LogEntry::new(EventType::Error, Severity::Error).error(&err));
            return Err(err);
        }
        if !executable.exists() {
            return Err(HarnessError::BuildFailed {
                top: request.top.clone(),
                status: "success".to_string(),
                diagnostic: format!(
                    "compiler exited cleanly but {} was not produced",
                    executable.display()
                ),
            });
        }

        self.log.record(
            &LogEntry::new(EventType::BuildComplete, Severity::Info)
                .path(&executable)
                .duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
                .ok(true),
        );
        Ok(handle(true))
    }
}

fn clean_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(source) => return Err(HarnessError::io(dir, source)),
    }
    fs::create_dir_all(dir).map_err(|source| HarnessError::io(dir, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::backend::ExecuteRequest;
    use filetime::{FileTime, set_file_mtime};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Writes a fake executable plus an object file on every build.
    #[derive(Default)]
    struct CountingBackend {
        builds: AtomicUsize,
        fail: bool,
    }

    impl SimulatorBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn build(&self, request: &BuildRequest) -> Result<()> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HarnessError::BuildFailed {
                    top: request.top.clone(),
                    status: "exit status: 1".to_string(),
                    diagnostic: "%Error".to_string(),
                });
            }
            let obj = request.build_dir.join("obj").join("model.o");
            fs::create_dir_all(obj.parent().unwrap()).unwrap();
            fs::write(obj, b"o").unwrap();
            fs::write(request.build_dir.join(&request.top), b"exe").unwrap();
            Ok(())
        }

        fn execute(&self, _request: &ExecuteRequest<'_>) -> Result<Option<PathBuf>> {
            Ok(None)
        }
    }

    fn setup() -> (tempfile::TempDir, BuildRequest) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("top.sv");
        fs::write(&src, "module top; endmodule\n").unwrap();
        let past = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3_600));
        set_file_mtime(&src, past).unwrap();
        let request = BuildRequest {
            sources: vec![src],
            top: "top".to_string(),
            build_dir: dir.path().join("sim_build"),
            waves: true,
            trace_format: Some(TraceFormat::Fst),
            verbose: false,
        };
        (dir, request)
    }

    #[test]
    fn missing_build_dir_forces_rebuild() {
        let (_dir, request) = setup();
        let verdict = assess_freshness(
            &request.sources,
            &request.build_dir,
            &request.build_dir.join("top"),
        )
        .unwrap();
        assert_eq!(verdict, Freshness::MissingBuildDir);
    }

    #[test]
    fn missing_executable_forces_rebuild() {
        let (_dir, request) = setup();
        fs::create_dir_all(&request.build_dir).unwrap();
        fs::write(request.build_dir.join("leftover.o"), b"x").unwrap();
        let verdict = assess_freshness(
            &request.sources,
            &request.build_dir,
            &request.build_dir.join("top"),
        )
        .unwrap();
        assert_eq!(verdict, Freshness::MissingExecutable);
    }

    #[test]
    fn newer_source_forces_rebuild() {
        let (_dir, request) = setup();
        let backend = Arc::new(CountingBackend::default());
        let cache = BuildCache::new(backend.clone(), EventLog::disabled());
        cache.ensure_built(&request, false).unwrap();

        let future = FileTime::from_system_time(SystemTime::now() + Duration::from_secs(3_600));
        set_file_mtime(&request.sources[0], future).unwrap();
        assert_eq!(
            cache.freshness(&request.sources, &request.build_dir, "top").unwrap(),
            Freshness::SourcesNewer
        );

        let handle = cache.ensure_built(&request, false).unwrap();
        assert!(handle.rebuilt);
        assert_eq!(handle.reason, Freshness::SourcesNewer);
        assert_eq!(backend.builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn ensure_built_is_idempotent() {
        let (_dir, request) = setup();
        let backend = Arc::new(CountingBackend::default());
        let cache = BuildCache::new(backend.clone(), EventLog::disabled());

        let first = cache.ensure_built(&request, false).unwrap();
        let second = cache.ensure_built(&request, false).unwrap();
        assert!(first.rebuilt);
        assert!(!second.rebuilt);
        assert_eq!(second.reason, Freshness::Fresh);
        assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
        assert_eq!(second.executable, request.build_dir.join("top"));
    }

    #[test]
    fn forced_rebuild_is_clean() {
        let (_dir, request) = setup();
        let backend = Arc::new(CountingBackend::default());
        let cache = BuildCache::new(backend.clone(), EventLog::disabled());
        cache.ensure_built(&request, false).unwrap();

        let stray = request.build_dir.join("stale_partial.o");
        fs::write(&stray, b"old").unwrap();
        let handle = cache.ensure_built(&request, true).unwrap();
        assert!(handle.rebuilt);
        assert!(!stray.exists(), "rebuild must start from an empty build dir");
        assert_eq!(backend.builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn build_failure_is_returned() {
        let (_dir, request) = setup();
        let backend = Arc::new(CountingBackend {
            builds: AtomicUsize::new(0),
            fail: true,
        });
        let cache = BuildCache::new(backend, EventLog::disabled());
        let err = cache.ensure_built(&request, false).unwrap_err();
        assert_eq!(err.code(), "TVH-2001");
    }
}
