//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use tvla_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HarnessError, Result};

// Design
pub use crate::design::{SourceManifest, normalize_test_module};

// Build
pub use crate::build::{
    BuildCache, BuildHandle, BuildRequest, SimulatorBackend, TraceFormat, VerilatorBackend,
};

// Results
pub use crate::results::{ResultSummary, TestCase, TestSuite, parse_results_file};

// Run
pub use crate::run::{
    BatchMode, BatchPlan, BatchReport, DispatchPlan, Dispatcher, RunIdentity, RunManifest, RunMode,
    RunOutcome, Scheduler, SchedulerSettings, TestSelection,
};

// Logging
pub use crate::logger::EventLog;
