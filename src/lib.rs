#![forbid(unsafe_code)]

//! TVLA harness: build a Verilator simulation once, then run it as paired
//! (random vs fixed-data) or N-way randomized batches for leakage analysis.
//!
//! Pipeline:
//! 1. **Design**: resolve the source file list and top module
//! 2. **Build**: rebuild the simulator only when sources are newer than the artifact
//! 3. **Run**: fan runs out over a bounded worker pool, parse each results document,
//!    and record per-run metadata files in the batch manifest
//!
//! # Library usage
//!
//! ```rust,no_run
//! use tvla_harness::prelude::*;
//! ```

pub mod prelude;

pub mod build;
pub mod core;
pub mod design;
pub mod logger;
pub mod results;
pub mod run;
