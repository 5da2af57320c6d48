//! Design inputs: which sources make up the design and what its top module is.

pub mod manifest;

pub use manifest::{SourceManifest, normalize_test_module, resolve};
