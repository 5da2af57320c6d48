//! Simulator build: backend interface, Verilator backend, freshness cache.

pub mod backend;
pub mod cache;
pub mod verilator;

pub use backend::{BuildRequest, ExecuteRequest, SimulatorBackend, TraceFormat};
pub use cache::{BuildCache, BuildHandle, Freshness, assess_freshness};
pub use verilator::{CocotbRuntime, VerilatorBackend};
