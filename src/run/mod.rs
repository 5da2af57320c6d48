//! Run orchestration: identities, per-run dispatch, worker pool, manifest, batches.

pub mod dispatcher;
pub mod identity;
pub mod manifest;
pub mod pool;
pub mod scheduler;

pub use dispatcher::{DispatchPlan, Dispatcher, RunOutcome, RunStatus, TestSelection};
pub use identity::{RunIdentity, RunMode, SEED_MASK, mask_seed, next_candidate, random_seed};
pub use manifest::{MANIFEST_FILENAME, RunManifest};
pub use pool::{WorkerPool, resolve_parallelism};
pub use scheduler::{BatchMode, BatchPlan, BatchReport, Scheduler, SchedulerSettings, base_env};
