//! The tile enhancement pipeline.
//!
//! - [`TileOrchestrator`]: cache lookup, fetch, decode, operations, write-through
//! - [`PrecomputeScheduler`]: background jobs that fill the cache level by level
//! - [`BatchCoordinator`]: chunked batches with per-item isolation
//!
//! Precompute jobs and batches share one orchestrator (and so one cache) with
//! live requests.

mod batch;
mod enhanced;
mod orchestrator;
mod precompute;

pub use batch::{BatchCoordinator, BatchRequest, DEFAULT_BATCH_CHUNK_SIZE};
pub use enhanced::{EnhancedTile, Rendered};
pub use orchestrator::TileOrchestrator;
pub use precompute::{
    PrecomputeHandle, PrecomputeProgress, PrecomputeScheduler, PrecomputeSummary,
    DEFAULT_PRECOMPUTE_CONCURRENCY,
};
