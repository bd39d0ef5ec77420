//! Batched rendering.
//!
//! A batch is split into fixed-size chunks. Chunks run one after another so a
//! large batch cannot monopolise the blocking pool; the items within a chunk
//! render concurrently. Every item gets its own result slot, so one failure
//! never affects its neighbours.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cache::EnhancementCache;
use crate::error::BatchError;
use crate::source::TileStore;
use crate::tile::{EnhancementOptions, TileCoordinate};

use super::{Rendered, TileOrchestrator};

/// Default number of items rendered concurrently.
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 4;

/// One item of a batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub coordinate: TileCoordinate,
    pub options: EnhancementOptions,
}

impl BatchRequest {
    pub fn new(coordinate: TileCoordinate, options: EnhancementOptions) -> Self {
        Self {
            coordinate,
            options,
        }
    }
}

/// Runs batches of render requests against a shared orchestrator.
pub struct BatchCoordinator<S: TileStore, C: EnhancementCache> {
    orchestrator: Arc<TileOrchestrator<S, C>>,
    chunk_size: usize,
}

impl<S: TileStore, C: EnhancementCache> BatchCoordinator<S, C> {
    pub fn new(orchestrator: Arc<TileOrchestrator<S, C>>) -> Self {
        Self {
            orchestrator,
            chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
        }
    }

    /// Set the chunk size (minimum 1).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Render every request, returning one result per request in input order.
    pub async fn run_batch(&self, requests: Vec<BatchRequest>) -> Vec<Result<Rendered, BatchError>> {
        let start = Instant::now();
        let total = requests.len();
        let mut results: Vec<Option<Result<Rendered, BatchError>>> = vec![None; total];

        for (chunk_index, chunk) in requests.chunks(self.chunk_size).enumerate() {
            let base = chunk_index * self.chunk_size;
            let mut in_flight = JoinSet::new();

            for (offset, request) in chunk.iter().cloned().enumerate() {
                let orchestrator = Arc::clone(&self.orchestrator);
                in_flight.spawn(async move {
                    let result = orchestrator.render(&request.coordinate, &request.options).await;
                    (base + offset, result)
                });
            }

            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok((index, result)) => results[index] = Some(result.map_err(BatchError::from)),
                    // The slot stays empty and is reported as aborted below
                    Err(e) => warn!("Batch item task failed: {}", e),
                }
            }
        }

        let results: Vec<_> = results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(BatchError::Aborted("render task did not complete".to_string())))
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            requests = total,
            failed = failed,
            chunk_size = self.chunk_size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch complete"
        );

        results
    }
}
