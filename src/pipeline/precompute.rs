//! Background precomputation of enhanced tiles.
//!
//! A job walks every tile of the requested zoom levels and renders it through
//! the orchestrator, which leaves the results in the cache. Jobs keep a
//! sliding window of renders in flight: as each completes the next tile is
//! submitted, until the grid is exhausted or the job is cancelled.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::EnhancementCache;
use crate::source::{ImageCatalog, TileStore};
use crate::tile::{EnhancementOptions, TileCoordinate};

use super::TileOrchestrator;

/// Default number of renders in flight per job.
pub const DEFAULT_PRECOMPUTE_CONCURRENCY: usize = 4;

// =============================================================================
// Progress
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    total: AtomicUsize,
    rendered: AtomicUsize,
    cache_hits: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicBool,
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrecomputeProgress {
    /// Tiles in every resolved zoom level
    pub total: usize,
    /// Tiles computed by this job
    pub rendered: usize,
    /// Tiles already cached
    pub cache_hits: usize,
    pub failed: usize,
    pub finished: bool,
}

impl PrecomputeProgress {
    /// Tiles that have finished either way.
    pub fn processed(&self) -> usize {
        self.rendered + self.cache_hits + self.failed
    }

    /// Progress as a fraction from 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed() as f64 / self.total as f64
    }
}

impl Counters {
    fn snapshot(&self) -> PrecomputeProgress {
        PrecomputeProgress {
            total: self.total.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Acquire),
        }
    }
}

/// Final report of a precompute job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecomputeSummary {
    pub image_id: String,

    /// Levels whose grids were walked
    pub zoom_levels: Vec<u32>,

    /// Requested levels the image does not have
    pub skipped_levels: Vec<u32>,

    pub tiles_total: usize,
    pub tiles_rendered: usize,
    pub tiles_cached: usize,
    pub tiles_failed: usize,

    /// Whether submission stopped before the grid was exhausted
    pub cancelled: bool,

    pub elapsed: Duration,
}

impl PrecomputeSummary {
    fn empty(image_id: String) -> Self {
        Self {
            image_id,
            zoom_levels: Vec::new(),
            skipped_levels: Vec::new(),
            tiles_total: 0,
            tiles_rendered: 0,
            tiles_cached: 0,
            tiles_failed: 0,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running precompute job.
///
/// Dropping the handle does not stop the job.
pub struct PrecomputeHandle {
    image_id: String,
    counters: Arc<Counters>,
    cancellation: CancellationToken,
    task: JoinHandle<PrecomputeSummary>,
}

impl PrecomputeHandle {
    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// Current progress (snapshot).
    pub fn progress(&self) -> PrecomputeProgress {
        self.counters.snapshot()
    }

    /// Stop submitting new tiles. Renders already in flight complete and are
    /// cached.
    pub fn cancel(&self) {
        info!(image_id = %self.image_id, "Precompute cancellation requested");
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the job to finish and return its summary.
    pub async fn wait(self) -> PrecomputeSummary {
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(image_id = %self.image_id, "Precompute task failed: {}", e);
                let progress = self.counters.snapshot();
                PrecomputeSummary {
                    tiles_total: progress.total,
                    tiles_rendered: progress.rendered,
                    tiles_cached: progress.cache_hits,
                    tiles_failed: progress.failed,
                    cancelled: true,
                    ..PrecomputeSummary::empty(self.image_id)
                }
            }
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Spawns precompute jobs against a shared orchestrator.
pub struct PrecomputeScheduler<S: TileStore, C: EnhancementCache> {
    orchestrator: Arc<TileOrchestrator<S, C>>,
    catalog: Arc<dyn ImageCatalog>,
    concurrency: usize,

    /// Parent of every job's token
    shutdown: CancellationToken,
}

impl<S: TileStore, C: EnhancementCache> PrecomputeScheduler<S, C> {
    pub fn new(orchestrator: Arc<TileOrchestrator<S, C>>, catalog: Arc<dyn ImageCatalog>) -> Self {
        Self {
            orchestrator,
            catalog,
            concurrency: DEFAULT_PRECOMPUTE_CONCURRENCY,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the number of renders in flight per job (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start precomputing `zoom_levels` of an image and return immediately.
    ///
    /// An empty `zoom_levels` means every level the catalog lists.
    pub fn schedule(
        &self,
        image_id: impl Into<String>,
        zoom_levels: Vec<u32>,
        options: EnhancementOptions,
    ) -> PrecomputeHandle {
        let image_id = image_id.into();
        let counters = Arc::new(Counters::default());
        let cancellation = self.shutdown.child_token();

        let job = PrecomputeJob {
            orchestrator: Arc::clone(&self.orchestrator),
            catalog: Arc::clone(&self.catalog),
            image_id: image_id.clone(),
            zoom_levels,
            options,
            concurrency: self.concurrency,
            counters: Arc::clone(&counters),
            cancellation: cancellation.clone(),
        };
        let task = tokio::spawn(job.run());

        PrecomputeHandle {
            image_id,
            counters,
            cancellation,
            task,
        }
    }

    /// Cancel every job started by this scheduler.
    pub fn shutdown(&self) {
        info!("Cancelling precompute jobs");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

struct PrecomputeJob<S: TileStore, C: EnhancementCache> {
    orchestrator: Arc<TileOrchestrator<S, C>>,
    catalog: Arc<dyn ImageCatalog>,
    image_id: String,
    zoom_levels: Vec<u32>,
    options: EnhancementOptions,
    concurrency: usize,
    counters: Arc<Counters>,
    cancellation: CancellationToken,
}

impl<S: TileStore, C: EnhancementCache> PrecomputeJob<S, C> {
    async fn run(self) -> PrecomputeSummary {
        let summary = self.walk().await;
        self.counters.finished.store(true, Ordering::Release);
        summary
    }

    async fn walk(&self) -> PrecomputeSummary {
        let start = Instant::now();
        let mut summary = PrecomputeSummary::empty(self.image_id.clone());

        let Some(bounds) = self.catalog.bounds(&self.image_id).await else {
            error!(image_id = %self.image_id, "Precompute requested for unknown image");
            return summary;
        };

        let requested = if self.zoom_levels.is_empty() {
            bounds.zoom_levels.clone()
        } else {
            self.zoom_levels.clone()
        };

        let mut seen = HashSet::new();
        let mut grids = Vec::new();
        for z in requested {
            if !seen.insert(z) {
                continue;
            }
            match bounds.grid(z) {
                Some((cols, rows)) => {
                    summary.zoom_levels.push(z);
                    grids.push((z, cols, rows));
                }
                None => {
                    warn!(image_id = %self.image_id, z = z, "Skipping zoom level not present in image");
                    summary.skipped_levels.push(z);
                }
            }
        }

        let total: usize = grids
            .iter()
            .map(|&(_, cols, rows)| cols as usize * rows as usize)
            .sum();
        self.counters.total.store(total, Ordering::Relaxed);
        summary.tiles_total = total;

        info!(
            image_id = %self.image_id,
            levels = ?summary.zoom_levels,
            tiles = total,
            operations = %self.options.operations(),
            "Precompute started"
        );

        let mut pending = Vec::with_capacity(total);
        for &(z, cols, rows) in &grids {
            for y in 0..rows {
                pending.extend((0..cols).map(|x| TileCoordinate::new(self.image_id.as_str(), z, x, y)));
            }
        }
        let mut pending = pending.into_iter();

        let mut in_flight = JoinSet::new();
        loop {
            while in_flight.len() < self.concurrency && !self.cancellation.is_cancelled() {
                let Some(coordinate) = pending.next() else {
                    break;
                };
                let orchestrator = Arc::clone(&self.orchestrator);
                let options = self.options;
                in_flight.spawn(async move {
                    let result = orchestrator.render(&coordinate, &options).await;
                    (coordinate, result)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok((_, Ok(rendered))) if rendered.cache_hit => {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok((coordinate, Ok(_))) => {
                    self.counters.rendered.fetch_add(1, Ordering::Relaxed);
                    debug!(tile = %coordinate, "Precomputed tile");
                }
                Ok((coordinate, Err(e))) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(tile = %coordinate, "Precompute render failed: {}", e);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(image_id = %self.image_id, "Precompute task failed: {}", e);
                }
            }
        }

        let progress = self.counters.snapshot();
        summary.tiles_rendered = progress.rendered;
        summary.tiles_cached = progress.cache_hits;
        summary.tiles_failed = progress.failed;
        summary.cancelled = progress.processed() < total;
        summary.elapsed = start.elapsed();

        if summary.cancelled {
            info!(
                image_id = %self.image_id,
                processed = progress.processed(),
                remaining = total - progress.processed(),
                "Precompute cancelled"
            );
        } else {
            info!(
                image_id = %self.image_id,
                rendered = summary.tiles_rendered,
                cached = summary.tiles_cached,
                failed = summary.tiles_failed,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "Precompute complete"
            );
        }

        summary
    }
}
