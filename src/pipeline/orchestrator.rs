//! Tile orchestration.
//!
//! The orchestrator is the single entry point for rendering a tile. Every
//! caller (HTTP handlers, precompute jobs, batches) goes through
//! [`TileOrchestrator::render`]:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                         TileOrchestrator                          │
//! │                                                                   │
//! │  1. Cache lookup ──hit──► return                                  │
//! │       │ miss                                                      │
//! │  2. TileStore fetch ──NotFound──► RenderError::NotFound           │
//! │  3. Decode (blocking pool)                                        │
//! │  4. SuperRes ─► Denoise ─► ┬─ Segment  ─┬─► overlays              │
//! │                            └─ Classify ─┘                         │
//! │  5. Assemble, cache put, spawn metadata record                    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operation failures never fail a render: a failed image-transforming
//! operation passes its input through unchanged and is recorded with
//! `succeeded = false`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

use crate::cache::{CacheKey, EnhancementCache, MemoryEnhancementCache};
use crate::enhance::{draw_feature_overlays, Feature, OperationResult, OperationTable};
use crate::error::{CacheError, RenderError, StoreError};
use crate::persist::{MetadataSink, TileMetadata};
use crate::source::TileStore;
use crate::tile::{decode_tile, EnhancementOptions, OperationKind, PixelBuffer, TileCoordinate};

use super::enhanced::{EnhancedTile, Rendered};

type SharedRender = Arc<OnceCell<Result<Arc<EnhancedTile>, RenderError>>>;
type InFlight = Mutex<HashMap<CacheKey, SharedRender>>;

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashMap<CacheKey, SharedRender>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a coalesced render's map entry when its caller finishes or is
/// dropped mid-render.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    key: CacheKey,
    cell: SharedRender,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = lock_in_flight(self.in_flight);
        if in_flight.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, &self.cell)) {
            in_flight.remove(&self.key);
        }
    }
}

/// Renders enhanced tiles, caching the results.
///
/// # Type Parameters
///
/// * `S` - Source of original tiles
/// * `C` - Enhancement cache backend
///
/// # Example
///
/// ```
/// use deep_zoom_enhancer::cache::MemoryEnhancementCache;
/// use deep_zoom_enhancer::enhance::OperationTable;
/// use deep_zoom_enhancer::pipeline::TileOrchestrator;
/// use deep_zoom_enhancer::source::MemoryTileStore;
/// use deep_zoom_enhancer::tile::{EnhancementOptions, TileCoordinate};
///
/// #[tokio::main]
/// async fn main() {
///     let orchestrator = TileOrchestrator::new(
///         MemoryTileStore::new(),
///         MemoryEnhancementCache::new(),
///         OperationTable::builtin(),
///     );
///
///     let coord = TileCoordinate::new("mars-001", 5, 0, 0);
///     let result = orchestrator.render(&coord, &EnhancementOptions::default()).await;
///     assert!(result.is_err()); // empty store
/// }
/// ```
pub struct TileOrchestrator<S: TileStore, C: EnhancementCache = MemoryEnhancementCache> {
    store: Arc<S>,
    cache: Arc<C>,
    operations: OperationTable,
    metadata_sink: Option<Arc<dyn MetadataSink>>,

    /// Whether concurrent misses for one key share a computation
    coalesce_renders: bool,
    in_flight: InFlight,

    /// Per-image invalidation count; renders started under an older
    /// generation are not written to the cache
    generations: RwLock<HashMap<String, u64>>,
}

impl<S: TileStore, C: EnhancementCache> TileOrchestrator<S, C> {
    pub fn new(store: S, cache: C, operations: OperationTable) -> Self {
        Self::with_shared(Arc::new(store), Arc::new(cache), operations)
    }

    /// Create an orchestrator over a store and cache shared with other components.
    pub fn with_shared(store: Arc<S>, cache: Arc<C>, operations: OperationTable) -> Self {
        Self {
            store,
            cache,
            operations,
            metadata_sink: None,
            coalesce_renders: false,
            in_flight: Mutex::new(HashMap::new()),
            generations: RwLock::new(HashMap::new()),
        }
    }

    /// Record metadata for every computed tile.
    pub fn with_metadata_sink(mut self, sink: Arc<dyn MetadataSink>) -> Self {
        self.metadata_sink = Some(sink);
        self
    }

    /// Let concurrent cache misses for the same key share one computation.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce_renders = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    /// Render a tile, serving it from the cache when possible.
    ///
    /// # Errors
    ///
    /// - [`RenderError::NotFound`] if the store has no tile at `coordinate`
    /// - [`RenderError::Upstream`] if the store fails for another reason
    /// - [`RenderError::Decode`] if the fetched bytes are not a decodable image
    ///
    /// Failed renders are never cached.
    pub async fn render(
        &self,
        coordinate: &TileCoordinate,
        options: &EnhancementOptions,
    ) -> Result<Rendered, RenderError> {
        let key = CacheKey::new(coordinate, options);

        match self.cache.get(&key).await {
            Ok(Some(tile)) => {
                debug!(image_id = %coordinate.image_id, z = coordinate.z, x = coordinate.x, y = coordinate.y, "Cache hit");
                return Ok(Rendered {
                    tile,
                    cache_hit: true,
                });
            }
            Ok(None) => {
                debug!(image_id = %coordinate.image_id, z = coordinate.z, x = coordinate.x, y = coordinate.y, "Cache miss");
            }
            Err(e) => {
                warn!(image_id = %coordinate.image_id, z = coordinate.z, x = coordinate.x, y = coordinate.y, "Cache read failed, rendering uncached: {}", e);
            }
        }

        let tile = if self.coalesce_renders {
            self.compute_shared(key, coordinate, options).await?
        } else {
            self.compute(key, coordinate, options).await?
        };

        Ok(Rendered {
            tile,
            cache_hit: false,
        })
    }

    /// Remove every cached tile of an image.
    ///
    /// Renders of the image already in flight still return their tile but
    /// do not write it to the cache.
    pub async fn invalidate_image(&self, image_id: &str) -> Result<usize, CacheError> {
        let mut generations = self.generations.write().await;
        *generations.entry(image_id.to_string()).or_default() += 1;
        let removed = self.cache.invalidate_image(image_id).await?;
        drop(generations);
        debug!(image_id = %image_id, removed = removed, "Invalidated cached tiles");
        Ok(removed)
    }

    /// Join or start the single in-flight computation for `key`.
    async fn compute_shared(
        &self,
        key: CacheKey,
        coordinate: &TileCoordinate,
        options: &EnhancementOptions,
    ) -> Result<Arc<EnhancedTile>, RenderError> {
        let cell = Arc::clone(lock_in_flight(&self.in_flight).entry(key.clone()).or_default());
        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            key,
            cell,
        };

        let result = guard
            .cell
            .get_or_init(|| self.compute(guard.key.clone(), coordinate, options))
            .await
            .clone();
        result
    }

    fn generation(generations: &HashMap<String, u64>, image_id: &str) -> u64 {
        generations.get(image_id).copied().unwrap_or_default()
    }

    /// Fetch, decode, enhance, cache and record one tile.
    async fn compute(
        &self,
        key: CacheKey,
        coordinate: &TileCoordinate,
        options: &EnhancementOptions,
    ) -> Result<Arc<EnhancedTile>, RenderError> {
        let start = Instant::now();
        let generation = Self::generation(&*self.generations.read().await, &coordinate.image_id);

        let data = self.store.fetch(coordinate).await.map_err(|e| match e {
            StoreError::NotFound(_) => RenderError::NotFound {
                coordinate: coordinate.clone(),
            },
            other => RenderError::Upstream {
                message: other.to_string(),
            },
        })?;

        let original = tokio::task::spawn_blocking(move || decode_tile(&data))
            .await
            .map_err(|e| RenderError::Decode {
                message: format!("decode task failed: {}", e),
            })?
            .map_err(|e| RenderError::Decode {
                message: e.to_string(),
            })?;

        let (final_image, per_operation) = self.run_operations(Arc::new(original), options).await;

        let tile = Arc::new(EnhancedTile {
            coordinate: coordinate.clone(),
            options: *options,
            final_image,
            per_operation,
            processing_time: start.elapsed(),
            computed_at: Utc::now(),
        });

        {
            let generations = self.generations.read().await;
            if Self::generation(&generations, &coordinate.image_id) != generation {
                debug!(image_id = %coordinate.image_id, z = coordinate.z, x = coordinate.x, y = coordinate.y, "Image invalidated during render, not caching");
            } else if let Err(e) = self.cache.put(key.clone(), Arc::clone(&tile)).await {
                warn!(image_id = %coordinate.image_id, z = coordinate.z, x = coordinate.x, y = coordinate.y, "Cache write failed: {}", e);
            }
        }

        self.record_metadata(&tile, &key);

        debug!(
            image_id = %coordinate.image_id,
            z = coordinate.z,
            x = coordinate.x,
            y = coordinate.y,
            operations = %options.operations(),
            elapsed_ms = tile.processing_time.as_millis() as u64,
            "Rendered tile"
        );

        Ok(tile)
    }

    async fn run_operations(
        &self,
        original: Arc<PixelBuffer>,
        options: &EnhancementOptions,
    ) -> (Arc<PixelBuffer>, BTreeMap<OperationKind, OperationResult>) {
        let requested = options.operations();
        let threshold = options.confidence_threshold();
        let mut results = BTreeMap::new();
        let mut current = original;

        for kind in [OperationKind::SuperRes, OperationKind::Denoise] {
            if !requested.contains(kind) {
                continue;
            }
            let result = self
                .apply(kind, Arc::clone(&current), threshold)
                .await
                .with_passthrough(&current);
            if let Some(image) = &result.image {
                current = Arc::clone(image);
            }
            results.insert(kind, result);
        }

        let analyse = |kind: OperationKind| {
            let image = Arc::clone(&current);
            async move {
                if requested.contains(kind) {
                    Some(self.apply(kind, image, threshold).await)
                } else {
                    None
                }
            }
        };
        let (segment, classify) = tokio::join!(
            analyse(OperationKind::Segment),
            analyse(OperationKind::Classify)
        );
        results.extend(segment.into_iter().chain(classify).map(|r| (r.kind, r)));

        if options.overlay_labels() {
            let features: Vec<Feature> = results
                .values()
                .flat_map(|r| r.detected_features.iter())
                .filter(|f| f.confidence >= threshold)
                .cloned()
                .collect();
            if !features.is_empty() {
                current = self.overlay(current, features, threshold).await;
            }
        }

        (current, results)
    }

    /// Run one provider on the blocking pool. A panicking provider is
    /// recorded as a failed operation.
    async fn apply(&self, kind: OperationKind, image: Arc<PixelBuffer>, threshold: f32) -> OperationResult {
        let provider = Arc::clone(self.operations.get(kind));
        let model_version = provider.model_version().to_string();

        match tokio::task::spawn_blocking(move || provider.apply(&image, threshold)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(operation = %kind, model_version = %model_version, "Operation task failed: {}", e);
                OperationResult::failure(kind, model_version)
            }
        }
    }

    async fn overlay(&self, base: Arc<PixelBuffer>, features: Vec<Feature>, threshold: f32) -> Arc<PixelBuffer> {
        let source = Arc::clone(&base);
        let drawn = tokio::task::spawn_blocking(move || {
            let mut image = (*source).clone();
            let size = image.dimensions();
            draw_feature_overlays(&mut image, &features, threshold, size);
            image
        })
        .await;

        match drawn {
            Ok(image) => Arc::new(image),
            Err(e) => {
                warn!("Overlay task failed, serving tile without labels: {}", e);
                base
            }
        }
    }

    fn record_metadata(&self, tile: &EnhancedTile, key: &CacheKey) {
        let Some(sink) = &self.metadata_sink else {
            return;
        };
        let sink = Arc::clone(sink);
        let metadata = TileMetadata::from_tile(tile, key);

        tokio::spawn(async move {
            if let Err(e) = sink.record(metadata).await {
                warn!("Failed to record tile metadata: {}", e);
            }
        });
    }
}
