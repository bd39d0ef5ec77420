//! Orchestrator integration tests.
//!
//! Tests verify:
//! - Missing and undecodable tiles are reported and never cached
//! - Renders are deterministic and cached per option set
//! - Failed and panicking operations degrade instead of failing the tile
//! - The cache backend being down does not fail renders
//! - Metadata is recorded for computed tiles only
//! - Concurrent identical renders can share one computation

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use deep_zoom_enhancer::cache::{CacheKey, EnhancementCache, MemoryEnhancementCache};
use deep_zoom_enhancer::enhance::OperationTable;
use deep_zoom_enhancer::error::RenderError;
use deep_zoom_enhancer::pipeline::TileOrchestrator;
use deep_zoom_enhancer::source::MemoryTileStore;
use deep_zoom_enhancer::tile::{EnhancementOptions, OperationKind, OperationSet, TileCoordinate};

use super::test_utils::{
    create_test_jpeg, table_with, BrokenStore, CountingStore, FailingProvider, PanickingProvider,
    RecordingSink, UnavailableCache, FIXTURE_TILE_SIZE,
};

fn ops(kinds: &[OperationKind]) -> EnhancementOptions {
    EnhancementOptions::with_operations(kinds.iter().copied().collect())
}

async fn store_with(coord: &TileCoordinate) -> MemoryTileStore {
    let store = MemoryTileStore::new();
    store.insert(coord.clone(), create_test_jpeg(3)).await;
    store
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_tile_is_not_cached() {
    let orchestrator = TileOrchestrator::new(
        MemoryTileStore::new(),
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    );
    let coord = TileCoordinate::new("mars-001", 5, 9, 9);
    let options = ops(&[OperationKind::SuperRes]);

    let result = orchestrator.render(&coord, &options).await;
    assert!(matches!(result, Err(RenderError::NotFound { .. })));

    let key = CacheKey::new(&coord, &options);
    assert!(!orchestrator.cache().contains(&key).await);
    assert_eq!(orchestrator.cache().stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_undecodable_tile_is_not_cached() {
    let coord = TileCoordinate::new("mars-001", 1, 0, 0);
    let store = MemoryTileStore::new();
    store.insert(coord.clone(), b"definitely not a jpeg".to_vec()).await;
    let orchestrator =
        TileOrchestrator::new(store, MemoryEnhancementCache::new(), OperationTable::builtin());

    let result = orchestrator.render(&coord, &EnhancementOptions::default()).await;
    assert!(matches!(result, Err(RenderError::Decode { .. })));
    assert!(orchestrator.cache().is_empty().await);
}

#[tokio::test]
async fn test_store_failure_is_upstream_error() {
    let orchestrator =
        TileOrchestrator::new(BrokenStore, MemoryEnhancementCache::new(), OperationTable::builtin());
    let coord = TileCoordinate::new("mars-001", 1, 0, 0);

    let result = orchestrator.render(&coord, &EnhancementOptions::default()).await;
    assert!(matches!(result, Err(RenderError::Upstream { .. })));
}

// =============================================================================
// Determinism and Caching
// =============================================================================

#[tokio::test]
async fn test_repeated_renders_are_identical() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let options = ops(&OperationKind::ALL);

    let first = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    )
    .render(&coord, &options)
    .await
    .unwrap();
    let second = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    )
    .render(&coord, &options)
    .await
    .unwrap();

    assert!(!first.cache_hit && !second.cache_hit);
    assert_eq!(*first.tile.final_image, *second.tile.final_image);
    assert_eq!(first.tile.confidence_scores(), second.tile.confidence_scores());
    assert_eq!(
        first.tile.features().collect::<Vec<_>>(),
        second.tile.features().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_second_render_is_cache_hit() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let store = CountingStore::new(store_with(&coord).await);
    let orchestrator = TileOrchestrator::new(
        store.clone(),
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    );
    let options = ops(&[OperationKind::Denoise]);

    let first = orchestrator.render(&coord, &options).await.unwrap();
    let second = orchestrator.render(&coord, &options).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert!(Arc::ptr_eq(&first.tile, &second.tile));
    assert_eq!(store.fetch_count(), 1);
}

#[tokio::test]
async fn test_operation_order_shares_cache_entry() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let store = CountingStore::new(store_with(&coord).await);
    let orchestrator = TileOrchestrator::new(
        store.clone(),
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    );

    let forward = ops(&[OperationKind::SuperRes, OperationKind::Denoise]);
    let reverse = ops(&[OperationKind::Denoise, OperationKind::SuperRes]);
    assert_eq!(CacheKey::new(&coord, &forward), CacheKey::new(&coord, &reverse));

    orchestrator.render(&coord, &forward).await.unwrap();
    let second = orchestrator.render(&coord, &reverse).await.unwrap();

    assert!(second.cache_hit);
    assert_eq!(store.fetch_count(), 1);
    assert_eq!(orchestrator.cache().len().await, 1);
}

#[tokio::test]
async fn test_different_options_are_cached_separately() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let orchestrator = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    );
    let low = EnhancementOptions::new(OperationSet::all(), 0.2, false).unwrap();
    let high = EnhancementOptions::new(OperationSet::all(), 0.9, false).unwrap();

    orchestrator.render(&coord, &low).await.unwrap();
    let second = orchestrator.render(&coord, &high).await.unwrap();

    assert!(!second.cache_hit);
    assert_eq!(orchestrator.cache().len().await, 2);
}

// =============================================================================
// Operation Results
// =============================================================================

#[tokio::test]
async fn test_superres_scales_final_image() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let orchestrator = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    );

    let rendered = orchestrator
        .render(&coord, &ops(&[OperationKind::SuperRes]))
        .await
        .unwrap();

    assert_eq!(
        rendered.tile.final_image.dimensions(),
        (FIXTURE_TILE_SIZE * 2, FIXTURE_TILE_SIZE * 2)
    );
    assert!(rendered.tile.enhanced());
    let sr = &rendered.tile.per_operation[&OperationKind::SuperRes];
    assert!(sr.succeeded);
    assert!(sr.confidence.is_some_and(|c| (0.0..=1.0).contains(&c)));
}

#[tokio::test]
async fn test_failed_superres_passes_input_to_denoise() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);

    let degraded = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        table_with(FailingProvider::new(OperationKind::SuperRes)),
    )
    .render(&coord, &ops(&[OperationKind::SuperRes, OperationKind::Denoise]))
    .await
    .unwrap();

    let denoise_only = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    )
    .render(&coord, &ops(&[OperationKind::Denoise]))
    .await
    .unwrap();

    assert_eq!(*degraded.tile.final_image, *denoise_only.tile.final_image);

    let sr = &degraded.tile.per_operation[&OperationKind::SuperRes];
    assert!(!sr.succeeded);
    assert!(sr.confidence.is_none());
    assert_eq!(sr.model_version, "failing-1.0");
    assert!(!degraded.tile.confidence_scores().contains_key(&OperationKind::SuperRes));
    assert!(degraded.tile.per_operation[&OperationKind::Denoise].succeeded);
}

#[tokio::test]
async fn test_panicking_provider_is_recorded_as_failure() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let orchestrator = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        table_with(PanickingProvider::new(OperationKind::Classify)),
    );

    let rendered = orchestrator
        .render(&coord, &ops(&[OperationKind::Segment, OperationKind::Classify]))
        .await
        .unwrap();

    assert!(!rendered.tile.per_operation[&OperationKind::Classify].succeeded);
    assert!(rendered.tile.per_operation[&OperationKind::Segment].succeeded);
}

#[tokio::test]
async fn test_overlay_changes_pixels_only_when_requested() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let orchestrator = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    );
    let kinds = OperationSet::empty().with(OperationKind::Segment);

    let plain = orchestrator
        .render(&coord, &EnhancementOptions::new(kinds, 0.0, false).unwrap())
        .await
        .unwrap();
    let labelled = orchestrator
        .render(&coord, &EnhancementOptions::new(kinds, 0.0, true).unwrap())
        .await
        .unwrap();

    assert!(plain.tile.features().count() > 0);
    assert_eq!(plain.tile.final_image.dimensions(), labelled.tile.final_image.dimensions());
    assert_ne!(*plain.tile.final_image, *labelled.tile.final_image);
}

// =============================================================================
// Degraded Cache
// =============================================================================

#[tokio::test]
async fn test_unavailable_cache_still_renders() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let cache = Arc::new(UnavailableCache::default());
    let orchestrator = TileOrchestrator::with_shared(
        Arc::new(store_with(&coord).await),
        Arc::clone(&cache),
        OperationTable::builtin(),
    );
    let options = ops(&[OperationKind::Denoise]);

    let first = orchestrator.render(&coord, &options).await.unwrap();
    let second = orchestrator.render(&coord, &options).await.unwrap();

    assert!(!first.cache_hit && !second.cache_hit);
    assert_eq!(cache.gets.load(Ordering::SeqCst), 2);
    assert_eq!(cache.puts.load(Ordering::SeqCst), 2);
    assert!(orchestrator.invalidate_image("mars-001").await.is_err());
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_metadata_recorded_for_computed_tiles() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = TileOrchestrator::new(
        store_with(&coord).await,
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    )
    .with_metadata_sink(sink.clone());
    let options = ops(&[OperationKind::SuperRes, OperationKind::Classify]);

    orchestrator.render(&coord, &options).await.unwrap();
    orchestrator.render(&coord, &options).await.unwrap();

    let records = sink.wait_for(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sink.records().await.len(), 1);

    let record = &records[0];
    assert_eq!(record.image_id, "mars-001");
    assert_eq!((record.z, record.x, record.y), (5, 1, 2));
    assert!(record.enhanced);
    assert_eq!(
        record.cache_key,
        CacheKey::new(&coord, &options).fingerprint()
    );
    assert!(record.confidence_scores.contains_key(&OperationKind::SuperRes));
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_coalesced_renders_fetch_once() {
    let coord = TileCoordinate::new("mars-001", 5, 1, 2);
    let store = CountingStore::new(store_with(&coord).await).with_delay(Duration::from_millis(50));
    let orchestrator = Arc::new(
        TileOrchestrator::new(
            store.clone(),
            MemoryEnhancementCache::new(),
            OperationTable::builtin(),
        )
        .with_coalescing(true),
    );
    let options = ops(&[OperationKind::Denoise]);

    let renders: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            let coord = coord.clone();
            tokio::spawn(async move { orchestrator.render(&coord, &options).await })
        })
        .collect();

    let mut tiles = Vec::new();
    for render in renders {
        tiles.push(render.await.unwrap().unwrap().tile);
    }

    assert_eq!(store.fetch_count(), 1);
    assert!(tiles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[tokio::test]
async fn test_coalesced_failure_is_shared_and_not_cached() {
    let store = CountingStore::new(MemoryTileStore::new()).with_delay(Duration::from_millis(50));
    let orchestrator = Arc::new(
        TileOrchestrator::new(
            store.clone(),
            MemoryEnhancementCache::new(),
            OperationTable::builtin(),
        )
        .with_coalescing(true),
    );
    let coord = TileCoordinate::new("mars-404", 1, 0, 0);
    let options = EnhancementOptions::default();

    let (a, b) = tokio::join!(
        orchestrator.render(&coord, &options),
        orchestrator.render(&coord, &options)
    );

    assert!(matches!(a, Err(RenderError::NotFound { .. })));
    assert!(matches!(b, Err(RenderError::NotFound { .. })));
    assert_eq!(store.fetch_count(), 1);

    // A later request tries again
    let _ = orchestrator.render(&coord, &options).await;
    assert_eq!(store.fetch_count(), 2);
}
