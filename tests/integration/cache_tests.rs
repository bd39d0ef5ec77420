//! Enhancement cache integration tests.
//!
//! Tests verify:
//! - Invalidation through the orchestrator is scoped to one image
//! - Byte and entry bounds hold while the orchestrator fills the cache
//! - Evicted tiles are recomputed on the next request
//! - Renders in flight during an invalidation do not repopulate the cache

use std::sync::Arc;
use std::time::Duration;

use deep_zoom_enhancer::cache::{CacheKey, EnhancementCache, MemoryEnhancementCache};
use deep_zoom_enhancer::enhance::OperationTable;
use deep_zoom_enhancer::pipeline::TileOrchestrator;
use deep_zoom_enhancer::source::MemoryTileStore;
use deep_zoom_enhancer::tile::{EnhancementOptions, OperationKind, OperationSet, TileCoordinate};

use super::test_utils::{create_test_jpeg, CountingStore, FIXTURE_TILE_SIZE};

async fn store_with_row(image_id: &str, count: u32) -> MemoryTileStore {
    let store = MemoryTileStore::new();
    for x in 0..count {
        store
            .insert(TileCoordinate::new(image_id, 4, x, 0), create_test_jpeg(x))
            .await;
    }
    store
}

#[tokio::test]
async fn test_invalidate_image_leaves_other_images() {
    let store = store_with_row("mars-001", 3).await;
    store
        .insert(TileCoordinate::new("mars-002", 4, 0, 0), create_test_jpeg(5))
        .await;
    let orchestrator =
        TileOrchestrator::new(store, MemoryEnhancementCache::new(), OperationTable::builtin());
    let options = EnhancementOptions::default();

    for x in 0..3 {
        orchestrator
            .render(&TileCoordinate::new("mars-001", 4, x, 0), &options)
            .await
            .unwrap();
    }
    let other = TileCoordinate::new("mars-002", 4, 0, 0);
    orchestrator.render(&other, &options).await.unwrap();

    assert_eq!(orchestrator.invalidate_image("mars-001").await.unwrap(), 3);
    assert_eq!(orchestrator.invalidate_image("mars-001").await.unwrap(), 0);

    assert!(orchestrator.cache().contains(&CacheKey::new(&other, &options)).await);
    assert!(orchestrator.render(&other, &options).await.unwrap().cache_hit);
    assert!(
        !orchestrator
            .render(&TileCoordinate::new("mars-001", 4, 0, 0), &options)
            .await
            .unwrap()
            .cache_hit
    );
}

#[tokio::test]
async fn test_entry_bound_evicts_least_recent() {
    let store = CountingStore::new(store_with_row("mars-001", 4).await);
    let cache = MemoryEnhancementCache::with_capacity_and_entries(usize::MAX, 2);
    let orchestrator = TileOrchestrator::new(store.clone(), cache, OperationTable::builtin());
    let options = EnhancementOptions::default();
    let coord = |x| TileCoordinate::new("mars-001", 4, x, 0);

    for x in 0..3 {
        orchestrator.render(&coord(x), &options).await.unwrap();
    }
    assert_eq!(orchestrator.cache().len().await, 2);
    assert_eq!(store.fetch_count(), 3);

    // Tile 0 was evicted, tile 2 is still cached
    assert!(orchestrator.render(&coord(2), &options).await.unwrap().cache_hit);
    assert!(!orchestrator.render(&coord(0), &options).await.unwrap().cache_hit);
    assert_eq!(store.fetch_count(), 4);
}

#[tokio::test]
async fn test_byte_bound_holds() {
    // Room for roughly two upscaled tiles
    let tile_bytes = (FIXTURE_TILE_SIZE * 2 * FIXTURE_TILE_SIZE * 2 * 3) as usize;
    let cache = Arc::new(MemoryEnhancementCache::with_capacity(tile_bytes * 2 + tile_bytes / 2));
    let orchestrator = TileOrchestrator::with_shared(
        Arc::new(store_with_row("mars-001", 4).await),
        Arc::clone(&cache),
        OperationTable::builtin(),
    );
    let options =
        EnhancementOptions::with_operations(OperationSet::empty().with(OperationKind::SuperRes));

    for x in 0..4 {
        orchestrator
            .render(&TileCoordinate::new("mars-001", 4, x, 0), &options)
            .await
            .unwrap();
        let stats = cache.stats().await.unwrap();
        assert!(stats.bytes_used <= stats.capacity_bytes);
    }

    let stats = cache.stats().await.unwrap();
    assert!(stats.entry_count >= 1 && stats.entry_count < 4);
}

#[tokio::test]
async fn test_render_in_flight_during_invalidation_is_not_cached() {
    let store = CountingStore::new(store_with_row("mars-001", 1).await)
        .with_delay(Duration::from_millis(100));
    let orchestrator = Arc::new(TileOrchestrator::new(
        store.clone(),
        MemoryEnhancementCache::new(),
        OperationTable::builtin(),
    ));
    let coord = TileCoordinate::new("mars-001", 4, 0, 0);
    let options = EnhancementOptions::default();

    let render = {
        let orchestrator = Arc::clone(&orchestrator);
        let coord = coord.clone();
        tokio::spawn(async move { orchestrator.render(&coord, &options).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestrator.invalidate_image("mars-001").await.unwrap();

    // The caller still gets its tile
    assert!(!render.await.unwrap().unwrap().cache_hit);
    assert!(!orchestrator.cache().contains(&CacheKey::new(&coord, &options)).await);

    // Renders started after the invalidation are cached again
    assert!(!orchestrator.render(&coord, &options).await.unwrap().cache_hit);
    assert!(orchestrator.render(&coord, &options).await.unwrap().cache_hit);
    assert_eq!(store.fetch_count(), 2);
}
