//! API integration tests for the HTTP layer.
//!
//! Tests verify:
//! - Tile retrieval with and without enhancement, and its headers
//! - Error mapping (missing tile, bad parameters, store failures)
//! - Cache invalidation and statistics endpoints
//! - Inference, batch, precompute and model status endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use deep_zoom_enhancer::source::{MemoryTileStore, StaticCatalog};
use deep_zoom_enhancer::tile::{decode_tile, TileCoordinate};
use deep_zoom_enhancer::{create_router, RouterConfig};

use super::test_utils::{
    create_state, create_test_jpeg, fixture_bounds, is_valid_jpeg, populate_image, BrokenStore,
    FIXTURE_TILE_SIZE,
};

async fn router_with_tiles() -> axum::Router {
    let store = MemoryTileStore::new();
    for (x, y) in [(0, 0), (1, 0), (0, 1)] {
        store
            .insert(TileCoordinate::new("mars-001", 5, x, y), create_test_jpeg(x + y))
            .await;
    }
    store
        .insert(TileCoordinate::new("mars-002", 5, 0, 0), create_test_jpeg(9))
        .await;
    create_router(create_state(store, StaticCatalog::new()), RouterConfig::new())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_original_tile_retrieval() {
    let router = router_with_tiles().await;

    let response = router.oneshot(get("/tiles/mars-001/5/0/0.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
    assert_eq!(headers.get("cache-control").unwrap(), "public, max-age=3600");
    assert!(headers.contains_key("etag"));
    assert_eq!(headers.get("x-tile-cache-hit").unwrap(), "false");
    assert_eq!(headers.get("x-tile-enhanced").unwrap(), "false");
    assert!(!headers.contains_key("x-tile-labels"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_jpeg(&body));
}

#[tokio::test]
async fn test_tile_without_jpg_extension() {
    let router = router_with_tiles().await;
    let response = router.oneshot(get("/tiles/mars-001/5/1/0")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_enhanced_tile_is_upscaled() {
    let router = router_with_tiles().await;

    let response = router
        .oneshot(get("/tiles/mars-001/5/0/0.jpg?enhance=true"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-tile-enhanced").unwrap(), "true");
    assert!(response.headers().contains_key("x-processing-time-ms"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let image = decode_tile(&body).unwrap();
    assert_eq!(image.dimensions(), (FIXTURE_TILE_SIZE * 2, FIXTURE_TILE_SIZE * 2));
}

#[tokio::test]
async fn test_labels_header() {
    let router = router_with_tiles().await;

    let response = router
        .oneshot(get("/tiles/mars-001/5/0/0.jpg?labels=true&confidence_threshold=0"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let labels = response.headers().get("x-tile-labels").unwrap().to_str().unwrap();
    assert!(labels.split(',').any(|label| label == "crater"));
}

#[tokio::test]
async fn test_cache_hit_header_and_etag() {
    let router = router_with_tiles().await;

    let first = router
        .clone()
        .oneshot(get("/tiles/mars-001/5/0/0.jpg?ops=denoise,sr"))
        .await
        .unwrap();
    assert_eq!(first.headers().get("x-tile-cache-hit").unwrap(), "false");
    let etag = first.headers().get("etag").unwrap().clone();

    // Same operations in another order hit the same entry
    let second = router
        .clone()
        .oneshot(get("/tiles/mars-001/5/0/0.jpg?ops=sr,denoise"))
        .await
        .unwrap();
    assert_eq!(second.headers().get("x-tile-cache-hit").unwrap(), "true");
    assert_eq!(second.headers().get("etag").unwrap(), &etag);

    let conditional = Request::builder()
        .uri("/tiles/mars-001/5/0/0.jpg?enhance=true")
        .header("if-none-match", etag)
        .body(Body::empty())
        .unwrap();
    let third = router.oneshot(conditional).await.unwrap();
    assert_eq!(third.status(), StatusCode::NOT_MODIFIED);
}

// =============================================================================
// Tile Errors
// =============================================================================

#[tokio::test]
async fn test_missing_tile() {
    let router = router_with_tiles().await;

    let response = router.oneshot(get("/tiles/mars-001/5/9/9.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_invalid_tile_row() {
    let router = router_with_tiles().await;
    let response = router.oneshot(get("/tiles/mars-001/5/0/abc.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_options() {
    let router = router_with_tiles().await;

    let response = router
        .clone()
        .oneshot(get("/tiles/mars-001/5/0/0.jpg?ops=teleport"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_options");

    let response = router
        .oneshot(get("/tiles/mars-001/5/0/0.jpg?labels=true&confidence_threshold=1.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_store_failure_is_bad_gateway() {
    let router = create_router(
        create_state(BrokenStore, StaticCatalog::new()),
        RouterConfig::new(),
    );

    let response = router.oneshot(get("/tiles/mars-001/5/0/0.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"], "upstream_error");
}

// =============================================================================
// Cache Endpoints
// =============================================================================

#[tokio::test]
async fn test_invalidate_is_scoped_to_image() {
    let router = router_with_tiles().await;

    for uri in [
        "/tiles/mars-001/5/0/0.jpg",
        "/tiles/mars-001/5/1/0.jpg?enhance=true",
        "/tiles/mars-002/5/0/0.jpg",
    ] {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/tiles/mars-001/cache")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["image_id"], "mars-001");
    assert_eq!(json["removed"], 2);

    let stats = body_json(router.clone().oneshot(get("/cache/stats")).await.unwrap()).await;
    assert_eq!(stats["entry_count"], 1);

    let response = router.oneshot(get("/tiles/mars-002/5/0/0.jpg")).await.unwrap();
    assert_eq!(response.headers().get("x-tile-cache-hit").unwrap(), "true");
}

#[tokio::test]
async fn test_cache_stats_counts_hits_and_misses() {
    let router = router_with_tiles().await;

    for _ in 0..3 {
        router
            .clone()
            .oneshot(get("/tiles/mars-001/5/0/0.jpg?ops=denoise"))
            .await
            .unwrap();
    }

    let stats = body_json(router.oneshot(get("/cache/stats")).await.unwrap()).await;
    assert_eq!(stats["entry_count"], 1);
    assert_eq!(stats["miss_count"], 1);
    assert_eq!(stats["hit_count"], 2);
    assert!(stats["bytes_used"].as_u64().unwrap() > 0);
}

// =============================================================================
// ML Endpoints
// =============================================================================

#[tokio::test]
async fn test_infer_reports_operations() {
    let router = router_with_tiles().await;

    let request = json_request(
        Method::POST,
        "/ml/infer",
        serde_json::json!({
            "image_id": "mars-001", "z": 5, "x": 0, "y": 0,
            "operations": ["sr", "segment", "classify"],
            "confidence_threshold": 0.0
        }),
    );
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["cache_hit"], false);
    assert!(json["model_versions"]["sr"].is_string());
    assert!(json["confidence_scores"]["classify"].is_number());
    assert!(json["model_versions"].get("denoise").is_none());
    assert!(!json["features_detected"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_infer_missing_tile() {
    let router = router_with_tiles().await;

    let request = json_request(
        Method::POST,
        "/ml/infer",
        serde_json::json!({"image_id": "mars-001", "z": 5, "x": 9, "y": 9}),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_reports_per_item_results() {
    let router = router_with_tiles().await;

    let request = json_request(
        Method::POST,
        "/ml/batch",
        serde_json::json!([
            {"image_id": "mars-001", "z": 5, "x": 0, "y": 0, "operations": ["denoise"]},
            {"image_id": "mars-001", "z": 5, "x": 9, "y": 9, "operations": ["denoise"]},
            {"image_id": "mars-001", "z": 5, "x": 0, "y": 1, "operations": ["denoise"]}
        ]),
    );
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total_requests"], 3);
    assert_eq!(json["succeeded"], 2);
    assert_eq!(json["failed"], 1);

    let results = json["results"].as_array().unwrap();
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["x"], 9);
    assert!(results[1]["error"].is_string());
    assert_eq!(results[2]["y"], 1);
}

#[tokio::test]
async fn test_batch_rejects_invalid_item() {
    let router = router_with_tiles().await;

    let request = json_request(
        Method::POST,
        "/ml/batch",
        serde_json::json!([
            {"image_id": "mars-001", "z": 5, "x": 0, "y": 0, "confidence_threshold": 7.0}
        ]),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_precompute_is_accepted_and_fills_cache() {
    let bounds = fixture_bounds(2, 2, vec![1]);
    let store = MemoryTileStore::new();
    populate_image(&store, "mars-001", &bounds).await;
    let state = create_state(store, StaticCatalog::new().with_image("mars-001", bounds));
    let orchestrator = Arc::clone(&state.orchestrator);
    let router = create_router(state, RouterConfig::new());

    let request = json_request(
        Method::POST,
        "/ml/precompute/mars-001",
        serde_json::json!({"zoom_levels": [1], "operations": ["denoise"]}),
    );
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Precomputation started");
    assert_eq!(json["image_id"], "mars-001");
    assert_eq!(json["operations"], serde_json::json!(["denoise"]));

    let mut cached = 0;
    for _ in 0..200 {
        cached = orchestrator.cache().len().await;
        if cached == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cached, 4);
}

#[tokio::test]
async fn test_models_status() {
    let router = router_with_tiles().await;

    let response = router.oneshot(get("/ml/models/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["available_operations"],
        serde_json::json!(["sr", "denoise", "segment", "classify"])
    );
    assert_eq!(json["models"]["classify"], "terrain-rules-1.0");
    assert_eq!(json["supported_formats"], serde_json::json!(["JPEG", "PNG"]));
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let router = router_with_tiles().await;

    let response = router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}
