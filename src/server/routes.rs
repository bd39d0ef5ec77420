//! Router configuration for the tile and ML API.
//!
//! # Route Structure
//!
//! ```text
//! /health                              - Health check
//! /tiles/{image_id}/{z}/{x}/{y}.jpg    - Tile (GET)
//! /tiles/{image_id}/cache              - Cache invalidation (DELETE)
//! /cache/stats                         - Cache counters
//! /ml/infer                            - Single-tile inference (POST)
//! /ml/batch                            - Batch inference (POST)
//! /ml/precompute/{image_id}            - Background precompute (POST)
//! /ml/models/status                    - Operations and model versions
//! ```

use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use http::header::{CONTENT_TYPE, IF_NONE_MATCH};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    batch_handler, cache_stats_handler, health_handler, infer_handler, invalidate_handler,
    models_status_handler, precompute_handler, tile_handler, AppState,
};
use crate::cache::EnhancementCache;
use crate::source::TileStore;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds for tile responses
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict CORS to specific origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
///
/// The state's Cache-Control max-age is overridden by `config.cache_max_age`.
pub fn create_router<S, C>(state: AppState<S, C>, config: RouterConfig) -> Router
where
    S: TileStore,
    C: EnhancementCache,
{
    let state = state.with_cache_max_age(config.cache_max_age);
    let cors = build_cors_layer(&config);

    let tile_routes = Router::new()
        .route("/{image_id}/{z}/{x}/{filename}", get(tile_handler::<S, C>))
        .route("/{image_id}/cache", delete(invalidate_handler::<S, C>));

    let ml_routes = Router::new()
        .route("/infer", post(infer_handler::<S, C>))
        .route("/batch", post(batch_handler::<S, C>))
        .route("/precompute/{image_id}", post(precompute_handler::<S, C>))
        .route("/models/status", get(models_status_handler::<S, C>));

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/cache/stats", get(cache_stats_handler::<S, C>))
        .nest("/tiles", tile_routes)
        .nest("/ml", ml_routes)
        .with_state(state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, IF_NONE_MATCH])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        // No origins allowed
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
