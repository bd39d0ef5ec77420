//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /tiles/{image_id}/{z}/{x}/{y}.jpg    POST /ml/{infer,..}  │
//! │                                                                 │
//! │  ┌───────────────────────────┐  ┌───────────────────────────┐   │
//! │  │         handlers          │  │          routes           │   │
//! │  │ (requests, error mapping) │  │  (router config, CORS)    │   │
//! │  └───────────────────────────┘  └───────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//!              TileOrchestrator / PrecomputeScheduler /
//!                         BatchCoordinator
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    batch_handler, cache_stats_handler, health_handler, infer_handler, invalidate_handler,
    models_status_handler, precompute_handler, tile_handler, ApiError, AppState, BatchResponse,
    ErrorResponse, HealthResponse, InferenceRequest, InferenceResponse, InvalidateResponse,
    ModelsStatusResponse, PrecomputeAccepted, PrecomputeRequest, TilePathParams,
    TileQueryParams, MAX_BATCH_REQUESTS,
};
pub use routes::{create_router, RouterConfig};
