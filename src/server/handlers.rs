//! HTTP request handlers for the tile and ML API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /tiles/{image_id}/{z}/{x}/{y}.jpg` - Serve an (optionally enhanced) tile
//! - `DELETE /tiles/{image_id}/cache` - Drop every cached tile of an image
//! - `GET /cache/stats` - Enhancement cache counters
//! - `POST /ml/infer` - Run operations on one tile and report the results
//! - `POST /ml/batch` - Run operations on many tiles
//! - `POST /ml/precompute/{image_id}` - Start a background precompute job
//! - `GET /ml/models/status` - Available operations and model versions

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, CacheStats, EnhancementCache, MemoryEnhancementCache};
use crate::enhance::Feature;
use crate::error::{CacheError, CodecError, OptionsError, RenderError};
use crate::pipeline::{BatchCoordinator, BatchRequest, PrecomputeScheduler, Rendered, TileOrchestrator};
use crate::source::TileStore;
use crate::tile::{
    EnhancementOptions, JpegTileEncoder, OperationKind, OperationSet, TileCoordinate,
    DEFAULT_CONFIDENCE_THRESHOLD,
};

/// Largest accepted `/ml/batch` request.
pub const MAX_BATCH_REQUESTS: usize = 256;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor. The
/// orchestrator, scheduler and batch coordinator all share one cache.
pub struct AppState<S: TileStore, C: EnhancementCache = MemoryEnhancementCache> {
    pub orchestrator: Arc<TileOrchestrator<S, C>>,

    pub scheduler: Arc<PrecomputeScheduler<S, C>>,

    pub batch: Arc<BatchCoordinator<S, C>>,

    /// Encoder for tile responses
    pub encoder: JpegTileEncoder,

    /// Cache-Control max-age in seconds (defaults to 1 hour)
    pub cache_max_age: u32,
}

impl<S: TileStore, C: EnhancementCache> AppState<S, C> {
    pub fn new(
        orchestrator: Arc<TileOrchestrator<S, C>>,
        scheduler: Arc<PrecomputeScheduler<S, C>>,
        batch: Arc<BatchCoordinator<S, C>>,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            batch,
            encoder: JpegTileEncoder::new(),
            cache_max_age: 3600,
        }
    }

    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.encoder = JpegTileEncoder::with_quality(quality);
        self
    }
}

impl<S: TileStore, C: EnhancementCache> Clone for AppState<S, C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            scheduler: Arc::clone(&self.scheduler),
            batch: Arc::clone(&self.batch),
            encoder: self.encoder.clone(),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from: `/tiles/{image_id}/{z}/{x}/{filename}`
/// where filename is `{y}` or `{y}.jpg`
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub image_id: String,

    /// Zoom level
    pub z: u32,

    /// Tile column
    pub x: u32,

    /// Tile row with optional .jpg extension (e.g., "0" or "0.jpg")
    pub filename: String,
}

impl TilePathParams {
    /// Parse the Y coordinate from the filename, stripping any .jpg extension.
    pub fn y(&self) -> Result<u32, std::num::ParseIntError> {
        let y_str = self.filename.strip_suffix(".jpg").unwrap_or(&self.filename);
        y_str.parse()
    }
}

/// Query parameters for tile requests.
#[derive(Debug, Default, Deserialize)]
pub struct TileQueryParams {
    /// Comma-separated operations, e.g. `sr,denoise`
    #[serde(default)]
    pub ops: Option<String>,

    /// Shorthand for `sr,denoise`
    #[serde(default)]
    pub enhance: bool,

    /// Shorthand for `segment,classify` with label overlays
    #[serde(default)]
    pub labels: bool,

    #[serde(default)]
    pub confidence_threshold: Option<f32>,
}

impl TileQueryParams {
    /// Resolve the query into validated enhancement options.
    pub fn options(&self) -> Result<EnhancementOptions, OptionsError> {
        let mut operations = match &self.ops {
            Some(list) => OperationSet::parse_list(list)?,
            None => OperationSet::empty(),
        };
        if self.enhance {
            operations.insert(OperationKind::SuperRes);
            operations.insert(OperationKind::Denoise);
        }
        if self.labels {
            operations.insert(OperationKind::Segment);
            operations.insert(OperationKind::Classify);
        }
        EnhancementOptions::new(
            operations,
            self.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            self.labels,
        )
    }
}

fn default_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

/// Body of `/ml/infer` and each item of `/ml/batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceRequest {
    pub image_id: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,

    #[serde(default)]
    pub operations: Vec<OperationKind>,

    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,

    #[serde(default)]
    pub overlay_labels: bool,
}

impl TryFrom<InferenceRequest> for BatchRequest {
    type Error = OptionsError;

    fn try_from(request: InferenceRequest) -> Result<Self, Self::Error> {
        let options = EnhancementOptions::new(
            request.operations.into_iter().collect(),
            request.confidence_threshold,
            request.overlay_labels,
        )?;
        Ok(BatchRequest::new(
            TileCoordinate::new(request.image_id, request.z, request.x, request.y),
            options,
        ))
    }
}

/// Body of `/ml/precompute/{image_id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrecomputeRequest {
    /// Levels to walk; empty means every level of the image
    #[serde(default)]
    pub zoom_levels: Vec<u32>,

    #[serde(default)]
    pub operations: Vec<OperationKind>,

    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,

    #[serde(default)]
    pub overlay_labels: bool,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Result of running operations on one tile.
#[derive(Debug, Serialize)]
pub struct InferenceResponse {
    pub image_id: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,

    pub success: bool,

    /// Seconds spent computing the tile (zero for a cache hit's lookup)
    pub processing_time: f64,

    pub model_versions: BTreeMap<OperationKind, String>,

    pub confidence_scores: BTreeMap<OperationKind, f32>,

    pub features_detected: Vec<Feature>,

    /// Operations that failed and were passed through
    pub failed_operations: Vec<OperationKind>,

    pub cache_hit: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InferenceResponse {
    fn from_rendered(rendered: &Rendered) -> Self {
        let tile = &rendered.tile;
        Self {
            image_id: tile.coordinate.image_id.clone(),
            z: tile.coordinate.z,
            x: tile.coordinate.x,
            y: tile.coordinate.y,
            success: true,
            processing_time: tile.processing_time.as_secs_f64(),
            model_versions: tile
                .per_operation
                .iter()
                .filter(|(_, r)| r.succeeded)
                .map(|(kind, r)| (*kind, r.model_version.clone()))
                .collect(),
            confidence_scores: tile.confidence_scores(),
            features_detected: tile.features().cloned().collect(),
            failed_operations: tile
                .per_operation
                .iter()
                .filter(|(_, r)| !r.succeeded)
                .map(|(kind, _)| *kind)
                .collect(),
            cache_hit: rendered.cache_hit,
            error: None,
        }
    }

    fn failed(coordinate: &TileCoordinate, error: String) -> Self {
        Self {
            image_id: coordinate.image_id.clone(),
            z: coordinate.z,
            x: coordinate.x,
            y: coordinate.y,
            success: false,
            processing_time: 0.0,
            model_versions: BTreeMap::new(),
            confidence_scores: BTreeMap::new(),
            features_detected: Vec::new(),
            failed_operations: Vec::new(),
            cache_hit: false,
            error: Some(error),
        }
    }
}

/// Response from `/ml/batch`.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub total_requests: usize,
    pub succeeded: usize,
    pub failed: usize,

    /// One entry per request, in request order
    pub results: Vec<InferenceResponse>,
}

/// Response from `/ml/precompute/{image_id}`.
#[derive(Debug, Serialize)]
pub struct PrecomputeAccepted {
    pub message: String,
    pub image_id: String,
    pub zoom_levels: Vec<u32>,
    pub operations: OperationSet,
}

/// Response from `DELETE /tiles/{image_id}/cache`.
#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub image_id: String,
    pub removed: usize,
}

/// Response from `/ml/models/status`.
#[derive(Debug, Serialize)]
pub struct ModelsStatusResponse {
    pub available_operations: Vec<OperationKind>,
    pub models: BTreeMap<OperationKind, String>,
    pub supported_formats: Vec<&'static str>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Build the JSON error response, logging by severity:
/// - 5xx errors at ERROR
/// - 404 at DEBUG (common and expected)
/// - other 4xx at WARN
fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

/// Convert RenderError to HTTP response.
impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            RenderError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            RenderError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RenderError::Decode { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "decode_error"),
        };
        error_response(status, error_type, self.to_string())
    }
}

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Render(RenderError),
    Options(OptionsError),
    Codec(CodecError),
    Cache(CacheError),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Render(err) => err.into_response(),
            ApiError::Options(err) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_options", err.to_string())
            }
            ApiError::Codec(err) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "encode_error", err.to_string())
            }
            ApiError::Cache(err) => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable", err.to_string())
            }
            ApiError::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
        }
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        ApiError::Render(err)
    }
}

impl From<OptionsError> for ApiError {
    fn from(err: OptionsError) -> Self {
        ApiError::Options(err)
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        ApiError::Codec(err)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Cache(err)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{image_id}/{z}/{x}/{y}.jpg`
///
/// # Query Parameters
///
/// - `ops`: comma-separated operations (`sr`, `denoise`, `segment`, `classify`)
/// - `enhance`: add `sr` and `denoise`
/// - `labels`: add `segment` and `classify` and draw label overlays
/// - `confidence_threshold`: minimum feature confidence, 0.0-1.0 (default: 0.5)
///
/// # Response
///
/// - `200 OK`: JPEG tile
/// - `304 Not Modified`: `If-None-Match` matches the tile's ETag
/// - `400 Bad Request`: invalid coordinate or options
/// - `404 Not Found`: no original tile at the coordinate
/// - `502 Bad Gateway`: tile store failure
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `ETag`: fingerprint of the tile's cache key
/// - `X-Tile-Cache-Hit`, `X-Tile-Enhanced`: `true|false`
/// - `X-Tile-Labels`: comma-separated labels (only when features were detected)
/// - `X-Processing-Time-Ms`
pub async fn tile_handler<S: TileStore, C: EnhancementCache>(
    State(state): State<AppState<S, C>>,
    Path(params): Path<TilePathParams>,
    Query(query): Query<TileQueryParams>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let y = params
        .y()
        .map_err(|_| ApiError::BadRequest(format!("Invalid tile row: {}", params.filename)))?;
    let coordinate = TileCoordinate::new(params.image_id, params.z, params.x, y);
    let options = query.options()?;

    let rendered = state.orchestrator.render(&coordinate, &options).await?;
    let tile = Arc::clone(&rendered.tile);

    let etag = format!("\"{}\"", CacheKey::new(&coordinate, &options).fingerprint());
    let not_modified = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_str(&format!("public, max-age={}", state.cache_max_age))
            .unwrap_or_else(|_| HeaderValue::from_static("public")),
    );
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }

    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    let encoder = state.encoder.clone();
    let image = Arc::clone(&tile.final_image);
    let data = tokio::task::spawn_blocking(move || encoder.encode(&image))
        .await
        .map_err(|e| CodecError::Encode {
            message: format!("encode task failed: {}", e),
        })??;

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert("x-tile-cache-hit", bool_header(rendered.cache_hit));
    headers.insert("x-tile-enhanced", bool_header(tile.enhanced()));
    headers.insert(
        "x-processing-time-ms",
        HeaderValue::from(tile.processing_time.as_millis() as u64),
    );
    let labels = tile.labels().into_iter().collect::<Vec<_>>().join(",");
    if !labels.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&labels) {
            headers.insert("x-tile-labels", value);
        }
    }

    Ok((StatusCode::OK, headers, data).into_response())
}

fn bool_header(value: bool) -> HeaderValue {
    HeaderValue::from_static(if value { "true" } else { "false" })
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Drop every cached tile of an image.
///
/// # Endpoint
///
/// `DELETE /tiles/{image_id}/cache`
pub async fn invalidate_handler<S: TileStore, C: EnhancementCache>(
    State(state): State<AppState<S, C>>,
    Path(image_id): Path<String>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let removed = state.orchestrator.invalidate_image(&image_id).await?;
    info!(image_id = %image_id, removed = removed, "Cache invalidated");
    Ok(Json(InvalidateResponse { image_id, removed }))
}

/// Report cache counters.
///
/// # Endpoint
///
/// `GET /cache/stats`
pub async fn cache_stats_handler<S: TileStore, C: EnhancementCache>(
    State(state): State<AppState<S, C>>,
) -> Result<Json<CacheStats>, ApiError> {
    Ok(Json(state.orchestrator.cache().stats().await?))
}

/// Run operations on one tile.
///
/// # Endpoint
///
/// `POST /ml/infer`
///
/// ```json
/// { "image_id": "mars-001", "z": 5, "x": 3, "y": 7, "operations": ["sr", "segment"], "confidence_threshold": 0.6 }
/// ```
pub async fn infer_handler<S: TileStore, C: EnhancementCache>(
    State(state): State<AppState<S, C>>,
    Json(request): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ApiError> {
    let request = BatchRequest::try_from(request)?;
    let rendered = state
        .orchestrator
        .render(&request.coordinate, &request.options)
        .await?;
    Ok(Json(InferenceResponse::from_rendered(&rendered)))
}

/// Run operations on many tiles. Failures are reported per item.
///
/// # Endpoint
///
/// `POST /ml/batch` with a JSON array of `/ml/infer` bodies
pub async fn batch_handler<S: TileStore, C: EnhancementCache>(
    State(state): State<AppState<S, C>>,
    Json(requests): Json<Vec<InferenceRequest>>,
) -> Result<Json<BatchResponse>, ApiError> {
    if requests.len() > MAX_BATCH_REQUESTS {
        return Err(ApiError::BadRequest(format!(
            "Batch of {} requests exceeds the limit of {}",
            requests.len(),
            MAX_BATCH_REQUESTS
        )));
    }

    let requests = requests
        .into_iter()
        .map(BatchRequest::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let coordinates: Vec<TileCoordinate> = requests.iter().map(|r| r.coordinate.clone()).collect();

    let outcomes = state.batch.run_batch(requests).await;

    let results: Vec<InferenceResponse> = outcomes
        .iter()
        .zip(&coordinates)
        .map(|(outcome, coordinate)| match outcome {
            Ok(rendered) => InferenceResponse::from_rendered(rendered),
            Err(e) => InferenceResponse::failed(coordinate, e.to_string()),
        })
        .collect();
    let succeeded = results.iter().filter(|r| r.success).count();

    Ok(Json(BatchResponse {
        total_requests: results.len(),
        succeeded,
        failed: results.len() - succeeded,
        results,
    }))
}

/// Start precomputing an image in the background.
///
/// # Endpoint
///
/// `POST /ml/precompute/{image_id}`
///
/// ```json
/// { "zoom_levels": [5, 6], "operations": ["sr", "denoise"] }
/// ```
///
/// Returns `202 Accepted` immediately; progress is logged.
pub async fn precompute_handler<S: TileStore, C: EnhancementCache>(
    State(state): State<AppState<S, C>>,
    Path(image_id): Path<String>,
    Json(request): Json<PrecomputeRequest>,
) -> Result<(StatusCode, Json<PrecomputeAccepted>), ApiError> {
    let operations: OperationSet = request.operations.into_iter().collect();
    let options = EnhancementOptions::new(
        operations,
        request.confidence_threshold,
        request.overlay_labels,
    )?;

    // The job outlives the request; it stops on completion or shutdown
    let _handle = state
        .scheduler
        .schedule(image_id.clone(), request.zoom_levels.clone(), options);

    Ok((
        StatusCode::ACCEPTED,
        Json(PrecomputeAccepted {
            message: "Precomputation started".to_string(),
            image_id,
            zoom_levels: request.zoom_levels,
            operations,
        }),
    ))
}

/// Report available operations and the model behind each.
///
/// # Endpoint
///
/// `GET /ml/models/status`
pub async fn models_status_handler<S: TileStore, C: EnhancementCache>(
    State(state): State<AppState<S, C>>,
) -> Json<ModelsStatusResponse> {
    Json(ModelsStatusResponse {
        available_operations: OperationKind::ALL.to_vec(),
        models: state
            .orchestrator
            .operations()
            .model_versions()
            .into_iter()
            .collect(),
        supported_formats: vec!["JPEG", "PNG"],
    })
}

// =============================================================================
// Tests
// =============================================================================
