//! Write-behind tile metadata.
//!
//! After every computed render the orchestrator hands a [`TileMetadata`]
//! record to a [`MetadataSink`] from a spawned task. Sink failures are logged
//! and never reach the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::CacheKey;
use crate::error::PersistenceError;
use crate::pipeline::EnhancedTile;
use crate::tile::OperationKind;

/// One row describing a computed tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMetadata {
    pub image_id: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,

    /// Whether any operation succeeded
    pub enhanced: bool,

    /// Versions of the successful operations joined with `+`
    pub model_version: Option<String>,

    pub processing_time_secs: f64,

    pub confidence_scores: BTreeMap<OperationKind, f32>,

    pub features_detected: usize,

    /// Fingerprint of the tile's cache key
    pub cache_key: String,

    pub recorded_at: DateTime<Utc>,
}

impl TileMetadata {
    pub fn from_tile(tile: &EnhancedTile, key: &CacheKey) -> Self {
        Self {
            image_id: tile.coordinate.image_id.clone(),
            z: tile.coordinate.z,
            x: tile.coordinate.x,
            y: tile.coordinate.y,
            enhanced: tile.enhanced(),
            model_version: tile.model_version(),
            processing_time_secs: tile.processing_time.as_secs_f64(),
            confidence_scores: tile.confidence_scores(),
            features_detected: tile.features().count(),
            cache_key: key.fingerprint(),
            recorded_at: Utc::now(),
        }
    }
}

/// Destination for tile metadata records.
#[async_trait]
pub trait MetadataSink: Send + Sync + 'static {
    async fn record(&self, metadata: TileMetadata) -> Result<(), PersistenceError>;
}

/// Sink that emits each record as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetadataSink;

#[async_trait]
impl MetadataSink for TracingMetadataSink {
    async fn record(&self, metadata: TileMetadata) -> Result<(), PersistenceError> {
        info!(
            image_id = %metadata.image_id,
            z = metadata.z,
            x = metadata.x,
            y = metadata.y,
            enhanced = metadata.enhanced,
            model_version = metadata.model_version.as_deref().unwrap_or("-"),
            processing_time_secs = metadata.processing_time_secs,
            features_detected = metadata.features_detected,
            cache_key = %metadata.cache_key,
            "Tile metadata"
        );
        Ok(())
    }
}

/// Sink appending one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesMetadataSink {
    path: PathBuf,
    // Serializes appends so lines never interleave
    lock: Mutex<()>,
}

impl JsonLinesMetadataSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetadataSink for JsonLinesMetadataSink {
    async fn record(&self, metadata: TileMetadata) -> Result<(), PersistenceError> {
        let mut line =
            serde_json::to_vec(&metadata).map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistenceError::Io(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))?;
        Ok(())
    }
}
