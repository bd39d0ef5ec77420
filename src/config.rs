//! Configuration for the Deep Zoom Enhancer server.
//!
//! Options come from command-line arguments, with environment variables
//! (prefix `DZE_`) as fallback and defaults for everything optional.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use deep_zoom_enhancer::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! - `DZE_HOST` - Server bind address (default: 0.0.0.0)
//! - `DZE_PORT` - Server port (default: 8000)
//! - `DZE_TILE_ROOT` - Serve original tiles from a local directory
//! - `DZE_S3_BUCKET` / `DZE_S3_PREFIX` - Serve original tiles from S3
//! - `DZE_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `DZE_S3_REGION` - AWS region (default: us-east-1)
//! - `DZE_TILE_EXTENSION` - Extension of stored tiles (default: jpg)
//! - `DZE_CATALOG` - JSON file describing each image's pyramid
//! - `DZE_CACHE_BYTES` / `DZE_CACHE_ENTRIES` - Enhancement cache bounds
//! - `DZE_BATCH_CHUNK_SIZE` - Items rendered concurrently per batch chunk (default: 4)
//! - `DZE_PRECOMPUTE_CONCURRENCY` - Renders in flight per precompute job (default: 4)
//! - `DZE_SUPERRES_SCALE` - Super-resolution factor (default: 2)
//! - `DZE_DENOISE_RADIUS` - Median filter radius (default: 1)
//! - `DZE_COALESCE_RENDERS` - Share one computation between concurrent identical requests
//! - `DZE_JPEG_QUALITY` - Output JPEG quality (default: 80)
//! - `DZE_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `DZE_CORS_ORIGINS` - Allowed CORS origins (comma-separated)
//! - `DZE_METADATA_LOG` - Append per-tile metadata to this JSON lines file

use std::path::PathBuf;

use clap::Parser;

use crate::cache::{DEFAULT_CACHE_CAPACITY_BYTES, DEFAULT_CACHE_MAX_ENTRIES};
use crate::enhance::{ProviderSettings, DEFAULT_DENOISE_RADIUS, DEFAULT_SUPERRES_SCALE};
use crate::pipeline::{DEFAULT_BATCH_CHUNK_SIZE, DEFAULT_PRECOMPUTE_CONCURRENCY};
use crate::source::DEFAULT_TILE_EXTENSION;
use crate::tile::{is_valid_quality, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Largest accepted super-resolution factor.
pub const MAX_SUPERRES_SCALE: u32 = 8;

/// Largest accepted median filter radius.
pub const MAX_DENOISE_RADIUS: u32 = 8;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Deep Zoom Enhancer - a tile server for planetary imagery.
///
/// Serves Deep Zoom tiles with optional super-resolution, denoising and
/// terrain labelling, caching every enhanced result.
#[derive(Parser, Debug, Clone)]
#[command(name = "deep-zoom-enhancer")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "DZE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DZE_PORT")]
    pub port: u16,

    // =========================================================================
    // Tile Source Configuration
    // =========================================================================
    /// Local directory holding original tiles as `{image_id}/{z}/{x}/{y}.{ext}`.
    ///
    /// Takes precedence over S3 when both are set.
    #[arg(long, env = "DZE_TILE_ROOT")]
    pub tile_root: Option<PathBuf>,

    /// S3 bucket holding original tiles.
    #[arg(long, env = "DZE_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix of tiles within the bucket.
    #[arg(long, env = "DZE_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "DZE_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "DZE_S3_REGION")]
    pub s3_region: String,

    /// File extension of stored tiles.
    #[arg(long, default_value = DEFAULT_TILE_EXTENSION, env = "DZE_TILE_EXTENSION")]
    pub tile_extension: String,

    /// JSON file mapping image ids to pyramid bounds, used by precompute.
    #[arg(long, env = "DZE_CATALOG")]
    pub catalog: Option<PathBuf>,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Approximate byte budget of the enhancement cache.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY_BYTES, env = "DZE_CACHE_BYTES")]
    pub cache_bytes: usize,

    /// Maximum number of enhanced tiles to cache.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_ENTRIES, env = "DZE_CACHE_ENTRIES")]
    pub cache_entries: usize,

    // =========================================================================
    // Pipeline Configuration
    // =========================================================================
    /// Items rendered concurrently within each batch chunk.
    #[arg(long, default_value_t = DEFAULT_BATCH_CHUNK_SIZE, env = "DZE_BATCH_CHUNK_SIZE")]
    pub batch_chunk_size: usize,

    /// Renders in flight per precompute job.
    #[arg(long, default_value_t = DEFAULT_PRECOMPUTE_CONCURRENCY, env = "DZE_PRECOMPUTE_CONCURRENCY")]
    pub precompute_concurrency: usize,

    /// Super-resolution upscale factor.
    #[arg(long, default_value_t = DEFAULT_SUPERRES_SCALE, env = "DZE_SUPERRES_SCALE")]
    pub superres_scale: u32,

    /// Median filter radius for denoising.
    #[arg(long, default_value_t = DEFAULT_DENOISE_RADIUS, env = "DZE_DENOISE_RADIUS")]
    pub denoise_radius: u32,

    /// Share one computation between concurrent requests for the same tile.
    #[arg(long, default_value_t = false, env = "DZE_COALESCE_RENDERS")]
    pub coalesce_renders: bool,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// JPEG quality for tile responses (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "DZE_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "DZE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "DZE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Persistence and Logging
    // =========================================================================
    /// Append per-tile metadata to this JSON lines file instead of the log.
    #[arg(long, env = "DZE_METADATA_LOG")]
    pub metadata_log: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_root.is_none() && self.s3_bucket.as_deref().map_or(true, str::is_empty) {
            return Err(
                "No tile source configured. Set --tile-root (DZE_TILE_ROOT) \
                 or --s3-bucket (DZE_S3_BUCKET)"
                    .to_string(),
            );
        }

        if self.tile_extension.is_empty() || self.tile_extension.contains(['/', '.']) {
            return Err("tile_extension must be a bare extension such as \"jpg\"".to_string());
        }

        if self.cache_bytes == 0 {
            return Err("cache_bytes must be greater than 0".to_string());
        }
        if self.cache_entries == 0 {
            return Err("cache_entries must be greater than 0".to_string());
        }

        if self.batch_chunk_size == 0 {
            return Err("batch_chunk_size must be greater than 0".to_string());
        }
        if self.precompute_concurrency == 0 {
            return Err("precompute_concurrency must be greater than 0".to_string());
        }

        if self.superres_scale == 0 || self.superres_scale > MAX_SUPERRES_SCALE {
            return Err(format!(
                "superres_scale must be between 1 and {}",
                MAX_SUPERRES_SCALE
            ));
        }
        if self.denoise_radius > MAX_DENOISE_RADIUS {
            return Err(format!(
                "denoise_radius must be at most {}",
                MAX_DENOISE_RADIUS
            ));
        }

        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Provider settings derived from the pipeline options.
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            superres_scale: self.superres_scale,
            denoise_radius: self.denoise_radius,
            ..ProviderSettings::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
