//! S3-backed tile store.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::error::StoreError;
use crate::tile::TileCoordinate;

use super::store::{tile_path, validate_image_id, DEFAULT_TILE_EXTENSION};
use super::TileStore;

/// Reads original tiles from S3 or S3-compatible storage (MinIO, etc.).
///
/// The object key of a tile is `{prefix}{image_id}/{z}/{x}/{y}.{ext}`.
///
/// # Example
///
/// ```ignore
/// use deep_zoom_enhancer::source::{create_s3_client, S3TileStore};
///
/// let client = create_s3_client(None, "us-east-1").await;
/// let store = S3TileStore::new(client, "planet-tiles".to_string()).with_prefix("originals/");
/// ```
#[derive(Clone)]
pub struct S3TileStore {
    client: Client,
    bucket: String,
    prefix: String,
    extension: String,
}

impl S3TileStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self {
            client,
            bucket,
            prefix: String::new(),
            extension: DEFAULT_TILE_EXTENSION.to_string(),
        }
    }

    /// Prefix prepended verbatim to every object key.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key of a tile, after validating the image id.
    pub fn object_key(&self, coordinate: &TileCoordinate) -> Result<String, StoreError> {
        validate_image_id(&coordinate.image_id)?;
        Ok(format!("{}{}", self.prefix, tile_path(coordinate, &self.extension)))
    }
}

#[async_trait]
impl TileStore for S3TileStore {
    async fn fetch(&self, coordinate: &TileCoordinate) -> Result<Bytes, StoreError> {
        let key = self.object_key(coordinate)?;

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let location = format!("s3://{}/{}", self.bucket, key);

                let is_no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if is_no_such_key {
                    return StoreError::NotFound(location);
                }

                // Some S3-compatible services answer a bare 404
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);
                if status_is_404 {
                    return StoreError::NotFound(location);
                }

                let err_str = e.to_string();
                if err_str.contains("NoSuchKey") || err_str.contains("NotFound") {
                    return StoreError::NotFound(location);
                }

                StoreError::S3(err_str)
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .into_bytes();

        Ok(data)
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// A custom endpoint switches to path-style addressing, which MinIO and most
/// S3-compatible services require.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
