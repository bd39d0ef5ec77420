//! Image metadata lookup.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::tile::ImageBounds;

/// Resolves an image id to its pyramid bounds.
#[async_trait]
pub trait ImageCatalog: Send + Sync + 'static {
    /// Bounds of an image, or `None` if the image is unknown.
    async fn bounds(&self, image_id: &str) -> Option<ImageBounds>;
}

/// Catalog with a fixed set of images.
///
/// The JSON form maps image ids to bounds:
///
/// ```json
/// {
///   "mars-001": { "width": 16384, "height": 8192, "tile_size": 512, "zoom_levels": [0, 1, 2, 3, 4, 5] }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    images: HashMap<String, ImageBounds>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an image.
    pub fn with_image(mut self, image_id: impl Into<String>, bounds: ImageBounds) -> Self {
        self.images.insert(image_id.into(), bounds);
        self
    }

    /// Parse a catalog from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let images = serde_json::from_str(json)?;
        Ok(Self { images })
    }

    /// Load a catalog from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Self::from_json(&json).map_err(|e| CatalogError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Known image ids, sorted.
    pub fn image_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.images.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl ImageCatalog for StaticCatalog {
    async fn bounds(&self, image_id: &str) -> Option<ImageBounds> {
        self.images.get(image_id).cloned()
    }
}
