//! Object storage for extracted images.
//!
//! Only used when image upload is enabled. Keys are derived from the
//! element id and the service-reported file name so re-ingestions never
//! collide (element ids are minted fresh per ingestion).

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Blob store for image bytes, addressed by derived object keys.
#[derive(Clone)]
pub struct ImageStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl ImageStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str, prefix: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Bucket name recorded on metadata rows.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Derive the object key for one element's image.
    pub fn object_key(&self, element_id: &str, file_name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{element_id}/{file_name}")
        } else {
            format!("{}/{element_id}/{file_name}", self.prefix)
        }
    }

    /// Upload image bytes; returns the object key written.
    pub async fn put_image(
        &self,
        element_id: &str,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<String, ImageStoreError> {
        let key = self.object_key(element_id, file_name);
        self.store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(bytes))
            .await?;
        Ok(key)
    }

    /// Fetch image bytes by object key.
    pub async fn get_image(&self, key: &str) -> Result<Bytes, ImageStoreError> {
        let result = self.store.get(&ObjectPath::from(key)).await?;
        Ok(result.bytes().await?)
    }

    /// Delete an image by object key.
    pub async fn delete_image(&self, key: &str) -> Result<(), ImageStoreError> {
        self.store.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }
}
