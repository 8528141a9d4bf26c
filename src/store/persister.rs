//! Dual-store persistence coordinator.
//!
//! Writes one document's rows into the metadata and content stores as a
//! single logical operation. The stores share no transaction, so ordering
//! carries the consistency story: image uploads first (nothing in any
//! database yet), then the metadata batch in one transaction, then the
//! content batch. A content failure after the metadata commit triggers a
//! best-effort compensation delete of the just-written metadata rows, and
//! the error reports exactly what survived.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;

use crate::models::ElementType;
use crate::storage::{ImageStore, ImageStoreError};

use super::{ContentRow, ContentStore, MetaRow, MetaStore, StoreError};

/// Result of the compensation pass after a failed content write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationOutcome {
    /// Metadata rows removed by compensation.
    pub deleted: usize,
    /// Element ids still present in the metadata store afterwards.
    pub surviving: Vec<String>,
}

impl std::fmt::Display for CompensationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.surviving.is_empty() {
            write!(f, "compensation deleted {} metadata rows", self.deleted)
        } else {
            write!(
                f,
                "compensation deleted {} metadata rows, {} survived",
                self.deleted,
                self.surviving.len()
            )
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("image upload failed for element {element_id}: {source}")]
    ImageUpload {
        element_id: String,
        #[source]
        source: ImageStoreError,
    },

    #[error("image storage requested but no image store is configured")]
    ImageStoreUnconfigured,

    #[error("metadata write failed: {0}")]
    Meta(#[source] StoreError),

    #[error("content write failed after metadata commit ({compensation}): {cause}")]
    PartialWrite {
        #[source]
        cause: StoreError,
        compensation: CompensationOutcome,
    },
}

/// Write counts reported back to the facade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub meta_written: usize,
    pub content_written: usize,
    pub images_stored: usize,
}

/// Coordinates the metadata store, the content store, and the optional
/// image store for one document's elements.
pub struct DualStorePersister {
    meta: Arc<dyn MetaStore>,
    content: Arc<dyn ContentStore>,
    images: Option<ImageStore>,
}

impl DualStorePersister {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        content: Arc<dyn ContentStore>,
        images: Option<ImageStore>,
    ) -> Self {
        Self {
            meta,
            content,
            images,
        }
    }

    /// Persist all rows of one document.
    ///
    /// Rows arrive fully built (no streaming); audit fields are stamped
    /// here so mapping stays pure. The persister is not retried
    /// internally; failures surface to the facade.
    pub async fn persist(
        &self,
        mut meta_rows: Vec<MetaRow>,
        mut content_rows: Vec<ContentRow>,
        image_blobs: &HashMap<String, Bytes>,
        creator: &str,
        store_images: bool,
    ) -> Result<PersistStats, PersistError> {
        let now = Utc::now();
        for row in &mut meta_rows {
            row.audit.stamp(creator, now);
        }
        for row in &mut content_rows {
            row.audit.stamp(creator, now);
        }

        let images_stored = if store_images {
            self.upload_images(&mut meta_rows, image_blobs).await?
        } else {
            0
        };

        let meta_written = self
            .meta
            .insert_batch(&meta_rows)
            .await
            .map_err(PersistError::Meta)?;

        let content_written = match self.content.insert_batch(&content_rows).await {
            Ok(written) => written,
            Err(cause) => {
                let compensation = self.compensate(&meta_rows).await;
                tracing::error!(%cause, %compensation, "content write failed after metadata commit");
                return Err(PersistError::PartialWrite {
                    cause,
                    compensation,
                });
            }
        };

        Ok(PersistStats {
            meta_written,
            content_written,
            images_stored,
        })
    }

    /// Upload every resolvable image blob, filling the storage-location
    /// columns. Runs before any database write so a failure leaves both
    /// stores untouched.
    async fn upload_images(
        &self,
        meta_rows: &mut [MetaRow],
        image_blobs: &HashMap<String, Bytes>,
    ) -> Result<usize, PersistError> {
        let images = self
            .images
            .as_ref()
            .ok_or(PersistError::ImageStoreUnconfigured)?;

        let mut stored = 0usize;
        for row in meta_rows.iter_mut() {
            if row.element_type != ElementType::Image {
                continue;
            }
            let Some(file_name) = row.image_file_name.clone() else {
                continue;
            };
            let Some(blob) = image_blobs.get(&file_name) else {
                // Unresolved references were already warned about upstream.
                continue;
            };

            let key = images
                .put_image(&row.element_id, &file_name, blob.clone())
                .await
                .map_err(|source| PersistError::ImageUpload {
                    element_id: row.element_id.clone(),
                    source,
                })?;

            row.bucket_name = Some(images.bucket().to_string());
            row.image_file_path = Some(key);
            stored += 1;
        }
        Ok(stored)
    }

    /// Best-effort removal of just-written metadata rows.
    async fn compensate(&self, meta_rows: &[MetaRow]) -> CompensationOutcome {
        let ids: Vec<String> = meta_rows.iter().map(|r| r.element_id.clone()).collect();

        let deleted = match self.meta.delete_by_ids(&ids).await {
            Ok(deleted) => deleted,
            Err(error) => {
                tracing::warn!(%error, "compensation delete failed");
                0
            }
        };

        let surviving = match self.meta.existing_ids(&ids).await {
            Ok(surviving) => surviving,
            Err(error) => {
                tracing::warn!(%error, "could not verify compensation, assuming all rows survived");
                ids
            }
        };

        CompensationOutcome { deleted, surviving }
    }
}
