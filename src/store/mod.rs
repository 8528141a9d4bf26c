//! Persistence layer for element metadata and element content.
//!
//! Elements project into two rows: a [`MetaRow`] for the relational
//! metadata store (the authoritative index) and a [`ContentRow`] for the
//! document-content store. The stores share no transaction; the persister
//! coordinates them and compensates when the second write fails.

mod content;
mod memory;
mod meta;
mod persister;
mod pool;

pub use content::SqliteContentStore;
pub use memory::{MemoryContentStore, MemoryMetaStore};
pub use meta::SqliteMetaStore;
pub use persister::{CompensationOutcome, DualStorePersister, PersistError, PersistStats};
pub use pool::AsyncSqlitePool;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AuditFields, ElementType, KnowledgeRef};

/// Errors from either store client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Required table is absent and automatic DDL is disabled.
    #[error("table `{table}` does not exist; run `kbi db init` or apply manually:\n{ddl}")]
    MissingTable { table: String, ddl: String },
}

/// Metadata projection of one element, destined for `element_meta_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaRow {
    pub element_id: String,
    pub page_index: Option<i32>,
    pub element_type: ElementType,
    /// Bounding box serialized as a JSON `[x, y, w, h]` array.
    pub page_position: Option<String>,
    pub text_level: Option<i32>,
    /// Object-store bucket, set only when image upload ran.
    pub bucket_name: Option<String>,
    /// Object-store key, set only when image upload ran.
    pub image_file_path: Option<String>,
    pub image_file_name: Option<String>,
    pub image_file_type: Option<String>,
    pub image_file_suffix: Option<String>,
    pub knowledge: KnowledgeRef,
    pub audit: AuditFields,
}

/// Content projection of one element, destined for `element_data`.
///
/// `id` equals the element id of the matching [`MetaRow`]; the content
/// sub-document shape depends on the element type.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRow {
    pub id: String,
    pub element_type: ElementType,
    pub content: serde_json::Value,
    pub audit: AuditFields,
}

/// Relational metadata store.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Verify the schema exists, creating it when `auto_create` is set.
    async fn ensure_schema(&self, auto_create: bool) -> Result<(), StoreError>;

    /// Insert all rows inside a single transaction. Returns the row count.
    async fn insert_batch(&self, rows: &[MetaRow]) -> Result<usize, StoreError>;

    /// Delete rows by element id. Returns the number deleted.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Which of the given ids are currently present.
    async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError>;

    /// Total live rows.
    async fn count(&self) -> Result<u64, StoreError>;
}

/// Document-content store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Verify the schema exists, creating it when `auto_create` is set.
    async fn ensure_schema(&self, auto_create: bool) -> Result<(), StoreError>;

    /// Insert all rows as one batch. Returns the row count.
    async fn insert_batch(&self, rows: &[ContentRow]) -> Result<usize, StoreError>;

    /// Delete rows by id. Returns the number deleted.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Total live rows.
    async fn count(&self) -> Result<u64, StoreError>;
}
