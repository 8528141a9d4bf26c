//! In-memory store implementations.
//!
//! Back the `--dry-run` ingestion mode and most tests. Semantics mirror
//! the SQLite stores: batch inserts are all-or-nothing and deletes are
//! keyed by id.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{ContentRow, ContentStore, MetaRow, MetaStore, StoreError};

/// In-memory metadata store.
#[derive(Default)]
pub struct MemoryMetaStore {
    rows: Mutex<Vec<MetaRow>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<MetaRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn ensure_schema(&self, _auto_create: bool) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_batch(&self, rows: &[MetaRow]) -> Result<usize, StoreError> {
        let mut guard = self.rows.lock().unwrap();
        guard.extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut guard = self.rows.lock().unwrap();
        let before = guard.len();
        guard.retain(|row| !ids.contains(&row.element_id));
        Ok(before - guard.len())
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let guard = self.rows.lock().unwrap();
        Ok(guard
            .iter()
            .filter(|row| ids.contains(&row.element_id))
            .map(|row| row.element_id.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.lock().unwrap().len() as u64)
    }
}

/// In-memory content store.
#[derive(Default)]
pub struct MemoryContentStore {
    rows: Mutex<Vec<ContentRow>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ContentRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn ensure_schema(&self, _auto_create: bool) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_batch(&self, rows: &[ContentRow]) -> Result<usize, StoreError> {
        let mut guard = self.rows.lock().unwrap();
        guard.extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut guard = self.rows.lock().unwrap();
        let before = guard.len();
        guard.retain(|row| !ids.contains(&row.id));
        Ok(before - guard.len())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.lock().unwrap().len() as u64)
    }
}
