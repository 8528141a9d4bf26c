//! Knowledge tagging, audit fields, and the ingestion summary report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ElementType, FileKind};

/// Knowledge-base reference carried end-to-end for tagging persisted rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRef {
    pub kb_id: String,
    pub kb_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_kb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_kb_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_type: Option<String>,
}

/// Common audit columns shared by both stores.
///
/// The persister stamps these immediately before writing; mappers leave
/// them at their defaults so mapping stays a pure function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    /// Status flag, 0 = normal.
    pub status: i32,
    pub creator: String,
    pub create_time: DateTime<Utc>,
    pub updater: String,
    pub update_time: DateTime<Utc>,
    /// Soft-delete flag, 0 = live, 1 = deleted.
    pub deleted: i32,
}

impl Default for AuditFields {
    fn default() -> Self {
        Self {
            status: 0,
            creator: String::new(),
            create_time: DateTime::UNIX_EPOCH,
            updater: String::new(),
            update_time: DateTime::UNIX_EPOCH,
            deleted: 0,
        }
    }
}

impl AuditFields {
    /// Stamp creator/updater and both timestamps.
    pub fn stamp(&mut self, actor: &str, at: DateTime<Utc>) {
        self.creator = actor.to_string();
        self.updater = actor.to_string();
        self.create_time = at;
        self.update_time = at;
    }
}

/// Summary returned by the ingestion facade on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub file_name: String,
    pub file_kind: FileKind,
    pub total_pages: u32,
    pub total_elements: usize,
    /// Element counts keyed by type; only types that occurred are present.
    pub by_type: BTreeMap<ElementType, usize>,
    pub meta_written: usize,
    pub content_written: usize,
    pub images_stored: usize,
}

impl IngestionReport {
    /// An empty report for a document with no pages.
    pub fn empty(file_name: &str, file_kind: FileKind) -> Self {
        Self {
            file_name: file_name.to_string(),
            file_kind,
            total_pages: 0,
            total_elements: 0,
            by_type: BTreeMap::new(),
            meta_written: 0,
            content_written: 0,
            images_stored: 0,
        }
    }
}
