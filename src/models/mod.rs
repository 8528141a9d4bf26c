//! Data models for the ingestion pipeline.

mod document;
mod element;
mod report;

pub use document::{Document, FileKind, PageRange};
pub use element::{Element, ElementPayload, ElementType, Page, ParsedDocument};
pub use report::{AuditFields, IngestionReport, KnowledgeRef};
