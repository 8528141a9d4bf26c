//! Document ingestion pipeline for a knowledge base.
//!
//! Binary documents (PDF today) are driven through an external
//! OCR/layout-analysis service and persisted into two cooperating stores:
//! a relational metadata store and a document-content store. The pipeline
//! partitions large documents into page ranges, parses them concurrently
//! under a bounded semaphore with retry, merges the partial results into
//! one continuous document, and writes element metadata and content
//! atomically in intent across the two stores.

pub mod cli;
pub mod config;
pub mod models;
pub mod parse_service;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod storage;
pub mod store;
