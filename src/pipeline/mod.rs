//! The document ingestion pipeline.
//!
//! Raw bytes flow through partitioning and concurrent parsing, merging,
//! element mapping, and dual-store persistence, ending in a summary
//! report. The facade owns the per-document state machine.

mod concurrent;
mod facade;
mod mapper;
mod merge;
mod partition;

pub use concurrent::ConcurrentParser;
pub use facade::{
    DocumentParser, IngestError, IngestErrorKind, IngestStage, IngestionFacade, ParserRegistry,
    PdfParser,
};
pub use mapper::{map_elements, MappingError};
pub use merge::{merge, MergeError};
pub use partition::partition;
