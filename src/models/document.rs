//! Document identity and page-range bookkeeping.
//!
//! A [`Document`] is created once per ingestion from the raw input bytes
//! and stays immutable until the facade returns. Page ranges partition the
//! document for the parse service; they are disjoint, ordered, and cover
//! the page span exactly.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Supported input file kinds.
///
/// Closed set; new kinds are added as variants together with a parser
/// registered for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Pdf,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
        }
    }

    /// Detect the file kind from a file name's extension.
    ///
    /// Matching is case-insensitive. Returns `None` for unknown or missing
    /// extensions; the caller decides how to surface that.
    pub fn detect(file_name: &str) -> Option<Self> {
        let ext = file_name.rsplit_once('.').map(|(_, ext)| ext)?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// Logical identity of one document being ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Source file name as given by the caller.
    pub source_name: String,
    /// Detected file kind.
    pub kind: FileKind,
    /// Total number of pages, read from the raw bytes.
    pub page_count: u32,
    /// SHA-256 of the input bytes, hex encoded.
    pub sha256: String,
}

impl Document {
    /// Compute the SHA-256 fingerprint of document content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    pub fn new(source_name: &str, kind: FileKind, page_count: u32, content: &[u8]) -> Self {
        Self {
            source_name: source_name.to_string(),
            kind,
            page_count,
            sha256: Self::compute_hash(content),
        }
    }
}

/// An inclusive span of 0-based page indices submitted to the parse
/// service as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    /// First page index, inclusive.
    pub start: u32,
    /// Last page index, inclusive.
    pub end: u32,
    /// Position of this range within the partition; preserved through
    /// concurrent execution so results can be reassembled in order.
    pub index: usize,
}

impl PageRange {
    pub fn new(start: u32, end: u32, index: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end, index }
    }

    /// Number of pages covered by this range.
    pub fn page_count(&self) -> u32 {
        self.end - self.start + 1
    }
}
