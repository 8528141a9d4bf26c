//! Extracted element model.
//!
//! An element is the smallest unit of extracted content: a text run, an
//! image, a table, or a discarded block. A page owns its elements; there
//! are no back-pointers, lookups carry the page index explicitly.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Element type. Closed set; extending it means adding a variant, there is
/// no open string escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Text,
    Image,
    Table,
    Discarded,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Table => "table",
            Self::Discarded => "discarded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "table" => Some(Self::Table),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

/// Typed payload of an element, tagged by its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementPayload {
    Text {
        text: String,
    },
    Image {
        captions: Vec<String>,
        footnotes: Vec<String>,
        /// Path reference the service used for the image, when present.
        file_ref: Option<String>,
        /// Decoded image bytes, resolved from the service's image table.
        /// `None` when the reference did not resolve (warned, not fatal).
        image_bytes: Option<Bytes>,
    },
    Table {
        captions: Vec<String>,
        footnotes: Vec<String>,
        /// Table body as an HTML fragment.
        body: String,
    },
    Discarded {
        text: String,
    },
}

impl ElementPayload {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Text { .. } => ElementType::Text,
            Self::Image { .. } => ElementType::Image,
            Self::Table { .. } => ElementType::Table,
            Self::Discarded { .. } => ElementType::Discarded,
        }
    }
}

/// One extracted element, self-contained apart from its page index.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Freshly minted globally unique id, stable for the ingestion.
    pub element_id: String,
    /// 0-based index of the page this element belongs to.
    pub page_index: u32,
    pub element_type: ElementType,
    /// Bounding box `[x, y, w, h]` in the page's own coordinate space.
    /// Kept as reported; arity is validated when mapping to rows.
    pub bbox: Option<Vec<f64>>,
    /// Heading depth for text elements, only when the service supplied one.
    pub text_level: Option<u32>,
    pub payload: ElementPayload,
    /// Dense 0-based position within the page.
    pub order: u32,
}

/// One page of a parsed document, owning its elements in service order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub page_index: u32,
    pub width: f64,
    pub height: f64,
    pub elements: Vec<Element>,
}

/// The fully merged output of parsing one document.
///
/// Pages are dense and ordered by `page_index`. Image blobs are keyed by
/// the service's file name and live only for the duration of one
/// ingestion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub pages: Vec<Page>,
    pub markdown: String,
    pub image_blobs: HashMap<String, Bytes>,
}

impl ParsedDocument {
    /// Total number of elements across all pages.
    pub fn element_count(&self) -> usize {
        self.pages.iter().map(|p| p.elements.len()).sum()
    }

    /// Iterate all elements in page order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.pages.iter().flat_map(|p| p.elements.iter())
    }
}
