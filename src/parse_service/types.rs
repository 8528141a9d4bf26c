//! Wire types for the parse service task API.
//!
//! The service speaks a submit/poll/fetch protocol. The fetch payload
//! nests each section under a `content` wrapper; [`RawTaskData`] mirrors
//! that shape verbatim and [`RangeResult`] is the decoded form the rest of
//! the pipeline works with.

use std::collections::HashMap;

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::ParseServiceError;

/// Response body of `POST /api/v1/tasks/submit`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Task lifecycle states reported by `GET /api/v1/tasks/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status ends the polling loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Response body of the status endpoint.
#[derive(Debug, Deserialize)]
pub struct TaskStatusResponse {
    pub status: TaskStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Element type string on the wire. Unknown strings fail decoding; the
/// element set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireElementType {
    Text,
    Image,
    Table,
    Discarded,
}

/// One flat entry of the service's `content_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: WireElementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Heading depth; present only when the service detected one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_caption: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_footnote: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_caption: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_footnote: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_idx: Option<u32>,
}

/// One pre-processing block inside a page of `middle_json.pdf_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

/// Per-page layout info from `middle_json.pdf_info`.
///
/// `page_idx` is absolute; the service reports real page numbers even for
/// a partial range request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfInfoPage {
    pub page_idx: u32,
    /// `[width, height]` of the page.
    pub page_size: Vec<f64>,
    #[serde(default)]
    pub preproc_blocks: Vec<PreprocBlock>,
}

/// A named base64 image in the fetch payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub name: String,
    pub base64: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkdownSection {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentListSection {
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MiddleJsonContent {
    #[serde(default)]
    pub pdf_info: Vec<PdfInfoPage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MiddleJsonSection {
    #[serde(default)]
    pub content: MiddleJsonContent,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImagesSection {
    #[serde(default)]
    pub list: Vec<ImageEntry>,
}

/// `data` object of the fetch endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct RawTaskData {
    #[serde(default)]
    pub markdown: MarkdownSection,
    #[serde(default)]
    pub content_list: ContentListSection,
    #[serde(default)]
    pub middle_json: MiddleJsonSection,
    #[serde(default)]
    pub images: ImagesSection,
}

/// Envelope of `GET /api/v1/tasks/{id}/data`.
#[derive(Debug, Deserialize)]
pub struct TaskDataResponse {
    pub status: TaskStatus,
    #[serde(default)]
    pub data: RawTaskData,
}

/// Decoded result of one service call covering one page range.
#[derive(Debug, Clone, Default)]
pub struct RangeResult {
    pub markdown: String,
    pub pdf_info: Vec<PdfInfoPage>,
    pub content_list: Vec<ContentItem>,
    /// Decoded image blobs keyed by file name.
    pub images: HashMap<String, Bytes>,
}

impl RangeResult {
    /// Decode the raw fetch payload, including image base64.
    pub fn from_raw(raw: RawTaskData) -> Result<Self, ParseServiceError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut images = HashMap::with_capacity(raw.images.list.len());
        for entry in raw.images.list {
            let bytes = engine.decode(entry.base64.as_bytes()).map_err(|e| {
                ParseServiceError::Decode(format!("image {} is not valid base64: {e}", entry.name))
            })?;
            images.insert(entry.name, Bytes::from(bytes));
        }

        Ok(Self {
            markdown: raw.markdown.content,
            pdf_info: raw.middle_json.content.pdf_info,
            content_list: raw.content_list.content,
            images,
        })
    }

    /// Total pre-processing block count across all pages.
    pub fn block_count(&self) -> usize {
        self.pdf_info.iter().map(|p| p.preproc_blocks.len()).sum()
    }
}
