//! Client for the external OCR/layout-analysis service.
//!
//! The service is a black box behind a submit/poll/fetch task API. The
//! [`RangeParser`] trait is the seam between the HTTP client and the
//! concurrent dispatcher, so orchestration can be exercised against
//! scripted backends.

mod client;
mod error;
pub mod types;

pub use client::{ParseOptions, ParseServiceClient, ParseServiceConfig};
pub use error::ParseServiceError;
pub use types::{RangeResult, TaskStatus};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::models::PageRange;

/// One service round trip covering one page range of one document.
///
/// `range = None` asks the service to process the whole file. This is the
/// unit of work the retry runner wraps.
#[async_trait::async_trait]
pub trait RangeParser: Send + Sync {
    async fn parse_range(
        &self,
        file: Bytes,
        file_name: &str,
        range: Option<PageRange>,
        cancel: &CancellationToken,
    ) -> Result<RangeResult, ParseServiceError>;
}
