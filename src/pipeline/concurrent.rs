//! Concurrent page-range dispatch.
//!
//! Splits a document into page ranges and drives them through the parse
//! service under a bounded semaphore. Ordering is preserved by tagging
//! results with their range index and reassembling into slots, not by
//! serializing workers. The first non-retryable failure cancels the
//! siblings and aborts the document.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::models::PageRange;
use crate::parse_service::{ParseServiceError, RangeParser, RangeResult};
use crate::retry::{run_with_retry, RetryPolicy};

use super::partition::partition;

/// Orchestrates partitioning, retry, and bounded-concurrency parsing for
/// one document.
pub struct ConcurrentParser {
    backend: Arc<dyn RangeParser>,
    batch_size: u32,
    max_concurrency: usize,
    retry: RetryPolicy,
}

impl ConcurrentParser {
    pub fn new(
        backend: Arc<dyn RangeParser>,
        batch_size: u32,
        max_concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        assert!(batch_size >= 1, "batch_size must be at least 1");
        assert!(max_concurrency >= 1, "max_concurrency must be at least 1");
        Self {
            backend,
            batch_size,
            max_concurrency,
            retry,
        }
    }

    /// Parse a whole document, returning one result per range in ascending
    /// range order.
    ///
    /// Documents that fit in a single batch are submitted as one call with
    /// no page range, covering the whole file. A zero-page document makes
    /// no service call at all.
    pub async fn parse(
        &self,
        file: Bytes,
        file_name: &str,
        page_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<RangeResult>, ParseServiceError> {
        if page_count == 0 {
            return Ok(Vec::new());
        }

        // Workers share a child token so sibling cancellation does not
        // propagate to the caller's token.
        let local_cancel = cancel.child_token();

        if page_count <= self.batch_size {
            let result = self
                .retried_parse(file, file_name.to_string(), None, local_cancel)
                .await?;
            return Ok(vec![result]);
        }

        let ranges = partition(page_count, self.batch_size);
        let total = ranges.len();
        tracing::debug!(file_name, page_count, ranges = total, "dispatching page ranges");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut workers = JoinSet::new();

        for range in ranges {
            let semaphore = semaphore.clone();
            let worker_cancel = local_cancel.clone();
            let file = file.clone();
            let file_name = file_name.to_string();
            let backend = self.backend.clone();
            let retry = self.retry.clone();

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ParseServiceError::Internal("semaphore closed".to_string()))?;
                if worker_cancel.is_cancelled() {
                    return Err(ParseServiceError::Cancelled);
                }

                let result = run_with_retry(&retry, &worker_cancel, || {
                    let backend = backend.clone();
                    let file = file.clone();
                    let file_name = file_name.clone();
                    let cancel = worker_cancel.clone();
                    async move {
                        backend
                            .parse_range(file, &file_name, Some(range), &cancel)
                            .await
                    }
                })
                .await?;

                Ok((range.index, result))
            });
        }

        let mut slots: Vec<Option<RangeResult>> =
            std::iter::repeat_with(|| None).take(total).collect();
        let mut first_error: Option<ParseServiceError> = None;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok((index, result))) => {
                    slots[index] = Some(result);
                }
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        // Abort the document: stop siblings at their next
                        // suspension point and keep only this error.
                        local_cancel.cancel();
                        first_error = Some(error);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        local_cancel.cancel();
                        first_error = Some(ParseServiceError::Internal(format!(
                            "worker task failed: {join_error}"
                        )));
                    }
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    ParseServiceError::Internal("range completed without a result".to_string())
                })
            })
            .collect()
    }

    async fn retried_parse(
        &self,
        file: Bytes,
        file_name: String,
        range: Option<PageRange>,
        cancel: CancellationToken,
    ) -> Result<RangeResult, ParseServiceError> {
        let backend = self.backend.clone();
        run_with_retry(&self.retry, &cancel, || {
            let backend = backend.clone();
            let file = file.clone();
            let file_name = file_name.clone();
            let cancel = cancel.clone();
            async move { backend.parse_range(file, &file_name, range, &cancel).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_service::types::{ContentItem, PdfInfoPage, PreprocBlock, WireElementType};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Build a plausible service result covering the given absolute pages.
    fn range_result(pages: std::ops::RangeInclusive<u32>) -> RangeResult {
        let mut pdf_info = Vec::new();
        let mut content_list = Vec::new();
        for page_idx in pages {
            pdf_info.push(PdfInfoPage {
                page_idx,
                page_size: vec![595.0, 842.0],
                preproc_blocks: vec![PreprocBlock {
                    kind: "text".to_string(),
                    bbox: Some(vec![0.0, 0.0, 100.0, 20.0]),
                }],
            });
            content_list.push(ContentItem {
                kind: WireElementType::Text,
                text: Some(format!("page {page_idx}")),
                text_level: None,
                img_path: None,
                image_caption: vec![],
                image_footnote: vec![],
                table_caption: vec![],
                table_footnote: vec![],
                table_body: None,
                page_idx: Some(page_idx),
            });
        }
        RangeResult {
            markdown: format!("part starting {}", pdf_info[0].page_idx),
            pdf_info,
            content_list,
            images: HashMap::new(),
        }
    }

    /// Scripted backend: records calls, tracks the concurrency watermark,
    /// and can fail selected ranges.
    struct ScriptedBackend {
        page_count: u32,
        delay: Duration,
        calls: Mutex<Vec<Option<PageRange>>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        /// `range.start -> remaining failures` with the error to produce.
        failures: Mutex<HashMap<u32, (usize, &'static str)>>,
    }

    impl ScriptedBackend {
        fn new(page_count: u32) -> Self {
            Self {
                page_count,
                delay: Duration::from_millis(10),
                calls: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                failures: Mutex::new(HashMap::new()),
            }
        }

        fn fail_range(self, start: u32, times: usize, kind: &'static str) -> Self {
            self.failures.lock().unwrap().insert(start, (times, kind));
            self
        }

        fn calls(&self) -> Vec<Option<PageRange>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RangeParser for ScriptedBackend {
        async fn parse_range(
            &self,
            _file: Bytes,
            _file_name: &str,
            range: Option<PageRange>,
            cancel: &CancellationToken,
        ) -> Result<RangeResult, ParseServiceError> {
            if cancel.is_cancelled() {
                return Err(ParseServiceError::Cancelled);
            }
            self.calls.lock().unwrap().push(range);

            let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let (start, end) = match range {
                Some(r) => (r.start, r.end),
                None => (0, self.page_count - 1),
            };

            let mut failures = self.failures.lock().unwrap();
            if let Some((remaining, kind)) = failures.get_mut(&start) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return match *kind {
                        "unavailable" => Err(ParseServiceError::Submit {
                            status: 503,
                            body: "service unavailable".to_string(),
                        }),
                        _ => Err(ParseServiceError::Task("bad pdf section".to_string())),
                    };
                }
            }
            drop(failures);

            Ok(range_result(start..=end))
        }
    }

    fn parser(backend: Arc<ScriptedBackend>, batch: u32, concurrency: usize) -> ConcurrentParser {
        ConcurrentParser::new(backend, batch, concurrency, test_retry())
    }

    #[tokio::test]
    async fn test_zero_pages_makes_no_calls() {
        let backend = Arc::new(ScriptedBackend::new(0));
        let results = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "empty.pdf", 0, &CancellationToken::new())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_small_document_single_call_without_range() {
        let backend = Arc::new(ScriptedBackend::new(2));
        let results = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "small.pdf", 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(backend.calls(), vec![None]);
    }

    #[tokio::test]
    async fn test_exactly_one_batch_stays_a_single_call() {
        let backend = Arc::new(ScriptedBackend::new(4));
        let results = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "exact.pdf", 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(backend.calls(), vec![None]);
    }

    #[tokio::test]
    async fn test_pagination_covers_each_range_once_in_order() {
        let backend = Arc::new(ScriptedBackend::new(10));
        let results = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "doc.pdf", 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        // Results are in ascending range order regardless of completion order.
        assert_eq!(results[0].pdf_info[0].page_idx, 0);
        assert_eq!(results[1].pdf_info[0].page_idx, 4);
        assert_eq!(results[2].pdf_info[0].page_idx, 8);

        let mut starts: Vec<u32> = backend
            .calls()
            .into_iter()
            .map(|r| r.unwrap().start)
            .collect();
        starts.sort_unstable();
        assert_eq!(starts, vec![0, 4, 8]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let backend = Arc::new(ScriptedBackend::new(100));
        let results = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "big.pdf", 100, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 25);
        assert!(backend.max_active.load(Ordering::SeqCst) <= 5);

        // Page indices reassemble to exactly 0..100.
        let indices: Vec<u32> = results
            .iter()
            .flat_map(|r| r.pdf_info.iter().map(|p| p.page_idx))
            .collect();
        assert_eq!(indices, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_to_success() {
        let backend = Arc::new(ScriptedBackend::new(10).fail_range(4, 1, "unavailable"));
        let results = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "doc.pdf", 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        // Range [4,7] was attempted twice, everything else once.
        let starts: Vec<u32> = backend
            .calls()
            .into_iter()
            .map(|r| r.unwrap().start)
            .collect();
        assert_eq!(starts.iter().filter(|s| **s == 4).count(), 2);
        assert_eq!(starts.iter().filter(|s| **s == 0).count(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_aborts_and_cancels_siblings() {
        let backend = Arc::new(ScriptedBackend::new(10).fail_range(8, 1, "task"));
        let error = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "doc.pdf", 10, &CancellationToken::new())
            .await
            .unwrap_err();

        match error {
            ParseServiceError::Task(message) => assert_eq!(message, "bad pdf section"),
            other => panic!("expected task error, got {other:?}"),
        }

        // The failed range is not retried.
        let starts: Vec<u32> = backend
            .calls()
            .into_iter()
            .map(|r| r.unwrap().start)
            .collect();
        assert_eq!(starts.iter().filter(|s| **s == 8).count(), 1);
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let backend = Arc::new(ScriptedBackend::new(10));
        let error = parser(backend.clone(), 4, 5)
            .parse(Bytes::from_static(b"pdf"), "doc.pdf", 10, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(error, ParseServiceError::Cancelled));
    }
}
