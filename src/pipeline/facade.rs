//! Ingestion facade.
//!
//! The single entry point for one document: detect the file kind, route
//! to the registered parser, merge, map, persist, and report. A document
//! either produces one [`IngestionReport`] or one staged error; there is
//! no partial success.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{Document, FileKind, IngestionReport, KnowledgeRef, ParsedDocument};
use crate::parse_service::{ParseServiceError, RangeParser};
use crate::retry::RetryPolicy;
use crate::store::{DualStorePersister, PersistError};

use super::concurrent::ConcurrentParser;
use super::mapper::{map_elements, MappingError};
use super::merge::{merge, MergeError};

/// Stages of the per-document state machine. Errors carry the stage they
/// happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Received,
    Partitioned,
    Parsing,
    Merging,
    Mapping,
    Persisting,
    Done,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Partitioned => "partitioned",
            Self::Parsing => "parsing",
            Self::Merging => "merging",
            Self::Mapping => "mapping",
            Self::Persisting => "persisting",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestErrorKind {
    #[error("unsupported file kind: {0}")]
    UnsupportedKind(String),

    #[error("could not read page count: {0}")]
    PageCount(String),

    #[error(transparent)]
    Service(#[from] ParseServiceError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// One tagged error per failed document.
#[derive(Debug, Error)]
#[error("ingestion failed during {} stage: {kind}", .stage.as_str())]
pub struct IngestError {
    pub stage: IngestStage,
    #[source]
    pub kind: IngestErrorKind,
}

impl IngestError {
    pub fn new(stage: IngestStage, kind: impl Into<IngestErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }
}

/// A parser for one file kind, producing a fully merged document.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(
        &self,
        file: Bytes,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<ParsedDocument, IngestError>;
}

/// PDF parser: page count from the raw bytes, then the concurrent
/// range dispatcher and the merger.
pub struct PdfParser {
    concurrent: ConcurrentParser,
}

impl PdfParser {
    pub fn new(
        backend: Arc<dyn RangeParser>,
        batch_size: u32,
        max_concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            concurrent: ConcurrentParser::new(backend, batch_size, max_concurrency, retry),
        }
    }

    fn page_count(file: &[u8]) -> Result<u32, String> {
        let document = lopdf::Document::load_mem(file).map_err(|e| e.to_string())?;
        Ok(document.get_pages().len() as u32)
    }
}

#[async_trait]
impl DocumentParser for PdfParser {
    async fn parse(
        &self,
        file: Bytes,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<ParsedDocument, IngestError> {
        let page_count = Self::page_count(&file).map_err(|message| {
            IngestError::new(IngestStage::Partitioned, IngestErrorKind::PageCount(message))
        })?;

        let partials = self
            .concurrent
            .parse(file, file_name, page_count, cancel)
            .await
            .map_err(|e| IngestError::new(IngestStage::Parsing, e))?;

        merge(partials).map_err(|e| IngestError::new(IngestStage::Merging, e))
    }
}

/// File-kind to parser registry; write-once at startup, read-only after.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<FileKind, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: FileKind, parser: Arc<dyn DocumentParser>) {
        self.parsers.insert(kind, parser);
    }

    pub fn get(&self, kind: FileKind) -> Option<Arc<dyn DocumentParser>> {
        self.parsers.get(&kind).cloned()
    }
}

/// Top-level ingestion entry point.
pub struct IngestionFacade {
    registry: ParserRegistry,
    persister: DualStorePersister,
}

impl IngestionFacade {
    pub fn new(registry: ParserRegistry, persister: DualStorePersister) -> Self {
        Self {
            registry,
            persister,
        }
    }

    /// Ingest one document. Synchronous from the caller's perspective;
    /// parallelism stays internal.
    pub async fn ingest(
        &self,
        file: Bytes,
        file_name: &str,
        knowledge: &KnowledgeRef,
        creator: &str,
        store_images: bool,
    ) -> Result<IngestionReport, IngestError> {
        self.ingest_with_cancel(
            file,
            file_name,
            knowledge,
            creator,
            store_images,
            &CancellationToken::new(),
        )
        .await
    }

    /// Ingest one document under an external cancellation signal.
    pub async fn ingest_with_cancel(
        &self,
        file: Bytes,
        file_name: &str,
        knowledge: &KnowledgeRef,
        creator: &str,
        store_images: bool,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let kind = FileKind::detect(file_name).ok_or_else(|| {
            IngestError::new(
                IngestStage::Received,
                IngestErrorKind::UnsupportedKind(file_name.to_string()),
            )
        })?;

        let parser = self.registry.get(kind).ok_or_else(|| {
            IngestError::new(
                IngestStage::Received,
                IngestErrorKind::UnsupportedKind(kind.as_str().to_string()),
            )
        })?;

        tracing::info!(file_name, kind = kind.as_str(), "ingestion started");

        let parsed = parser.parse(file.clone(), file_name, cancel).await?;

        let document = Document::new(file_name, kind, parsed.pages.len() as u32, &file);
        tracing::debug!(
            file_name,
            sha256 = %document.sha256,
            pages = document.page_count,
            elements = parsed.element_count(),
            "document parsed"
        );

        let (meta_rows, content_rows) = map_elements(&parsed, knowledge)
            .map_err(|e| IngestError::new(IngestStage::Mapping, e))?;

        let mut by_type = BTreeMap::new();
        for element in parsed.elements() {
            *by_type.entry(element.element_type).or_insert(0usize) += 1;
        }
        let total_elements = parsed.element_count();

        let stats = self
            .persister
            .persist(
                meta_rows,
                content_rows,
                &parsed.image_blobs,
                creator,
                store_images,
            )
            .await
            .map_err(|e| IngestError::new(IngestStage::Persisting, e))?;

        let report = IngestionReport {
            file_name: file_name.to_string(),
            file_kind: kind,
            total_pages: document.page_count,
            total_elements,
            by_type,
            meta_written: stats.meta_written,
            content_written: stats.content_written,
            images_stored: stats.images_stored,
        };

        tracing::info!(
            file_name,
            total_pages = report.total_pages,
            total_elements = report.total_elements,
            "ingestion done"
        );
        Ok(report)
    }

    /// Ingest several documents sequentially, capturing each outcome.
    ///
    /// Intra-document parallelism still applies; documents themselves are
    /// processed one at a time, matching the external worker-pool model.
    pub async fn ingest_many(
        &self,
        files: Vec<(Bytes, String)>,
        knowledge: &KnowledgeRef,
        creator: &str,
        store_images: bool,
    ) -> Vec<Result<IngestionReport, IngestError>> {
        let mut results = Vec::with_capacity(files.len());
        for (file, file_name) in files {
            let result = self
                .ingest(file, &file_name, knowledge, creator, store_images)
                .await;
            if let Err(error) = &result {
                tracing::warn!(file_name, %error, "ingestion failed");
            }
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Element, ElementPayload, ElementType, Page};
    use crate::store::{
        ContentRow, ContentStore, MemoryContentStore, MemoryMetaStore, MetaStore, StoreError,
    };

    /// Parser that returns a canned document without touching the service.
    struct FakeParser {
        document: ParsedDocument,
    }

    #[async_trait]
    impl DocumentParser for FakeParser {
        async fn parse(
            &self,
            _file: Bytes,
            _file_name: &str,
            _cancel: &CancellationToken,
        ) -> Result<ParsedDocument, IngestError> {
            Ok(self.document.clone())
        }
    }

    fn element(id: &str, page: u32, order: u32, payload: ElementPayload) -> Element {
        Element {
            element_id: id.to_string(),
            page_index: page,
            element_type: payload.element_type(),
            bbox: Some(vec![0.0, 0.0, 10.0, 10.0]),
            text_level: None,
            payload,
            order,
        }
    }

    fn two_page_document() -> ParsedDocument {
        ParsedDocument {
            pages: vec![
                Page {
                    page_index: 0,
                    width: 595.0,
                    height: 842.0,
                    elements: vec![
                        element("element_a", 0, 0, ElementPayload::Text { text: "a".into() }),
                        element("element_b", 0, 1, ElementPayload::Text { text: "b".into() }),
                        element("element_c", 0, 2, ElementPayload::Text { text: "c".into() }),
                    ],
                },
                Page {
                    page_index: 1,
                    width: 595.0,
                    height: 842.0,
                    elements: vec![element(
                        "element_d",
                        1,
                        0,
                        ElementPayload::Image {
                            captions: vec![],
                            footnotes: vec![],
                            file_ref: Some("images/fig.png".into()),
                            image_bytes: None,
                        },
                    )],
                },
            ],
            markdown: "# doc".into(),
            image_blobs: HashMap::new(),
        }
    }

    fn facade_with(document: ParsedDocument) -> (IngestionFacade, Arc<MemoryMetaStore>) {
        let meta = Arc::new(MemoryMetaStore::new());
        let persister = DualStorePersister::new(
            meta.clone(),
            Arc::new(MemoryContentStore::new()),
            None,
        );
        let mut registry = ParserRegistry::new();
        registry.register(FileKind::Pdf, Arc::new(FakeParser { document }));
        (IngestionFacade::new(registry, persister), meta)
    }

    #[tokio::test]
    async fn test_small_document_report() {
        let (facade, meta) = facade_with(two_page_document());
        let report = facade
            .ingest(
                Bytes::from_static(b"%PDF-1.7"),
                "doc.pdf",
                &KnowledgeRef::default(),
                "system",
                false,
            )
            .await
            .unwrap();

        assert_eq!(report.total_pages, 2);
        assert_eq!(report.total_elements, 4);
        assert_eq!(report.by_type[&ElementType::Text], 3);
        assert_eq!(report.by_type[&ElementType::Image], 1);
        assert_eq!(report.meta_written, 4);
        assert_eq!(report.content_written, 4);
        assert_eq!(report.images_stored, 0);
        assert_eq!(meta.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_empty_document_reports_zeroes() {
        let (facade, _) = facade_with(ParsedDocument::default());
        let report = facade
            .ingest(
                Bytes::from_static(b"%PDF-1.7"),
                "empty.pdf",
                &KnowledgeRef::default(),
                "system",
                false,
            )
            .await
            .unwrap();

        assert_eq!(report.total_pages, 0);
        assert_eq!(report.total_elements, 0);
        assert!(report.by_type.is_empty());
        assert_eq!(report.meta_written, 0);
    }

    #[tokio::test]
    async fn test_unknown_extension_is_rejected_up_front() {
        let (facade, _) = facade_with(two_page_document());
        let error = facade
            .ingest(
                Bytes::from_static(b"plain text"),
                "notes.txt",
                &KnowledgeRef::default(),
                "system",
                false,
            )
            .await
            .unwrap_err();

        assert_eq!(error.stage, IngestStage::Received);
        assert!(matches!(error.kind, IngestErrorKind::UnsupportedKind(_)));
    }

    #[tokio::test]
    async fn test_mapping_failure_carries_stage() {
        let mut document = two_page_document();
        document.pages[0].elements[0].bbox = Some(vec![1.0]);

        let (facade, meta) = facade_with(document);
        let error = facade
            .ingest(
                Bytes::from_static(b"%PDF-1.7"),
                "doc.pdf",
                &KnowledgeRef::default(),
                "system",
                false,
            )
            .await
            .unwrap_err();

        assert_eq!(error.stage, IngestStage::Mapping);
        assert_eq!(meta.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persist_failure_carries_stage() {
        struct FailingContentStore;

        #[async_trait]
        impl ContentStore for FailingContentStore {
            async fn ensure_schema(&self, _auto_create: bool) -> Result<(), StoreError> {
                Ok(())
            }
            async fn insert_batch(&self, _rows: &[ContentRow]) -> Result<usize, StoreError> {
                Err(StoreError::Database(
                    diesel::result::Error::BrokenTransactionManager,
                ))
            }
            async fn delete_by_ids(&self, _ids: &[String]) -> Result<usize, StoreError> {
                Ok(0)
            }
            async fn count(&self) -> Result<u64, StoreError> {
                Ok(0)
            }
        }

        let meta = Arc::new(MemoryMetaStore::new());
        let persister =
            DualStorePersister::new(meta.clone(), Arc::new(FailingContentStore), None);
        let mut registry = ParserRegistry::new();
        registry.register(
            FileKind::Pdf,
            Arc::new(FakeParser {
                document: two_page_document(),
            }),
        );
        let facade = IngestionFacade::new(registry, persister);

        let error = facade
            .ingest(
                Bytes::from_static(b"%PDF-1.7"),
                "doc.pdf",
                &KnowledgeRef::default(),
                "system",
                false,
            )
            .await
            .unwrap_err();

        assert_eq!(error.stage, IngestStage::Persisting);
        assert!(matches!(
            error.kind,
            IngestErrorKind::Persist(PersistError::PartialWrite { .. })
        ));
        // Compensation removed the committed metadata.
        assert_eq!(meta.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_many_captures_per_file_outcomes() {
        let (facade, _) = facade_with(two_page_document());
        let results = facade
            .ingest_many(
                vec![
                    (Bytes::from_static(b"%PDF-1.7"), "one.pdf".to_string()),
                    (Bytes::from_static(b"x"), "two.csv".to_string()),
                ],
                &KnowledgeRef::default(),
                "system",
                false,
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
