//! Partial-result merging.
//!
//! Combines the ordered per-range service results into a single
//! [`ParsedDocument`]: markdown concatenated in partition order, pages
//! appended with their absolute indices asserted strictly monotonic and
//! dense, per-page preprocessing blocks zipped with their content items
//! into elements, and image tables unioned. Count or coverage violations
//! are hard errors; an unresolved image reference or an image name
//! collision is only a warning.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Element, ElementPayload, ElementType, Page, ParsedDocument};
use crate::parse_service::types::{ContentItem, PreprocBlock, WireElementType};
use crate::parse_service::RangeResult;

/// Structural violations in the service output discovered while merging.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("page {found} already covered; expected page {expected} next")]
    OverlappingPage { expected: u32, found: u32 },

    #[error("page coverage is not dense: expected page {expected}, found {found}")]
    NonContiguousPage { expected: u32, found: u32 },

    #[error(
        "partial {partial} reports {blocks} preprocessing blocks but {items} content items"
    )]
    BlockCountMismatch {
        partial: usize,
        blocks: usize,
        items: usize,
    },

    #[error("page {page_index} has a page_size with {len} values, expected 2")]
    InvalidPageSize { page_index: u32, len: usize },
}

/// Merge partial results, already sorted by range index, into one
/// document.
pub fn merge(partials: Vec<RangeResult>) -> Result<ParsedDocument, MergeError> {
    // Markdown: non-empty parts joined with a blank line, partition order.
    let markdown = partials
        .iter()
        .map(|p| p.markdown.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    // Image union. On a name collision the first-seen blob wins.
    let mut image_blobs: HashMap<String, Bytes> = HashMap::new();
    for partial in &partials {
        for (name, blob) in &partial.images {
            if image_blobs.contains_key(name) {
                tracing::warn!(image = %name, "duplicate image name across partials, keeping first");
            } else {
                image_blobs.insert(name.clone(), blob.clone());
            }
        }
    }

    let mut pages = Vec::new();
    let mut expected = 0u32;

    for (partial_index, partial) in partials.into_iter().enumerate() {
        let blocks = partial.block_count();
        let items = partial.content_list.len();
        if blocks != items {
            return Err(MergeError::BlockCountMismatch {
                partial: partial_index,
                blocks,
                items,
            });
        }

        let mut content = partial.content_list.into_iter();

        for info in partial.pdf_info {
            if info.page_idx < expected {
                return Err(MergeError::OverlappingPage {
                    expected,
                    found: info.page_idx,
                });
            }
            if info.page_idx > expected {
                return Err(MergeError::NonContiguousPage {
                    expected,
                    found: info.page_idx,
                });
            }
            if info.page_size.len() != 2 {
                return Err(MergeError::InvalidPageSize {
                    page_index: info.page_idx,
                    len: info.page_size.len(),
                });
            }

            let block_count = info.preproc_blocks.len();
            let page_items: Vec<ContentItem> = content.by_ref().take(block_count).collect();
            if page_items.len() != block_count {
                return Err(MergeError::BlockCountMismatch {
                    partial: partial_index,
                    blocks,
                    items,
                });
            }

            let elements = info
                .preproc_blocks
                .into_iter()
                .zip(page_items)
                .enumerate()
                .map(|(order, (block, item))| {
                    build_element(info.page_idx, order as u32, block, item, &image_blobs)
                })
                .collect();

            pages.push(Page {
                page_index: info.page_idx,
                width: info.page_size[0],
                height: info.page_size[1],
                elements,
            });
            expected += 1;
        }
    }

    Ok(ParsedDocument {
        pages,
        markdown,
        image_blobs,
    })
}

/// Zip one preprocessing block with its content item into an element.
fn build_element(
    page_index: u32,
    order: u32,
    block: PreprocBlock,
    item: ContentItem,
    image_blobs: &HashMap<String, Bytes>,
) -> Element {
    let element_type = match item.kind {
        WireElementType::Text => ElementType::Text,
        WireElementType::Image => ElementType::Image,
        WireElementType::Table => ElementType::Table,
        WireElementType::Discarded => ElementType::Discarded,
    };

    // Heading depth is meaningful only for text, and only when the
    // service supplied one.
    let text_level = match element_type {
        ElementType::Text => item.text_level,
        _ => None,
    };

    let payload = match item.kind {
        WireElementType::Text => ElementPayload::Text {
            text: item.text.unwrap_or_default(),
        },
        WireElementType::Image => {
            let file_ref = item.img_path;
            let image_bytes = file_ref.as_deref().and_then(|path| {
                let name = path.rsplit('/').next().unwrap_or(path);
                let blob = image_blobs.get(name).cloned();
                if blob.is_none() {
                    tracing::warn!(page_index, image = %name, "image reference not found in image table");
                }
                blob
            });
            ElementPayload::Image {
                captions: item.image_caption,
                footnotes: item.image_footnote,
                file_ref,
                image_bytes,
            }
        }
        WireElementType::Table => ElementPayload::Table {
            captions: item.table_caption,
            footnotes: item.table_footnote,
            body: item.table_body.unwrap_or_default(),
        },
        WireElementType::Discarded => ElementPayload::Discarded {
            text: item.text.unwrap_or_default(),
        },
    };

    Element {
        element_id: format!("element_{}", Uuid::new_v4()),
        page_index,
        element_type,
        bbox: block.bbox,
        text_level,
        payload,
        order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_service::types::PdfInfoPage;

    fn text_item(text: &str, level: Option<u32>) -> ContentItem {
        ContentItem {
            kind: WireElementType::Text,
            text: Some(text.to_string()),
            text_level: level,
            img_path: None,
            image_caption: vec![],
            image_footnote: vec![],
            table_caption: vec![],
            table_footnote: vec![],
            table_body: None,
            page_idx: None,
        }
    }

    fn image_item(img_path: &str) -> ContentItem {
        ContentItem {
            kind: WireElementType::Image,
            text: None,
            text_level: None,
            img_path: Some(img_path.to_string()),
            image_caption: vec!["a figure".to_string()],
            image_footnote: vec![],
            table_caption: vec![],
            table_footnote: vec![],
            table_body: None,
            page_idx: None,
        }
    }

    fn block() -> PreprocBlock {
        PreprocBlock {
            kind: "text".to_string(),
            bbox: Some(vec![1.0, 2.0, 3.0, 4.0]),
        }
    }

    fn page(page_idx: u32, block_count: usize) -> PdfInfoPage {
        PdfInfoPage {
            page_idx,
            page_size: vec![595.0, 842.0],
            preproc_blocks: (0..block_count).map(|_| block()).collect(),
        }
    }

    /// One partial covering `pages`, one text block per page.
    fn partial(pages: std::ops::Range<u32>, markdown: &str) -> RangeResult {
        let pdf_info: Vec<_> = pages.clone().map(|i| page(i, 1)).collect();
        let content_list = pages.map(|i| text_item(&format!("p{i}"), None)).collect();
        RangeResult {
            markdown: markdown.to_string(),
            pdf_info,
            content_list,
            images: HashMap::new(),
        }
    }

    #[test]
    fn test_merge_two_partials() {
        let doc = merge(vec![partial(0..4, "first"), partial(4..6, "second")]).unwrap();

        assert_eq!(doc.pages.len(), 6);
        assert_eq!(doc.markdown, "first\n\nsecond");
        for (i, p) in doc.pages.iter().enumerate() {
            assert_eq!(p.page_index, i as u32);
            assert_eq!(p.width, 595.0);
            assert_eq!(p.elements.len(), 1);
            assert_eq!(p.elements[0].order, 0);
        }
    }

    #[test]
    fn test_empty_markdown_parts_skipped() {
        let doc = merge(vec![partial(0..1, "first"), partial(1..2, ""), partial(2..3, "third")])
            .unwrap();
        assert_eq!(doc.markdown, "first\n\nthird");
    }

    #[test]
    fn test_empty_partial_contributes_nothing() {
        let doc = merge(vec![partial(0..2, "md"), RangeResult::default()]).unwrap();
        assert_eq!(doc.pages.len(), 2);
    }

    #[test]
    fn test_element_ids_unique_and_orders_dense() {
        let mut result = partial(0..2, "md");
        // Give page 0 three blocks.
        result.pdf_info[0].preproc_blocks = vec![block(), block(), block()];
        result.content_list = vec![
            text_item("a", Some(1)),
            text_item("b", None),
            image_item("images/fig.png"),
            text_item("c", None),
        ];

        let doc = merge(vec![result]).unwrap();
        assert_eq!(doc.element_count(), 4);

        let orders: Vec<u32> = doc.pages[0].elements.iter().map(|e| e.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);

        let mut ids: Vec<&str> = doc.elements().map(|e| e.element_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);

        // Heading level kept for the first text element only.
        assert_eq!(doc.pages[0].elements[0].text_level, Some(1));
        assert_eq!(doc.pages[0].elements[1].text_level, None);
    }

    #[test]
    fn test_block_count_mismatch_is_fatal() {
        let mut result = partial(0..2, "md");
        result.content_list.pop();

        match merge(vec![result]) {
            Err(MergeError::BlockCountMismatch { blocks, items, .. }) => {
                assert_eq!(blocks, 2);
                assert_eq!(items, 1);
            }
            other => panic!("expected block count mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_overlapping_pages_are_fatal() {
        let error = merge(vec![partial(0..3, "a"), partial(2..4, "b")]).unwrap_err();
        assert!(matches!(
            error,
            MergeError::OverlappingPage {
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn test_page_gap_is_fatal() {
        let error = merge(vec![partial(0..2, "a"), partial(3..4, "b")]).unwrap_err();
        assert!(matches!(
            error,
            MergeError::NonContiguousPage {
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn test_image_union_first_seen_wins() {
        let mut first = partial(0..1, "a");
        first
            .images
            .insert("fig.png".to_string(), Bytes::from_static(b"first"));
        let mut second = partial(1..2, "b");
        second
            .images
            .insert("fig.png".to_string(), Bytes::from_static(b"second"));

        let doc = merge(vec![first, second]).unwrap();
        assert_eq!(doc.image_blobs["fig.png"].as_ref(), b"first");
    }

    #[test]
    fn test_image_reference_resolution() {
        let mut result = partial(0..1, "md");
        result.pdf_info[0].preproc_blocks = vec![block(), block()];
        result.content_list = vec![
            image_item("images/found.png"),
            image_item("images/missing.png"),
        ];
        result
            .images
            .insert("found.png".to_string(), Bytes::from_static(b"png-bytes"));

        let doc = merge(vec![result]).unwrap();
        let elements = &doc.pages[0].elements;

        match &elements[0].payload {
            ElementPayload::Image {
                file_ref,
                image_bytes,
                ..
            } => {
                assert_eq!(file_ref.as_deref(), Some("images/found.png"));
                assert_eq!(image_bytes.as_ref().unwrap().as_ref(), b"png-bytes");
            }
            other => panic!("expected image payload, got {other:?}"),
        }

        // Unresolved references keep the ref but carry no bytes.
        match &elements[1].payload {
            ElementPayload::Image { image_bytes, .. } => assert!(image_bytes.is_none()),
            other => panic!("expected image payload, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_is_associative_over_partition_size() {
        fn strip_ids(mut doc: ParsedDocument) -> ParsedDocument {
            for page in &mut doc.pages {
                for element in &mut page.elements {
                    element.element_id.clear();
                }
            }
            doc
        }

        // Same six pages split two different legal ways.
        let by_three = vec![partial(0..3, "a"), partial(3..6, "b")];
        let by_two = vec![partial(0..2, "a"), partial(2..4, ""), partial(4..6, "b")];

        let merged_three = strip_ids(merge(by_three).unwrap());
        let merged_two = strip_ids(merge(by_two).unwrap());

        assert_eq!(merged_three.pages, merged_two.pages);
        assert_eq!(merged_three.image_blobs, merged_two.image_blobs);
    }
}
