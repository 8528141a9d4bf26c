//! Element-to-row projection.
//!
//! A stateless projection from a parsed document to the two persistence
//! rows each element becomes. Calling it twice on the same input yields
//! equal rows; audit fields are stamped later by the persister.

use serde_json::json;
use thiserror::Error;

use crate::models::{Element, ElementPayload, KnowledgeRef, ParsedDocument};
use crate::store::{ContentRow, MetaRow};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("element {element_id} has a bounding box with {len} values, expected 4")]
    InvalidBbox { element_id: String, len: usize },

    #[error("failed to serialize bounding box for element {element_id}: {source}")]
    BboxSerialization {
        element_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Project every element of `doc` into its MetaRow and ContentRow.
///
/// Row order matches element order (pages ascending, elements by their
/// in-page order), and the two vectors are index-aligned.
pub fn map_elements(
    doc: &ParsedDocument,
    knowledge: &KnowledgeRef,
) -> Result<(Vec<MetaRow>, Vec<ContentRow>), MappingError> {
    let total = doc.element_count();
    let mut meta_rows = Vec::with_capacity(total);
    let mut content_rows = Vec::with_capacity(total);

    for element in doc.elements() {
        meta_rows.push(build_meta_row(element, knowledge)?);
        content_rows.push(build_content_row(element));
    }

    Ok((meta_rows, content_rows))
}

fn build_meta_row(element: &Element, knowledge: &KnowledgeRef) -> Result<MetaRow, MappingError> {
    let page_position = match &element.bbox {
        Some(bbox) => {
            if bbox.len() != 4 {
                return Err(MappingError::InvalidBbox {
                    element_id: element.element_id.clone(),
                    len: bbox.len(),
                });
            }
            Some(
                serde_json::to_string(bbox).map_err(|source| MappingError::BboxSerialization {
                    element_id: element.element_id.clone(),
                    source,
                })?,
            )
        }
        None => None,
    };

    // Image file columns derive from the service's path reference.
    let (image_file_name, image_file_suffix, image_file_type) = match &element.payload {
        ElementPayload::Image {
            file_ref: Some(path),
            ..
        } => {
            let name = path.rsplit('/').next().unwrap_or(path.as_str());
            let suffix = name.rfind('.').map(|at| name[at..].to_string());
            let file_type = suffix.as_deref().map(|s| s.trim_start_matches('.').to_string());
            (Some(name.to_string()), suffix, file_type)
        }
        _ => (None, None, None),
    };

    Ok(MetaRow {
        element_id: element.element_id.clone(),
        page_index: Some(element.page_index as i32),
        element_type: element.element_type,
        page_position,
        text_level: element.text_level.map(|l| l as i32),
        bucket_name: None,
        image_file_path: None,
        image_file_name,
        image_file_type,
        image_file_suffix,
        knowledge: knowledge.clone(),
        audit: Default::default(),
    })
}

fn build_content_row(element: &Element) -> ContentRow {
    let content = match &element.payload {
        ElementPayload::Text { text } => json!({ "text": text }),
        ElementPayload::Image {
            captions,
            footnotes,
            ..
        } => json!({
            "image_caption": captions,
            "image_footnote": footnotes,
        }),
        ElementPayload::Table {
            captions,
            footnotes,
            body,
        } => json!({
            "table_caption": captions,
            "table_footnote": footnotes,
            "table_body": body,
        }),
        ElementPayload::Discarded { text } => json!({ "text": text }),
    };

    ContentRow {
        id: element.element_id.clone(),
        element_type: element.element_type,
        content,
        audit: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementType, Page};
    use std::collections::HashMap;

    fn knowledge() -> KnowledgeRef {
        KnowledgeRef {
            kb_id: "kb-1".to_string(),
            kb_name: "manuals".to_string(),
            parent_kb_id: None,
            parent_kb_name: None,
            knowledge_type: Some("common_file".to_string()),
        }
    }

    fn element(id: &str, payload: ElementPayload) -> Element {
        Element {
            element_id: id.to_string(),
            page_index: 0,
            element_type: payload.element_type(),
            bbox: Some(vec![1.0, 2.0, 3.0, 4.0]),
            text_level: None,
            payload,
            order: 0,
        }
    }

    fn doc_of(elements: Vec<Element>) -> ParsedDocument {
        ParsedDocument {
            pages: vec![Page {
                page_index: 0,
                width: 595.0,
                height: 842.0,
                elements,
            }],
            markdown: String::new(),
            image_blobs: HashMap::new(),
        }
    }

    #[test]
    fn test_text_element_rows() {
        let mut e = element(
            "element_1",
            ElementPayload::Text {
                text: "Heading".to_string(),
            },
        );
        e.text_level = Some(2);
        let doc = doc_of(vec![e]);

        let (meta, content) = map_elements(&doc, &knowledge()).unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].element_id, "element_1");
        assert_eq!(meta[0].page_index, Some(0));
        assert_eq!(meta[0].element_type, ElementType::Text);
        assert_eq!(meta[0].page_position.as_deref(), Some("[1.0,2.0,3.0,4.0]"));
        assert_eq!(meta[0].text_level, Some(2));
        assert_eq!(meta[0].knowledge.kb_id, "kb-1");
        assert!(meta[0].image_file_name.is_none());

        assert_eq!(content[0].id, "element_1");
        assert_eq!(content[0].content, json!({ "text": "Heading" }));
    }

    #[test]
    fn test_image_element_file_columns() {
        let doc = doc_of(vec![element(
            "element_2",
            ElementPayload::Image {
                captions: vec!["Figure 1".to_string()],
                footnotes: vec![],
                file_ref: Some("images/fig1.png".to_string()),
                image_bytes: None,
            },
        )]);

        let (meta, content) = map_elements(&doc, &knowledge()).unwrap();
        assert_eq!(meta[0].image_file_name.as_deref(), Some("fig1.png"));
        assert_eq!(meta[0].image_file_suffix.as_deref(), Some(".png"));
        assert_eq!(meta[0].image_file_type.as_deref(), Some("png"));
        // Storage location stays unset until upload runs.
        assert!(meta[0].bucket_name.is_none());
        assert!(meta[0].image_file_path.is_none());

        assert_eq!(
            content[0].content,
            json!({ "image_caption": ["Figure 1"], "image_footnote": [] })
        );
    }

    #[test]
    fn test_table_and_discarded_rows() {
        let doc = doc_of(vec![
            element(
                "element_3",
                ElementPayload::Table {
                    captions: vec![],
                    footnotes: vec!["note".to_string()],
                    body: "<table></table>".to_string(),
                },
            ),
            element(
                "element_4",
                ElementPayload::Discarded {
                    text: "page footer".to_string(),
                },
            ),
        ]);

        let (_, content) = map_elements(&doc, &knowledge()).unwrap();
        assert_eq!(
            content[0].content,
            json!({
                "table_caption": [],
                "table_footnote": ["note"],
                "table_body": "<table></table>",
            })
        );
        assert_eq!(content[1].content, json!({ "text": "page footer" }));
        assert_eq!(content[1].element_type, ElementType::Discarded);
    }

    #[test]
    fn test_invalid_bbox_is_rejected() {
        let mut e = element(
            "element_5",
            ElementPayload::Text {
                text: String::new(),
            },
        );
        e.bbox = Some(vec![1.0, 2.0]);
        let doc = doc_of(vec![e]);

        match map_elements(&doc, &knowledge()) {
            Err(MappingError::InvalidBbox { element_id, len }) => {
                assert_eq!(element_id, "element_5");
                assert_eq!(len, 2);
            }
            other => panic!("expected invalid bbox, got {other:?}"),
        }
    }

    #[test]
    fn test_mapping_is_idempotent() {
        let doc = doc_of(vec![
            element(
                "element_6",
                ElementPayload::Text {
                    text: "same".to_string(),
                },
            ),
            element(
                "element_7",
                ElementPayload::Image {
                    captions: vec![],
                    footnotes: vec![],
                    file_ref: Some("images/x.jpg".to_string()),
                    image_bytes: None,
                },
            ),
        ]);

        let first = map_elements(&doc, &knowledge()).unwrap();
        let second = map_elements(&doc, &knowledge()).unwrap();
        assert_eq!(first, second);
    }
}
