//! Extraction of indexable sections from a parsed document.

use crate::document::model::{Document, DocumentMetadata};
use crate::document::node::{ImdexNode, NodeType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn of(node: &ImdexNode) -> Self {
        Self {
            start: node.start,
            end: node.end,
        }
    }
}

/// Stored payload locating a section inside its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDescription {
    pub document: Document,
    pub byte_ranges: Vec<ByteRange>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSection {
    pub location: LocationDescription,
    pub text: String,
}

/// Walk `root` and produce one section per indexable unit.
pub fn extract_sections(
    document: &Document,
    metadata: &DocumentMetadata,
    root: &ImdexNode,
    source: &str,
) -> Vec<IndexedSection> {
    let mut extractor = Extractor {
        document,
        metadata,
        source,
        sections: Vec::new(),
    };
    extractor.visit(root, None);
    extractor.sections
}

struct Extractor<'a> {
    document: &'a Document,
    metadata: &'a DocumentMetadata,
    source: &'a str,
    sections: Vec<IndexedSection>,
}

impl Extractor<'_> {
    fn push(&mut self, byte_ranges: Vec<ByteRange>, text: String) {
        if text.trim().is_empty() {
            return;
        }
        self.sections.push(IndexedSection {
            location: LocationDescription {
                document: self.document.clone(),
                byte_ranges,
                metadata: self.metadata.clone(),
            },
            text,
        });
    }

    fn push_node(&mut self, node: &ImdexNode) {
        let text = node.plain_text(self.source);
        self.push(vec![ByteRange::of(node)], text);
    }

    fn visit(&mut self, node: &ImdexNode, parent: Option<NodeType>) {
        match node.node_type {
            NodeType::Root | NodeType::Heading | NodeType::FencedCode => self.push_node(node),
            NodeType::Bullet | NodeType::Numbered => self.push_node(node),
            // Paragraphs of a list item are covered by the item's section.
            NodeType::Paragraph if !parent.map(NodeType::is_list_item).unwrap_or(false) => {
                self.push_node(node)
            }
            NodeType::TableContainer => {
                self.visit_table(node);
                return;
            }
            _ => {}
        }
        for child in &node.children {
            self.visit(child, Some(node.node_type));
        }
    }

    fn visit_table(&mut self, table: &ImdexNode) {
        let header = table
            .children
            .first()
            .filter(|row| row.node_type == NodeType::TableRow);
        let divider = table
            .children
            .iter()
            .find(|row| row.node_type == NodeType::TableDividerRow);

        if let Some(header) = header {
            self.push_node(header);
        }

        let context: Vec<ByteRange> = header
            .into_iter()
            .chain(divider)
            .map(ByteRange::of)
            .collect();
        for row in table
            .children
            .iter()
            .skip(usize::from(header.is_some()))
            .filter(|row| row.node_type == NodeType::TableRow)
        {
            let mut ranges = context.clone();
            ranges.push(ByteRange::of(row));
            let text = row.plain_text(self.source);
            self.push(ranges, text);
        }
    }
}

/// Rebuild a snippet by slicing `ranges` out of `source`, joined by newlines.
///
/// A range that does not fit `source` (out of bounds, inverted, or off a
/// character boundary) is reported as an error message.
pub fn reconstruct_snippet(source: &str, ranges: &[ByteRange]) -> Result<String, String> {
    let mut parts = Vec::with_capacity(ranges.len());
    for range in ranges {
        let slice = source.get(range.start..range.end).ok_or_else(|| {
            format!(
                "byte range {}..{} does not fit content of length {}",
                range.start,
                range.end,
                source.len()
            )
        })?;
        parts.push(slice);
    }
    Ok(parts.join("\n"))
}
