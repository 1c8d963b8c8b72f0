//! Rich-text tree produced by parsing.
//!
//! Offsets always index into the original source string, so a snippet can be
//! cut from the source without re-parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Root,
    Heading,
    BlockQuote,
    FencedCode,
    Image,
    Bullet,
    Paragraph,
    TableContainer,
    TableDividerRow,
    TableRow,
    TableCell,
    ThematicBreak,
    BulletContainer,
    Numbered,
    NumberedContainer,
}

impl NodeType {
    /// Leaf content types hold spans only.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            NodeType::Heading
                | NodeType::Paragraph
                | NodeType::FencedCode
                | NodeType::TableCell
                | NodeType::Image
        )
    }

    pub fn is_list_item(self) -> bool {
        matches!(self, NodeType::Bullet | NodeType::Numbered)
    }
}

/// Inline style bits. Bits compose by OR.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanStyle(u16);

impl SpanStyle {
    pub const NONE: SpanStyle = SpanStyle(0);
    pub const BOLD: SpanStyle = SpanStyle(1 << 0);
    pub const ITALIC: SpanStyle = SpanStyle(1 << 1);
    pub const UNDERLINE: SpanStyle = SpanStyle(1 << 2);
    pub const CODE: SpanStyle = SpanStyle(1 << 3);
    pub const STRIKETHROUGH: SpanStyle = SpanStyle(1 << 4);
    pub const SUPERSCRIPT: SpanStyle = SpanStyle(1 << 5);
    pub const LINK: SpanStyle = SpanStyle(1 << 6);
    pub const HARD_BREAK: SpanStyle = SpanStyle(1 << 7);
    pub const SOFT_BREAK: SpanStyle = SpanStyle(1 << 8);
    const HEADER_SHIFT: u16 = 9;
    pub const MAX_HEADER_LEVEL: u8 = 7;

    const NAMES: [(SpanStyle, &'static str); 9] = [
        (Self::BOLD, "bold"),
        (Self::ITALIC, "italic"),
        (Self::UNDERLINE, "underline"),
        (Self::CODE, "code"),
        (Self::STRIKETHROUGH, "strikethrough"),
        (Self::SUPERSCRIPT, "superscript"),
        (Self::LINK, "link"),
        (Self::HARD_BREAK, "hard_break"),
        (Self::SOFT_BREAK, "soft_break"),
    ];

    /// Header bit for levels 1 through 7; out-of-range levels clamp.
    pub fn header(level: u8) -> SpanStyle {
        let level = level.clamp(1, Self::MAX_HEADER_LEVEL);
        SpanStyle(1 << (Self::HEADER_SHIFT + u16::from(level) - 1))
    }

    pub fn header_level(self) -> Option<u8> {
        (1..=Self::MAX_HEADER_LEVEL).find(|level| self.contains(Self::header(*level)))
    }

    pub fn contains(self, other: SpanStyle) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn union(self, other: SpanStyle) -> SpanStyle {
        SpanStyle(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SpanStyle {
    type Output = SpanStyle;

    fn bitor(self, rhs: SpanStyle) -> SpanStyle {
        self.union(rhs)
    }
}

impl BitOrAssign for SpanStyle {
    fn bitor_assign(&mut self, rhs: SpanStyle) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SpanStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| name.to_string())
            .collect();
        if let Some(level) = self.header_level() {
            names.push(format!("h{}", level));
        }
        write!(f, "SpanStyle({})", names.join("|"))
    }
}

/// Where a span's text lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanContent {
    /// Byte range into the original source.
    Range { start: usize, end: usize },
    /// Literal text that does not appear verbatim in the source.
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImdexSpan {
    pub style: SpanStyle,
    pub content: SpanContent,
    /// Destination of a LINK span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ImdexSpan {
    pub fn range(start: usize, end: usize, style: SpanStyle) -> Self {
        Self {
            style,
            content: SpanContent::Range { start, end },
            target: None,
        }
    }

    pub fn literal(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            style,
            content: SpanContent::Literal(text.into()),
            target: None,
        }
    }

    /// True when the text is carried literally instead of by offsets.
    pub fn uses_data(&self) -> bool {
        matches!(self.content, SpanContent::Literal(_))
    }

    pub fn source_range(&self) -> Option<(usize, usize)> {
        match self.content {
            SpanContent::Range { start, end } => Some((start, end)),
            SpanContent::Literal(_) => None,
        }
    }

    /// The span's text, sliced from `source` for range spans.
    ///
    /// A range that does not fit `source` yields an empty string.
    pub fn text<'a>(&'a self, source: &'a str) -> &'a str {
        match &self.content {
            SpanContent::Range { start, end } => source.get(*start..*end).unwrap_or(""),
            SpanContent::Literal(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImdexNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ImdexNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<ImdexSpan>,
}

impl ImdexNode {
    pub fn new(node_type: NodeType, start: usize, end: usize) -> Self {
        Self {
            node_type,
            start,
            end,
            children: Vec::new(),
            spans: Vec::new(),
        }
    }

    /// Concatenated text of this node's own spans.
    pub fn span_text(&self, source: &str) -> String {
        self.spans.iter().map(|span| span.text(source)).collect()
    }

    /// Plain text of the whole subtree. Leaves are separated by newlines,
    /// cells of a row by a space.
    pub fn plain_text(&self, source: &str) -> String {
        let mut out = String::new();
        self.collect_text(source, &mut out);
        out
    }

    fn collect_text(&self, source: &str, out: &mut String) {
        if self.node_type.is_leaf() {
            let text = self.span_text(source);
            if !text.is_empty() {
                if !out.is_empty() {
                    out.push(if self.node_type == NodeType::TableCell { ' ' } else { '\n' });
                }
                out.push_str(&text);
            }
            return;
        }
        for child in &self.children {
            child.collect_text(source, out);
        }
    }

    /// Depth-first pre-order iteration over the subtree.
    pub fn walk(&self) -> Vec<&ImdexNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Covering range of the node's range spans (min start, max end).
    pub fn span_extent(&self) -> Option<(usize, usize)> {
        self.spans
            .iter()
            .filter_map(ImdexSpan::source_range)
            .fold(None, |acc, (s, e)| match acc {
                None => Some((s, e)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(e))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_composition() {
        let style = SpanStyle::BOLD | SpanStyle::LINK;
        assert!(style.contains(SpanStyle::BOLD));
        assert!(style.contains(SpanStyle::LINK));
        assert!(!style.contains(SpanStyle::CODE));
        assert!(!style.contains(SpanStyle::NONE));
        assert_eq!(style.header_level(), None);
    }

    #[test]
    fn test_header_levels() {
        for level in 1..=7 {
            assert_eq!(SpanStyle::header(level).header_level(), Some(level));
        }
        assert_eq!(SpanStyle::header(9), SpanStyle::header(7));
        let mixed = SpanStyle::header(2) | SpanStyle::ITALIC;
        assert_eq!(mixed.header_level(), Some(2));
        assert_eq!(format!("{:?}", mixed), "SpanStyle(italic|h2)");
    }

    #[test]
    fn test_span_text() {
        let source = "Hello world";
        let range = ImdexSpan::range(6, 11, SpanStyle::NONE);
        let literal = ImdexSpan::literal("&", SpanStyle::NONE);
        assert_eq!(range.text(source), "world");
        assert!(!range.uses_data());
        assert_eq!(literal.text(source), "&");
        assert!(literal.uses_data());
        assert_eq!(ImdexSpan::range(6, 40, SpanStyle::NONE).text(source), "");
    }

    #[test]
    fn test_plain_text_joins_leaves() {
        let source = "a b";
        let mut root = ImdexNode::new(NodeType::Root, 0, 3);
        let mut first = ImdexNode::new(NodeType::Paragraph, 0, 1);
        first.spans.push(ImdexSpan::range(0, 1, SpanStyle::NONE));
        let mut second = ImdexNode::new(NodeType::Paragraph, 2, 3);
        second.spans.push(ImdexSpan::range(2, 3, SpanStyle::NONE));
        root.children = vec![first, second];

        assert_eq!(root.plain_text(source), "a\nb");
        assert_eq!(root.walk().len(), 3);
    }
}
