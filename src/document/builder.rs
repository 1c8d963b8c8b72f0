//! Stack-disciplined construction of [`ImdexNode`] trees.
//!
//! Nodes are only opened and closed through the scoped helpers on
//! [`TreeContext`], which check on exit that the scope being closed is the
//! one that was opened. While a leaf's span builder is open no structural
//! node may be pushed.

use super::node::{ImdexNode, ImdexSpan, NodeType, SpanStyle};
use crate::core::error::{Error, Result};

struct Holder {
    id: u64,
    node: ImdexNode,
}

enum FrameKind {
    Leaf(NodeType),
    Inline {
        style: SpanStyle,
        target: Option<String>,
    },
}

struct SpanFrame {
    id: u64,
    kind: FrameKind,
    start: usize,
    end: usize,
    spans: Vec<ImdexSpan>,
}

impl SpanFrame {
    fn describe(&self) -> String {
        match &self.kind {
            FrameKind::Leaf(node_type) => format!("leaf {:?}#{}", node_type, self.id),
            FrameKind::Inline { style, .. } => format!("span {:?}#{}", style, self.id),
        }
    }
}

/// Holds the open-node stack and the parallel span-builder stack.
pub struct TreeBuilder {
    holders: Vec<Holder>,
    frames: Vec<SpanFrame>,
    next_id: u64,
}

impl TreeBuilder {
    /// Start a tree whose ROOT covers `0..source_len`.
    pub fn new(source_len: usize) -> Self {
        Self {
            holders: vec![Holder {
                id: 0,
                node: ImdexNode::new(NodeType::Root, 0, source_len),
            }],
            frames: Vec::new(),
            next_id: 1,
        }
    }

    /// Whether a leaf's spans are currently being built.
    pub fn in_leaf(&self) -> bool {
        !self.frames.is_empty()
    }

    /// The innermost open structural node, for in-place restructuring.
    pub fn current_holder_mut(&mut self) -> Result<&mut ImdexNode> {
        self.holders
            .last_mut()
            .map(|h| &mut h.node)
            .ok_or_else(|| Error::StackCorruption {
                expected: "open node".to_string(),
                found: "empty stack".to_string(),
            })
    }

    /// Append a span to the innermost span builder.
    pub fn push_span(&mut self, span: ImdexSpan) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| Error::Structure("span pushed outside of a leaf".to_string()))?;
        frame.spans.push(span);
        Ok(())
    }

    /// Change the type of the innermost open leaf to another leaf type.
    pub fn retype_leaf(&mut self, node_type: NodeType) -> Result<()> {
        if !node_type.is_leaf() {
            return Err(Error::Structure(format!("{:?} is not a leaf type", node_type)));
        }
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| matches!(f.kind, FrameKind::Leaf(_)))
            .ok_or_else(|| Error::Structure("no open leaf to retype".to_string()))?;
        frame.kind = FrameKind::Leaf(node_type);
        Ok(())
    }

    /// Close the builder and return the ROOT node.
    pub fn finish(mut self) -> Result<ImdexNode> {
        if let Some(frame) = self.frames.last() {
            return Err(Error::StackCorruption {
                expected: "no open spans".to_string(),
                found: frame.describe(),
            });
        }
        match (self.holders.pop(), self.holders.is_empty()) {
            (Some(holder), true) if holder.id == 0 => Ok(holder.node),
            (Some(holder), _) => Err(Error::StackCorruption {
                expected: "Root#0".to_string(),
                found: format!("{:?}#{}", holder.node.node_type, holder.id),
            }),
            (None, _) => Err(Error::StackCorruption {
                expected: "Root#0".to_string(),
                found: "empty stack".to_string(),
            }),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn open_holder(&mut self, node_type: NodeType, start: usize, end: usize) -> Result<u64> {
        if let Some(frame) = self.frames.last() {
            return Err(Error::Structure(format!(
                "structural {:?} opened while building {}",
                node_type,
                frame.describe()
            )));
        }
        if node_type.is_leaf() {
            return Err(Error::Structure(format!("{:?} must be built as a leaf", node_type)));
        }
        let id = self.allocate_id();
        self.holders.push(Holder {
            id,
            node: ImdexNode::new(node_type, start, end),
        });
        Ok(id)
    }

    fn close_holder(&mut self, id: u64) -> Result<()> {
        if self.holders.len() < 2 {
            return Err(Error::StackCorruption {
                expected: format!("node #{}", id),
                found: "Root#0".to_string(),
            });
        }
        let holder = match self.holders.pop() {
            Some(holder) if holder.id == id => holder,
            Some(holder) => {
                return Err(Error::StackCorruption {
                    expected: format!("node #{}", id),
                    found: format!("{:?}#{}", holder.node.node_type, holder.id),
                })
            }
            None => {
                return Err(Error::StackCorruption {
                    expected: format!("node #{}", id),
                    found: "empty stack".to_string(),
                })
            }
        };
        self.attach(holder.node)
    }

    fn open_frame(&mut self, kind: FrameKind, start: usize, end: usize) -> u64 {
        let id = self.allocate_id();
        self.frames.push(SpanFrame {
            id,
            kind,
            start,
            end,
            spans: Vec::new(),
        });
        id
    }

    fn pop_frame(&mut self, id: u64) -> Result<SpanFrame> {
        match self.frames.pop() {
            Some(frame) if frame.id == id => Ok(frame),
            Some(frame) => Err(Error::StackCorruption {
                expected: format!("span builder #{}", id),
                found: frame.describe(),
            }),
            None => Err(Error::StackCorruption {
                expected: format!("span builder #{}", id),
                found: "empty stack".to_string(),
            }),
        }
    }

    fn close_leaf(&mut self, id: u64) -> Result<()> {
        let frame = self.pop_frame(id)?;
        let node_type = match frame.kind {
            FrameKind::Leaf(node_type) => node_type,
            FrameKind::Inline { .. } => {
                return Err(Error::StackCorruption {
                    expected: format!("leaf #{}", id),
                    found: frame.describe(),
                })
            }
        };
        let mut node = ImdexNode::new(node_type, frame.start, frame.end);
        node.spans = frame.spans;
        if node.start >= node.end {
            // No block range available: cover the spans.
            if let Some((start, end)) = node.span_extent() {
                node.start = start;
                node.end = end;
            }
        }
        self.attach(node)
    }

    fn close_inline(&mut self, id: u64) -> Result<()> {
        let frame = self.pop_frame(id)?;
        let (style, target) = match frame.kind {
            FrameKind::Inline { style, target } => (style, target),
            FrameKind::Leaf(_) => {
                return Err(Error::StackCorruption {
                    expected: format!("span #{}", id),
                    found: frame.describe(),
                })
            }
        };
        for mut span in frame.spans {
            span.style |= style;
            if span.target.is_none() {
                span.target = target.clone();
            }
            self.push_span(span)?;
        }
        Ok(())
    }

    fn attach(&mut self, node: ImdexNode) -> Result<()> {
        let parent = self.current_holder_mut()?;
        parent.children.push(node);
        Ok(())
    }
}

/// Scoped construction helpers, available to anything that owns a builder.
pub trait TreeContext: Sized {
    fn builder(&mut self) -> &mut TreeBuilder;

    /// Build a structural node whose children are produced by `f`.
    fn with_holder<F>(&mut self, node_type: NodeType, start: usize, end: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let id = self.builder().open_holder(node_type, start, end)?;
        f(self)?;
        self.builder().close_holder(id)
    }

    /// Build a leaf node whose spans are produced by `f`.
    fn with_leaf<F>(&mut self, node_type: NodeType, start: usize, end: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if !node_type.is_leaf() {
            return Err(Error::Structure(format!("{:?} is not a leaf type", node_type)));
        }
        if self.builder().in_leaf() {
            return Err(Error::Structure(format!(
                "leaf {:?} opened inside another leaf",
                node_type
            )));
        }
        let id = self
            .builder()
            .open_frame(FrameKind::Leaf(node_type), start, end);
        f(self)?;
        self.builder().close_leaf(id)
    }

    /// Build styled inline content; the spans produced by `f` gain `style`
    /// (and `target`, if they have none) and join the enclosing builder.
    fn with_span<F>(&mut self, style: SpanStyle, target: Option<String>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if !self.builder().in_leaf() {
            return Err(Error::Structure("inline span opened outside of a leaf".to_string()));
        }
        let id = self
            .builder()
            .open_frame(FrameKind::Inline { style, target }, 0, 0);
        f(self)?;
        self.builder().close_inline(id)
    }
}

impl TreeContext for TreeBuilder {
    fn builder(&mut self) -> &mut TreeBuilder {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_nested_tree() {
        let mut b = TreeBuilder::new(20);
        b.with_holder(NodeType::BlockQuote, 0, 20, |b| {
            b.with_leaf(NodeType::Paragraph, 2, 20, |b| {
                b.push_span(ImdexSpan::range(2, 6, SpanStyle::NONE))?;
                b.with_span(SpanStyle::BOLD, None, |b| {
                    b.with_span(SpanStyle::LINK, Some("a.md".to_string()), |b| {
                        b.push_span(ImdexSpan::range(7, 11, SpanStyle::NONE))
                    })
                })
            })
        })
        .unwrap();

        let root = b.finish().unwrap();
        let quote = &root.children[0];
        assert_eq!(quote.node_type, NodeType::BlockQuote);
        let paragraph = &quote.children[0];
        assert!(paragraph.children.is_empty());
        assert_eq!(paragraph.spans.len(), 2);
        let styled = &paragraph.spans[1];
        assert!(styled.style.contains(SpanStyle::BOLD | SpanStyle::LINK));
        assert_eq!(styled.target.as_deref(), Some("a.md"));
    }

    #[test]
    fn test_structural_child_inside_leaf_is_rejected() {
        let mut b = TreeBuilder::new(10);
        let result = b.with_leaf(NodeType::Paragraph, 0, 10, |b| {
            b.with_holder(NodeType::BulletContainer, 0, 10, |_| Ok(()))
        });
        assert!(matches!(result, Err(Error::Structure(_))));
    }

    #[test]
    fn test_mismatched_close_is_stack_corruption() {
        let mut b = TreeBuilder::new(10);
        let outer = b.open_holder(NodeType::BlockQuote, 0, 10).unwrap();
        let _inner = b.open_holder(NodeType::BulletContainer, 0, 10).unwrap();
        let result = b.close_holder(outer);
        assert!(matches!(result, Err(Error::StackCorruption { .. })));
    }

    #[test]
    fn test_unclosed_scope_fails_finish() {
        let mut b = TreeBuilder::new(10);
        b.open_holder(NodeType::BlockQuote, 0, 10).unwrap();
        assert!(matches!(b.finish(), Err(Error::StackCorruption { .. })));
    }

    #[test]
    fn test_leaf_without_range_covers_spans() {
        let mut b = TreeBuilder::new(30);
        b.with_leaf(NodeType::Paragraph, 0, 0, |b| {
            b.push_span(ImdexSpan::range(12, 15, SpanStyle::NONE))?;
            b.push_span(ImdexSpan::literal("&", SpanStyle::NONE))?;
            b.push_span(ImdexSpan::range(4, 9, SpanStyle::NONE))
        })
        .unwrap();
        let root = b.finish().unwrap();
        assert_eq!((root.children[0].start, root.children[0].end), (4, 15));
    }

    #[test]
    fn test_span_outside_leaf_is_rejected() {
        let mut b = TreeBuilder::new(5);
        assert!(b.push_span(ImdexSpan::range(0, 1, SpanStyle::NONE)).is_err());
        assert!(b.with_span(SpanStyle::BOLD, None, |_| Ok(())).is_err());
    }
}
