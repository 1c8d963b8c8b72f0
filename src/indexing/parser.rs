use crate::core::error::{Error, Result};
use crate::document::builder::{TreeBuilder, TreeContext};
use crate::document::model::Document;
use crate::document::node::{ImdexNode, ImdexSpan, NodeType, SpanStyle};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde::Deserialize;
use std::collections::VecDeque;
use std::ops::Range;

/// Extensions parsed as Markdown; everything else is treated as source text.
pub const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdown", "mkd", "txt"];

/// Result of parsing one document
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub root: ImdexNode,
    /// `title` from YAML front matter
    pub title: Option<String>,
    /// Text of the first heading
    pub first_heading: Option<String>,
}

impl ParsedDocument {
    /// Display label: front matter title, else first heading, else file name.
    pub fn label(&self, document: &Document) -> String {
        self.title
            .clone()
            .or_else(|| self.first_heading.clone())
            .unwrap_or_else(|| document.name().to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
}

/// Whether `document` is parsed as Markdown.
pub fn is_markdown(document: &Document) -> bool {
    document
        .extension()
        .map(|ext| MARKDOWN_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Parse a document's content, dispatching on its extension.
pub fn parse_document(document: &Document, source: &str) -> Result<ParsedDocument> {
    if is_markdown(document) {
        parse_markdown(source)
    } else {
        Ok(parse_source(source))
    }
}

/// Derive a label without failing; unparsable content falls back to the name.
pub fn derive_label(document: &Document, source: &str) -> String {
    match parse_document(document, source) {
        Ok(parsed) => parsed.label(document),
        Err(e) => {
            tracing::debug!(document = %document, error = %e, "label falls back to file name");
            document.name().to_string()
        }
    }
}

/// Parse non-Markdown text as a single fenced code block.
pub fn parse_source(source: &str) -> ParsedDocument {
    let mut root = ImdexNode::new(NodeType::Root, 0, source.len());
    if !source.is_empty() {
        let mut code = ImdexNode::new(NodeType::FencedCode, 0, source.len());
        code.spans
            .push(ImdexSpan::range(0, source.len(), SpanStyle::CODE));
        root.children.push(code);
    }
    ParsedDocument {
        root,
        title: None,
        first_heading: None,
    }
}

/// Parse Markdown into an [`ImdexNode`] tree whose offsets index `source`.
pub fn parse_markdown(source: &str) -> Result<ParsedDocument> {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_YAML_STYLE_METADATA_BLOCKS;
    let events = Parser::new_ext(source, options).into_offset_iter().collect();

    let mut parser = MarkdownParser {
        source,
        events,
        builder: TreeBuilder::new(source.len()),
        inline: InlineState::default(),
        title: None,
        first_heading: None,
    };
    parser.parse_blocks(None)?;

    Ok(ParsedDocument {
        root: parser.builder.finish()?,
        title: parser.title,
        first_heading: parser.first_heading,
    })
}

/// Per-leaf inline bookkeeping.
#[derive(Default)]
struct InlineState {
    underline: u32,
    superscript: u32,
    images: usize,
    image_depth: usize,
    /// Spans emitted outside of any image
    loose_spans: usize,
}

struct MarkdownParser<'a> {
    source: &'a str,
    events: VecDeque<(Event<'a>, Range<usize>)>,
    builder: TreeBuilder,
    inline: InlineState,
    title: Option<String>,
    first_heading: Option<String>,
}

impl TreeContext for MarkdownParser<'_> {
    fn builder(&mut self) -> &mut TreeBuilder {
        &mut self.builder
    }
}

fn is_inline_tag(tag: &Tag) -> bool {
    matches!(
        tag,
        Tag::Emphasis | Tag::Strong | Tag::Strikethrough | Tag::Link { .. } | Tag::Image { .. }
    )
}

fn is_inline_event(event: &Event) -> bool {
    match event {
        Event::Text(_)
        | Event::Code(_)
        | Event::InlineHtml(_)
        | Event::SoftBreak
        | Event::HardBreak
        | Event::FootnoteReference(_)
        | Event::TaskListMarker(_) => true,
        Event::Start(tag) => is_inline_tag(tag),
        _ => false,
    }
}

impl<'a> MarkdownParser<'a> {
    fn next_event(&mut self) -> Result<(Event<'a>, Range<usize>)> {
        self.events
            .pop_front()
            .ok_or_else(|| Error::Parsing("unexpected end of input".to_string()))
    }

    /// Block range with trailing whitespace and line endings removed.
    fn trimmed(&self, range: &Range<usize>) -> (usize, usize) {
        let end = range.end.min(self.source.len());
        let start = range.start.min(end);
        let text = self.source.get(start..end).unwrap_or("");
        (start, start + text.trim_end().len())
    }

    fn leaf<F>(&mut self, node_type: NodeType, start: usize, end: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.inline = InlineState::default();
        self.with_leaf(node_type, start, end, f)
    }

    fn parse_blocks(&mut self, until: Option<TagEnd>) -> Result<()> {
        loop {
            let implicit_start = match self.events.front() {
                None => {
                    return match until {
                        None => Ok(()),
                        Some(end) => Err(Error::Parsing(format!("input ended inside {:?}", end))),
                    }
                }
                Some((event, range)) if is_inline_event(event) => Some(range.start),
                Some(_) => None,
            };

            // Inline content directly inside a list item.
            if let Some(start) = implicit_start {
                self.leaf(NodeType::Paragraph, start, start, |p| p.parse_inlines(None))?;
                continue;
            }

            let (event, range) = self.next_event()?;
            match event {
                Event::End(end) if Some(end) == until => return Ok(()),
                Event::End(end) => {
                    return Err(Error::Parsing(format!("unexpected end of {:?}", end)))
                }
                Event::Start(tag) => self.parse_block(tag, range)?,
                Event::Rule => {
                    let (start, end) = self.trimmed(&range);
                    self.with_holder(NodeType::ThematicBreak, start, end, |_| Ok(()))?;
                }
                _ => {}
            }
        }
    }

    fn parse_block(&mut self, tag: Tag<'a>, range: Range<usize>) -> Result<()> {
        let (start, end) = self.trimmed(&range);
        match tag {
            Tag::Paragraph => self.parse_paragraph(start, end),
            Tag::Heading { level, .. } => self.parse_heading(level, start, end),
            Tag::BlockQuote => self.with_holder(NodeType::BlockQuote, start, end, |p| {
                p.parse_blocks(Some(TagEnd::BlockQuote))
            }),
            Tag::CodeBlock(_) => self.leaf(NodeType::FencedCode, start, end, |p| p.parse_code()),
            Tag::List(first) => {
                let (container, item) = if first.is_some() {
                    (NodeType::NumberedContainer, NodeType::Numbered)
                } else {
                    (NodeType::BulletContainer, NodeType::Bullet)
                };
                self.with_holder(container, start, end, |p| p.parse_items(item))
            }
            Tag::Table(_) => self.parse_table(start, end),
            Tag::MetadataBlock(kind) => self.parse_front_matter(TagEnd::MetadataBlock(kind)),
            Tag::HtmlBlock => self.skip_until(TagEnd::HtmlBlock),
            Tag::FootnoteDefinition(_) => self.skip_until(TagEnd::FootnoteDefinition),
            other => Err(Error::Structure(format!("unexpected {:?} at block level", other))),
        }
    }

    fn skip_until(&mut self, end: TagEnd) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.next_event()?.0 {
                Event::Start(_) => depth += 1,
                Event::End(e) if depth == 0 && e == end => return Ok(()),
                Event::End(_) => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    fn parse_front_matter(&mut self, end: TagEnd) -> Result<()> {
        let mut yaml = String::new();
        loop {
            match self.next_event()?.0 {
                Event::Text(text) => yaml.push_str(&text),
                Event::End(e) if e == end => break,
                other => {
                    return Err(Error::Parsing(format!("unexpected {:?} in front matter", other)))
                }
            }
        }
        match serde_yaml::from_str::<FrontMatter>(&yaml) {
            Ok(front) => self.title = front.title.filter(|t| !t.trim().is_empty()),
            Err(e) => tracing::debug!(error = %e, "ignoring unreadable front matter"),
        }
        Ok(())
    }

    fn parse_paragraph(&mut self, start: usize, end: usize) -> Result<()> {
        self.leaf(NodeType::Paragraph, start, end, |p| {
            p.parse_inlines(Some(TagEnd::Paragraph))?;
            if p.inline.images == 1 && p.inline.loose_spans == 0 {
                p.builder.retype_leaf(NodeType::Image)?;
            }
            Ok(())
        })
    }

    fn parse_heading(&mut self, level: HeadingLevel, start: usize, end: usize) -> Result<()> {
        let style = SpanStyle::header(level as u8);
        self.leaf(NodeType::Heading, start, end, |p| {
            p.with_span(style, None, |p| p.parse_inlines(Some(TagEnd::Heading(level))))
        })?;

        if self.first_heading.is_none() {
            let source = self.source;
            self.first_heading = self
                .builder
                .current_holder_mut()?
                .children
                .last()
                .map(|heading| heading.span_text(source).trim().to_string())
                .filter(|text| !text.is_empty());
        }
        Ok(())
    }

    fn parse_code(&mut self) -> Result<()> {
        loop {
            let (event, range) = self.next_event()?;
            match event {
                Event::Text(text) => self.emit_text(range, &text, SpanStyle::CODE)?,
                Event::End(TagEnd::CodeBlock) => return Ok(()),
                other => {
                    return Err(Error::Structure(format!("unexpected {:?} in code block", other)))
                }
            }
        }
    }

    fn parse_items(&mut self, item: NodeType) -> Result<()> {
        loop {
            let (event, range) = self.next_event()?;
            match event {
                Event::Start(Tag::Item) => {
                    let (start, end) = self.trimmed(&range);
                    self.with_holder(item, start, end, |p| p.parse_blocks(Some(TagEnd::Item)))?;
                }
                Event::End(TagEnd::List(_)) => return Ok(()),
                other => {
                    return Err(Error::Structure(format!("unexpected {:?} in list", other)))
                }
            }
        }
    }

    fn parse_table(&mut self, start: usize, end: usize) -> Result<()> {
        self.with_holder(NodeType::TableContainer, start, end, |p| {
            loop {
                let (event, range) = p.next_event()?;
                match event {
                    Event::Start(Tag::TableHead) => p.parse_row(range, TagEnd::TableHead)?,
                    Event::Start(Tag::TableRow) => p.parse_row(range, TagEnd::TableRow)?,
                    Event::End(TagEnd::Table) => break,
                    other => {
                        return Err(Error::Structure(format!("unexpected {:?} in table", other)))
                    }
                }
            }
            let source = p.source;
            arrange_table(p.builder.current_holder_mut()?, source)
        })
    }

    fn parse_row(&mut self, range: Range<usize>, row_end: TagEnd) -> Result<()> {
        let (start, end) = self.trimmed(&range);
        self.with_holder(NodeType::TableRow, start, end, |p| loop {
            let (event, range) = p.next_event()?;
            match event {
                Event::Start(Tag::TableCell) => {
                    let (start, end) = p.trimmed(&range);
                    p.leaf(NodeType::TableCell, start, end, |p| {
                        p.parse_inlines(Some(TagEnd::TableCell))
                    })?;
                }
                Event::End(e) if e == row_end => return Ok(()),
                other => {
                    return Err(Error::Structure(format!("unexpected {:?} in table row", other)))
                }
            }
        })
    }

    /// Parse inline content up to `until`, or, for an implicit paragraph
    /// (`until == None`), up to the first non-inline event.
    fn parse_inlines(&mut self, until: Option<TagEnd>) -> Result<()> {
        loop {
            match self.events.front() {
                None if until.is_none() => return Ok(()),
                None => return Err(Error::Parsing("input ended inside inline content".to_string())),
                Some((event, _)) if until.is_none() && !is_inline_event(event) => return Ok(()),
                Some(_) => {}
            }

            let (event, range) = self.next_event()?;
            match event {
                Event::End(end) if Some(end) == until => return Ok(()),
                Event::Text(text) => self.emit_text(range, &text, SpanStyle::NONE)?,
                Event::Code(text) => self.emit_text(range, &text, SpanStyle::CODE)?,
                Event::SoftBreak => self.emit_text(range, "\n", SpanStyle::SOFT_BREAK)?,
                Event::HardBreak => self.emit(ImdexSpan::literal("\n", SpanStyle::HARD_BREAK))?,
                Event::InlineHtml(html) | Event::Html(html) => self.inline_html(&html),
                Event::Start(Tag::Emphasis) => self.with_span(SpanStyle::ITALIC, None, |p| {
                    p.parse_inlines(Some(TagEnd::Emphasis))
                })?,
                Event::Start(Tag::Strong) => self.with_span(SpanStyle::BOLD, None, |p| {
                    p.parse_inlines(Some(TagEnd::Strong))
                })?,
                Event::Start(Tag::Strikethrough) => {
                    self.with_span(SpanStyle::STRIKETHROUGH, None, |p| {
                        p.parse_inlines(Some(TagEnd::Strikethrough))
                    })?
                }
                Event::Start(Tag::Link { dest_url, .. }) => {
                    self.with_span(SpanStyle::LINK, Some(dest_url.to_string()), |p| {
                        p.parse_inlines(Some(TagEnd::Link))
                    })?
                }
                Event::Start(Tag::Image { dest_url, .. }) => {
                    self.inline.images += 1;
                    self.inline.image_depth += 1;
                    let result = self.with_span(SpanStyle::LINK, Some(dest_url.to_string()), |p| {
                        p.parse_inlines(Some(TagEnd::Image))
                    });
                    self.inline.image_depth -= 1;
                    result?
                }
                // Block content inside a leaf is rejected by the builder.
                Event::Start(tag) => self.parse_block(tag, range)?,
                Event::End(end) => {
                    return Err(Error::Parsing(format!("unexpected end of {:?}", end)))
                }
                Event::Rule => {
                    return Err(Error::Structure("thematic break inside a leaf".to_string()))
                }
                _ => {}
            }
        }
    }

    fn inline_html(&mut self, html: &str) {
        match html.trim().to_ascii_lowercase().as_str() {
            "<u>" => self.inline.underline += 1,
            "</u>" => self.inline.underline = self.inline.underline.saturating_sub(1),
            "<sup>" => self.inline.superscript += 1,
            "</sup>" => self.inline.superscript = self.inline.superscript.saturating_sub(1),
            _ => {}
        }
    }

    /// Emit `text` as a range span when it can be located in the source at
    /// `range`, otherwise as literal data.
    fn emit_text(&mut self, range: Range<usize>, text: &str, style: SpanStyle) -> Result<()> {
        let span = match self.source.get(range.clone()) {
            Some(slice) if slice == text => ImdexSpan::range(range.start, range.end, style),
            Some(slice) if !text.is_empty() => match slice.find(text) {
                Some(offset) => {
                    let start = range.start + offset;
                    ImdexSpan::range(start, start + text.len(), style)
                }
                None => ImdexSpan::literal(text, style),
            },
            _ => ImdexSpan::literal(text, style),
        };
        self.emit(span)
    }

    fn emit(&mut self, mut span: ImdexSpan) -> Result<()> {
        if self.inline.underline > 0 {
            span.style |= SpanStyle::UNDERLINE;
        }
        if self.inline.superscript > 0 {
            span.style |= SpanStyle::SUPERSCRIPT;
        }
        if self.inline.image_depth == 0 {
            self.inline.loose_spans += 1;
        }
        self.builder.push_span(span)
    }
}

fn is_divider_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && line.contains('-')
        && line.chars().all(|c| matches!(c, '|' | ':' | '-' | ' ' | '\t'))
}

/// Locate the divider line following the header row, shrinking the header
/// if its range swallowed the divider.
fn find_divider(source: &str, header: &mut ImdexNode, limit: usize) -> Option<(usize, usize)> {
    let header_text = source.get(header.start..header.end)?;
    if let Some(newline) = header_text.find('\n') {
        let line_start = header.start + newline + 1;
        let line = source.get(line_start..header.end)?.trim_end();
        if is_divider_line(line) {
            let first = header_text[..newline].trim_end();
            header.end = header.start + first.len();
            return Some((line_start, line_start + line.len()));
        }
        return None;
    }

    let rest = source.get(header.end..limit.min(source.len()))?;
    let line_start = header.end + rest.find('\n')? + 1;
    let line = source
        .get(line_start..limit.min(source.len()))?
        .split('\n')
        .next()
        .unwrap_or("")
        .trim_end();
    is_divider_line(line).then(|| (line_start, line_start + line.len()))
}

/// Second table pass: row 0 becomes the bold header, followed by the divider.
fn arrange_table(table: &mut ImdexNode, source: &str) -> Result<()> {
    if table.children.iter().all(|row| row.children.is_empty()) {
        return Err(Error::Structure("table has zero columns".to_string()));
    }

    let mut rows = std::mem::take(&mut table.children).into_iter();
    let mut arranged = Vec::with_capacity(rows.len() + 1);
    if let Some(mut header) = rows.next() {
        for cell in &mut header.children {
            for span in &mut cell.spans {
                span.style |= SpanStyle::BOLD;
            }
        }
        let divider = find_divider(source, &mut header, table.end);
        arranged.push(header);
        if let Some((start, end)) = divider {
            arranged.push(ImdexNode::new(NodeType::TableDividerRow, start, end));
        }
    }
    arranged.extend(rows);
    table.children = arranged;
    Ok(())
}
