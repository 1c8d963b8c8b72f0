use crate::core::error::Result;
use crate::document::model::{Document, DocumentContent, DocumentMetadata};
use crate::document::node::{ImdexNode, SpanStyle};
use crate::indexing::parser::parse_document;
use crate::indexing::sections::{reconstruct_snippet, ByteRange};
use crate::search::profile::Profile;
use crate::storage::corpus::DocumentStore;
use crate::storage::index::SectionIndex;
use std::sync::Arc;
use tantivy::query::{BooleanQuery, Occur, Query, RegexQuery, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::Term;

/// One search result with its snippet rebuilt from live content
#[derive(Debug, Clone)]
pub struct DocumentSectionContent {
    pub document: Document,
    pub metadata: DocumentMetadata,
    pub score: f32,
    pub byte_ranges: Vec<ByteRange>,
    /// Snippet sliced from the document's current content
    pub text: Option<String>,
    /// Set when the stored location no longer fits the live content
    pub integrity: Option<String>,
}

/// A resolved link target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLink {
    pub document: Document,
    pub fragment: Option<String>,
    pub metadata: DocumentMetadata,
}

pub struct QueryEngine {
    store: Arc<DocumentStore>,
    index: Arc<SectionIndex>,
}

fn escape_regex(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len());
    for c in token.chars() {
        if !c.is_alphanumeric() {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl QueryEngine {
    pub fn new(store: Arc<DocumentStore>, index: Arc<SectionIndex>) -> Self {
        Self { store, index }
    }

    /// Build the scoped query for `text`, or `None` when nothing can match.
    ///
    /// Every word but the last is an exact term, the last is a prefix; word
    /// clauses are OR'ed and the result is AND'ed with an OR over `corpora`.
    pub fn build_query(&self, corpora: &[String], text: &str) -> Result<Option<Box<dyn Query>>> {
        if corpora.is_empty() {
            return Ok(None);
        }
        let fields = *self.index.fields();

        let words: Vec<&str> = text.split_whitespace().collect();
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let tokens = self.index.tokenize(word)?;
            let last_word = i + 1 == words.len();
            for (j, token) in tokens.iter().enumerate() {
                let query: Box<dyn Query> = if last_word && j + 1 == tokens.len() {
                    let pattern = format!("{}.*", escape_regex(token));
                    Box::new(RegexQuery::from_pattern(&pattern, fields.text)?)
                } else {
                    Box::new(TermQuery::new(
                        Term::from_field_text(fields.text, token),
                        IndexRecordOption::WithFreqs,
                    ))
                };
                clauses.push((Occur::Should, query));
            }
        }
        if clauses.is_empty() {
            return Ok(None);
        }

        let visibility: Vec<(Occur, Box<dyn Query>)> = corpora
            .iter()
            .map(|korpus| {
                let query: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(fields.korpus, korpus),
                    IndexRecordOption::Basic,
                ));
                (Occur::Should, query)
            })
            .collect();

        Ok(Some(Box::new(BooleanQuery::new(vec![
            (Occur::Must, Box::new(BooleanQuery::new(clauses)) as Box<dyn Query>),
            (Occur::Must, Box::new(BooleanQuery::new(visibility)) as Box<dyn Query>),
        ]))))
    }

    /// Search the corpora visible to `profile`
    pub fn query(
        &self,
        profile: &Profile,
        text: &str,
        max_results: usize,
    ) -> Result<Vec<DocumentSectionContent>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let Some(query) = self.build_query(&profile.corpora, text)? else {
            return Ok(Vec::new());
        };

        let hits = self.index.search(query.as_ref(), max_results)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let location = hit.location;
            let (snippet, integrity) = match self.store.read_content(&location.document) {
                Ok(content) => match reconstruct_snippet(&content, &location.byte_ranges) {
                    Ok(snippet) => (Some(snippet), None),
                    Err(problem) => (None, Some(problem)),
                },
                Err(e) => (None, Some(format!("content unavailable: {}", e))),
            };
            if let Some(problem) = &integrity {
                tracing::warn!(document = %location.document, problem = %problem, "stale index entry");
            }
            results.push(DocumentSectionContent {
                document: location.document,
                metadata: location.metadata,
                score: hit.score,
                byte_ranges: location.byte_ranges,
                text: snippet,
                integrity,
            });
        }
        tracing::debug!(query = text, profile = %profile.name, results = results.len(), "query served");
        Ok(results)
    }

    /// Stored content of a document
    pub fn fetch(&self, document: &Document) -> Result<DocumentContent> {
        self.store.fetch(document)
    }

    /// Parse a stored document into its node tree
    pub fn parse(&self, document: &Document) -> Result<ImdexNode> {
        let content = self.fetch(document)?;
        Ok(parse_document(document, &content.content)?.root)
    }

    /// Resolve a relative link found in `from`.
    ///
    /// With an empty `raw_link`, the LINK span covering `position_hint` in
    /// `from` supplies the target. Returns `None` for external links and
    /// targets that do not exist.
    pub fn resolve_link(
        &self,
        from: &Document,
        raw_link: &str,
        position_hint: Option<usize>,
    ) -> Result<Option<DocumentLink>> {
        let raw = raw_link.trim();
        let raw = if raw.is_empty() {
            match position_hint {
                Some(position) => match self.link_at(from, position)? {
                    Some(target) => target,
                    None => return Ok(None),
                },
                None => return Ok(None),
            }
        } else {
            raw.to_string()
        };

        if raw.contains("://") || raw.starts_with("mailto:") {
            return Ok(None);
        }
        let (path, fragment) = match raw.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment.to_string()).filter(|f| !f.is_empty())),
            None => (raw.as_str(), None),
        };

        let Some(target) = Self::resolve_path(from, path) else {
            return Ok(None);
        };
        Ok(self.store.metadata(&target)?.map(|metadata| DocumentLink {
            document: target,
            fragment,
            metadata,
        }))
    }

    /// Resolve `path` against `from`'s folder, staying inside its corpus.
    fn resolve_path(from: &Document, path: &str) -> Option<Document> {
        let korpus = from.korpus()?;
        if path.is_empty() {
            return Some(from.clone());
        }

        let parent = from.parent();
        let mut segments: Vec<&str> = if path.starts_with('/') {
            vec![korpus]
        } else {
            parent.segments().collect()
        };
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    // The corpus folder is the top.
                    if segments.len() <= 1 {
                        return None;
                    }
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Document::parse(&segments.join("/")).ok()
    }

    fn link_at(&self, document: &Document, position: usize) -> Result<Option<String>> {
        let root = self.parse(document)?;
        for node in root.walk() {
            for span in &node.spans {
                if !span.style.contains(SpanStyle::LINK) {
                    continue;
                }
                if let Some((start, end)) = span.source_range() {
                    if start <= position && position < end {
                        return Ok(span.target.clone());
                    }
                }
            }
        }
        Ok(None)
    }
}
