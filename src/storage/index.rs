//! Full-text section index on top of tantivy.
//!
//! Every indexed section is one tantivy document carrying the owning
//! document path (the delete key), its corpus, the section text and the
//! serialized [`LocationDescription`]. Changes only become visible to
//! searches after [`SectionIndex::apply`] or [`SectionIndex::clear_corpus`]
//! commits and reloads the reader.

use crate::core::config::IndexSettings;
use crate::core::error::{Error, Result};
use crate::document::model::Document;
use crate::indexing::sections::{IndexedSection, LocationDescription};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::Query;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

#[derive(Debug, Clone, Copy)]
pub struct SectionFields {
    pub path: Field,
    pub korpus: Field,
    pub text: Field,
    pub location: Field,
}

impl SectionFields {
    fn schema() -> (Schema, SectionFields) {
        let mut builder = Schema::builder();
        let fields = SectionFields {
            path: builder.add_text_field("path", STRING | STORED),
            korpus: builder.add_text_field("korpus", STRING | STORED),
            text: builder.add_text_field("text", TEXT),
            location: builder.add_text_field("location", STORED),
        };
        (builder.build(), fields)
    }
}

/// Replacement set for one document: its old sections are dropped and
/// `sections` (possibly none) take their place.
#[derive(Debug, Clone)]
pub struct DocumentSections {
    pub document: Document,
    pub sections: Vec<IndexedSection>,
}

/// One search hit
#[derive(Debug, Clone)]
pub struct SectionHit {
    pub score: f32,
    pub location: LocationDescription,
}

pub struct SectionIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: SectionFields,
}

impl SectionIndex {
    /// Open or create the index stored in `dir`
    pub fn open(dir: &Path, settings: &IndexSettings) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = SectionFields::schema();
        let directory = MmapDirectory::open(dir)
            .map_err(|e| Error::Config(format!("Failed to open index directory: {}", e)))?;
        let index = Index::open_or_create(directory, schema)?;
        Self::with_index(index, fields, settings)
    }

    /// A throwaway index held in memory
    pub fn in_memory(settings: &IndexSettings) -> Result<Self> {
        let (schema, fields) = SectionFields::schema();
        Self::with_index(Index::create_in_ram(schema), fields, settings)
    }

    fn with_index(index: Index, fields: SectionFields, settings: &IndexSettings) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer =
            index.writer_with_num_threads(settings.writer_threads.max(1), settings.writer_heap_bytes)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    pub fn fields(&self) -> &SectionFields {
        &self.fields
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|e| Error::Database(format!("Index writer lock poisoned: {}", e)))
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Replace the sections of every listed document and commit once.
    pub fn apply(&self, updates: &[DocumentSections]) -> Result<()> {
        let mut writer = self.lock_writer()?;
        let mut added = 0usize;
        for update in updates {
            writer.delete_term(Term::from_field_text(self.fields.path, update.document.path()));
            let korpus = update.document.korpus().unwrap_or_default();
            for section in &update.sections {
                let mut doc = TantivyDocument::new();
                doc.add_text(self.fields.path, update.document.path());
                doc.add_text(self.fields.korpus, korpus);
                doc.add_text(self.fields.text, &section.text);
                doc.add_text(self.fields.location, serde_json::to_string(&section.location)?);
                writer.add_document(doc)?;
                added += 1;
            }
        }
        self.commit(&mut writer)?;
        tracing::debug!(documents = updates.len(), sections = added, "committed index batch");
        Ok(())
    }

    /// Drop every section belonging to `korpus`
    pub fn clear_corpus(&self, korpus: &str) -> Result<()> {
        let mut writer = self.lock_writer()?;
        writer.delete_term(Term::from_field_text(self.fields.korpus, korpus));
        self.commit(&mut writer)?;
        tracing::info!(korpus, "cleared indexed sections");
        Ok(())
    }

    /// Run `query` and decode the stored locations of the top `limit` hits
    pub fn search(&self, query: &dyn Query, limit: usize) -> Result<Vec<SectionHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let top_docs = searcher.search(query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let raw = doc
                .get_first(self.fields.location)
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Parsing("indexed section without location".to_string()))?;
            hits.push(SectionHit {
                score,
                location: serde_json::from_str(raw)?,
            });
        }
        Ok(hits)
    }

    /// Split `text` into the terms the `text` field indexes
    pub fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(self.fields.text)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    /// Number of committed, searchable sections
    pub fn num_sections(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}
