use crate::core::config::{Config, IndexSettings};
use crate::core::error::{db_err, Error, Result};
use crate::document::model::{
    ChangeKind, Document, DocumentContent, DocumentMetadata, DocumentProperties, DocumentType,
    PendingChange,
};
use crate::indexing::parser::{derive_label, parse_document};
use crate::indexing::sections::extract_sections;
use crate::storage::index::{DocumentSections, SectionIndex};
use crate::storage::state::content_digest;
use rayon::prelude::*;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Document metadata keyed by document path, JSON serialized
const DOCUMENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("documents");

/// Durable storage for document metadata and content, shared by all corpora
pub struct DocumentStore {
    db: Database,
    content_dir: PathBuf,
    durable_writes: AtomicU64,
}

impl DocumentStore {
    /// Open or create the store under the configured directories
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(&config.database_dir.join("documents.redb"), &config.content_dir)
    }

    pub fn open_at(db_path: &Path, content_dir: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(content_dir)?;

        let db = if db_path.exists() {
            Database::open(db_path).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("lock") {
                    Error::Database("Document database is locked. Another imdex process may be running.".to_string())
                } else {
                    Error::Database(format!("Failed to open document database: {}", e))
                }
            })?
        } else {
            Database::create(db_path).map_err(db_err("Failed to create document database"))?
        };

        let write_txn = db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            let _table = write_txn
                .open_table(DOCUMENTS_TABLE)
                .map_err(db_err("Failed to open table"))?;
        }
        write_txn
            .commit()
            .map_err(db_err("Failed to commit transaction"))?;

        Ok(Self {
            db,
            content_dir: content_dir.to_path_buf(),
            durable_writes: AtomicU64::new(0),
        })
    }

    /// Number of content writes performed since opening
    pub fn durable_writes(&self) -> u64 {
        self.durable_writes.load(Ordering::SeqCst)
    }

    pub fn metadata(&self, document: &Document) -> Result<Option<DocumentMetadata>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(DOCUMENTS_TABLE)
            .map_err(db_err("Failed to open table"))?;

        let result = match table
            .get(document.path())
            .map_err(db_err("Failed to get document metadata"))?
        {
            Some(guard) => serde_json::from_str(guard.value()).map(Some).map_err(Error::from),
            None => Ok(None),
        };
        result
    }

    pub fn exists(&self, document: &Document) -> Result<bool> {
        Ok(document.is_root() || self.metadata(document)?.is_some())
    }

    fn put_metadata(&self, document: &Document, metadata: &DocumentMetadata) -> Result<()> {
        let json = serde_json::to_string(metadata)?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            let mut table = write_txn
                .open_table(DOCUMENTS_TABLE)
                .map_err(db_err("Failed to open table"))?;
            table
                .insert(document.path(), json.as_str())
                .map_err(db_err("Failed to insert document metadata"))?;
        }
        write_txn
            .commit()
            .map_err(db_err("Failed to commit transaction"))?;
        Ok(())
    }

    fn remove_metadata(&self, document: &Document) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            let mut table = write_txn
                .open_table(DOCUMENTS_TABLE)
                .map_err(db_err("Failed to open table"))?;
            table
                .remove(document.path())
                .map_err(db_err("Failed to remove document metadata"))?;
        }
        write_txn
            .commit()
            .map_err(db_err("Failed to commit transaction"))?;
        Ok(())
    }

    /// Every stored document strictly below `ancestor`, in path order
    pub fn descendants(&self, ancestor: &Document) -> Result<Vec<(Document, DocumentMetadata)>> {
        let prefix = format!("{}/", ancestor.path());
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(DOCUMENTS_TABLE)
            .map_err(db_err("Failed to open table"))?;

        let mut found = Vec::new();
        for entry in table
            .range::<&str>(prefix.as_str()..)
            .map_err(db_err("Failed to scan documents"))?
        {
            let (key, value) = entry.map_err(db_err("Failed to read document metadata"))?;
            let path = key.value();
            if !path.starts_with(&prefix) {
                break;
            }
            let metadata: DocumentMetadata = serde_json::from_str(value.value())?;
            found.push((Document::parse(path)?, metadata));
        }
        Ok(found)
    }

    /// Direct children of `parent`
    pub fn children(&self, parent: &Document) -> Result<Vec<(Document, DocumentMetadata)>> {
        Ok(self
            .descendants(parent)?
            .into_iter()
            .filter(|(doc, _)| doc.parent() == *parent)
            .collect())
    }

    /// Every document of `korpus`, folders included, in path order
    pub fn list_corpus(&self, korpus: &str) -> Result<Vec<(Document, DocumentMetadata)>> {
        self.descendants(&Document::in_corpus(korpus, "")?)
    }

    /// Names of every corpus holding at least its root folder
    pub fn list_corpora(&self) -> Result<Vec<String>> {
        Ok(self
            .children(&Document::root())?
            .into_iter()
            .filter_map(|(doc, _)| doc.korpus().map(str::to_string))
            .collect())
    }

    /// On-disk location of a document's content
    pub fn content_path(&self, document: &Document) -> PathBuf {
        document
            .segments()
            .fold(self.content_dir.clone(), |path, segment| path.join(segment))
    }

    pub fn read_content(&self, document: &Document) -> Result<String> {
        Ok(std::fs::read_to_string(self.content_path(document))?)
    }

    /// Content and metadata of a stored document. Folders carry no content.
    pub fn fetch(&self, document: &Document) -> Result<DocumentContent> {
        let metadata = self
            .metadata(document)?
            .ok_or_else(|| Error::NotFound(document.to_string()))?;
        let content = if metadata.is_folder() {
            String::new()
        } else {
            self.read_content(document)?
        };
        Ok(DocumentContent {
            document: document.clone(),
            kind: metadata.kind,
            content,
            label: Some(metadata.label),
        })
    }

    fn write_content(&self, document: &Document, kind: DocumentType, content: &str) -> Result<()> {
        let path = self.content_path(document);
        if kind == DocumentType::Folder {
            std::fs::create_dir_all(&path)?;
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
        }
        self.durable_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_content(&self, document: &Document, kind: DocumentType) -> Result<()> {
        let path = self.content_path(document);
        let result = if kind == DocumentType::Folder {
            std::fs::remove_dir(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Turn a pending change into the index replacement for its document.
fn prepare_sections(change: &PendingChange) -> DocumentSections {
    let document = change.content.document.clone();
    if change.kind == ChangeKind::Delete || change.metadata.is_folder() {
        return DocumentSections {
            document,
            sections: Vec::new(),
        };
    }
    let source = &change.content.content;
    let sections = match parse_document(&document, source) {
        Ok(parsed) => extract_sections(&document, &change.metadata, &parsed.root, source),
        Err(e) => {
            tracing::warn!(document = %document, error = %e, "skipping unparsable document");
            Vec::new()
        }
    };
    DocumentSections { document, sections }
}

/// One tenant's document tree and its pending-change log
pub struct Corpus {
    korpus: String,
    store: Arc<DocumentStore>,
    index: Arc<SectionIndex>,
    settings: IndexSettings,
    pending: Mutex<Vec<PendingChange>>,
}

impl Corpus {
    pub fn new(
        korpus: impl Into<String>,
        store: Arc<DocumentStore>,
        index: Arc<SectionIndex>,
        settings: IndexSettings,
    ) -> Result<Self> {
        let korpus = korpus.into();
        // Validates the name.
        Document::in_corpus(&korpus, "")?;
        Ok(Self {
            korpus,
            store,
            index,
            settings,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn korpus(&self) -> &str {
        &self.korpus
    }

    /// The corpus folder, `/<korpus>`
    pub fn root_document(&self) -> Document {
        Document::root()
            .join(&self.korpus)
            .unwrap_or_else(|_| Document::root())
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, Vec<PendingChange>>> {
        self.pending
            .lock()
            .map_err(|e| Error::Database(format!("Pending log lock poisoned: {}", e)))
    }

    /// Number of changes waiting for the next commit
    pub fn pending_len(&self) -> Result<usize> {
        Ok(self.lock_pending()?.len())
    }

    fn check_owned(&self, document: &Document) -> Result<()> {
        if document.korpus() == Some(self.korpus.as_str()) {
            Ok(())
        } else {
            Err(Error::InvalidPath(format!(
                "{} is not in corpus {}",
                document, self.korpus
            )))
        }
    }

    fn build_metadata(content: &DocumentContent) -> DocumentMetadata {
        if content.kind == DocumentType::Folder {
            return DocumentMetadata::folder(
                content
                    .label
                    .clone()
                    .unwrap_or_else(|| content.document.name().to_string()),
            );
        }
        DocumentMetadata {
            kind: content.kind,
            hash: content_digest(&content.content),
            label: content
                .label
                .clone()
                .unwrap_or_else(|| derive_label(&content.document, &content.content)),
        }
    }

    /// Write content and metadata, then log the change. Caller holds the log.
    fn write_and_log(
        &self,
        pending: &mut Vec<PendingChange>,
        content: DocumentContent,
        kind: ChangeKind,
    ) -> Result<DocumentMetadata> {
        let metadata = Self::build_metadata(&content);
        self.store
            .write_content(&content.document, content.kind, &content.content)?;
        self.store.put_metadata(&content.document, &metadata)?;
        pending.push(PendingChange {
            content,
            metadata: metadata.clone(),
            kind,
        });
        Ok(metadata)
    }

    fn ensure_folder(&self, pending: &mut Vec<PendingChange>, folder: &Document) -> Result<()> {
        if folder.is_root() {
            return Ok(());
        }
        match self.store.metadata(folder)? {
            Some(existing) if existing.is_folder() => Ok(()),
            Some(_) => Err(Error::Precondition(format!("{} is not a folder", folder))),
            None => {
                self.ensure_folder(pending, &folder.parent())?;
                tracing::debug!(folder = %folder, "creating implicit folder");
                self.write_and_log(
                    pending,
                    DocumentContent::folder(folder.clone()),
                    ChangeKind::Create,
                )?;
                Ok(())
            }
        }
    }

    /// Create a document, creating missing parent folders first
    pub fn create_document(&self, content: DocumentContent) -> Result<DocumentMetadata> {
        self.check_owned(&content.document)?;
        let mut pending = self.lock_pending()?;

        if let Some(existing) = self.store.metadata(&content.document)? {
            if existing.is_folder() && content.kind == DocumentType::Folder {
                return Ok(existing);
            }
            return Err(Error::AlreadyExists(content.document.to_string()));
        }

        self.ensure_folder(&mut pending, &content.document.parent())?;
        let document = content.document.clone();
        let metadata = self.write_and_log(&mut pending, content, ChangeKind::Create)?;
        tracing::debug!(document = %document, hash = %metadata.hash, "created document");
        Ok(metadata)
    }

    /// Replace a document's content; identical content is a no-op
    pub fn update_document(&self, content: DocumentContent) -> Result<DocumentMetadata> {
        self.check_owned(&content.document)?;
        let mut pending = self.lock_pending()?;

        let parent = content.document.parent();
        if !self.store.exists(&parent)? {
            return Err(Error::NotFound(parent.to_string()));
        }
        let existing = self
            .store
            .metadata(&content.document)?
            .ok_or_else(|| Error::NotFound(content.document.to_string()))?;

        if existing.kind == content.kind && existing.hash == content_digest(&content.content) {
            tracing::debug!(document = %content.document, "content unchanged");
            return Ok(existing);
        }

        let document = content.document.clone();
        let metadata = self.write_and_log(&mut pending, content, ChangeKind::Update)?;
        tracing::debug!(document = %document, hash = %metadata.hash, "updated document");
        Ok(metadata)
    }

    /// Change label or type without touching content
    pub fn update_properties(&self, properties: DocumentProperties) -> Result<DocumentMetadata> {
        self.check_owned(&properties.document)?;
        let mut pending = self.lock_pending()?;

        let existing = self
            .store
            .metadata(&properties.document)?
            .ok_or_else(|| Error::NotFound(properties.document.to_string()))?;
        let kind = properties.kind.unwrap_or(existing.kind);
        if (kind == DocumentType::Folder) != existing.is_folder() {
            return Err(Error::Precondition(format!(
                "cannot convert {} between folder and document",
                properties.document
            )));
        }

        let metadata = DocumentMetadata {
            kind,
            hash: existing.hash.clone(),
            label: properties.label.unwrap_or_else(|| existing.label.clone()),
        };
        if metadata == existing {
            return Ok(existing);
        }

        let content = if metadata.is_folder() {
            String::new()
        } else {
            self.store.read_content(&properties.document)?
        };
        self.store.put_metadata(&properties.document, &metadata)?;
        pending.push(PendingChange {
            content: DocumentContent {
                document: properties.document,
                kind,
                content,
                label: Some(metadata.label.clone()),
            },
            metadata: metadata.clone(),
            kind: ChangeKind::Update,
        });
        Ok(metadata)
    }

    fn delete_one(
        &self,
        pending: &mut Vec<PendingChange>,
        document: &Document,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        self.store.remove_metadata(document)?;
        if let Err(e) = self.store.remove_content(document, metadata.kind) {
            tracing::error!(document = %document, error = %e, "content removal failed, restoring metadata");
            self.store.put_metadata(document, metadata)?;
            return Err(e);
        }
        pending.push(PendingChange {
            content: DocumentContent {
                document: document.clone(),
                kind: metadata.kind,
                content: String::new(),
                label: Some(metadata.label.clone()),
            },
            metadata: metadata.clone(),
            kind: ChangeKind::Delete,
        });
        Ok(())
    }

    /// Delete a document; folders take their descendants with them
    pub fn delete_document(&self, document: &Document) -> Result<DocumentMetadata> {
        self.check_owned(document)?;
        let mut pending = self.lock_pending()?;

        let existing = self
            .store
            .metadata(document)?
            .ok_or_else(|| Error::NotFound(document.to_string()))?;

        if existing.is_folder() {
            // Deepest paths first so folders are empty when removed.
            let mut descendants = self.store.descendants(document)?;
            descendants.sort_by(|(a, _), (b, _)| b.path().cmp(a.path()));
            for (child, metadata) in &descendants {
                self.delete_one(&mut pending, child, metadata)?;
            }
        }
        self.delete_one(&mut pending, document, &existing)?;
        tracing::debug!(document = %document, "deleted document");
        Ok(existing)
    }

    /// Delete `folder` and then each ancestor while it is an empty folder.
    /// The corpus root is never removed. Returns the number of folders deleted.
    pub fn prune_empty_folders(&self, folder: &Document) -> Result<usize> {
        self.check_owned(folder)?;
        let mut pending = self.lock_pending()?;
        let root = self.root_document();

        let mut current = folder.clone();
        let mut pruned = 0;
        while current != root && current.korpus() == Some(self.korpus.as_str()) {
            let Some(metadata) = self.store.metadata(&current)? else {
                break;
            };
            if !metadata.is_folder() || !self.store.children(&current)?.is_empty() {
                break;
            }
            self.delete_one(&mut pending, &current, &metadata)?;
            tracing::debug!(folder = %current, "pruned empty folder");
            pruned += 1;
            current = current.parent();
        }
        Ok(pruned)
    }

    /// Queue a document for re-indexing from what the store holds now.
    ///
    /// A stored document is logged as an update of its current content; a
    /// missing one as a delete, dropping any sections still indexed for it.
    /// Nothing durable is written.
    pub fn resubmit(&self, document: &Document) -> Result<()> {
        self.check_owned(document)?;
        let mut pending = self.lock_pending()?;

        let change = match self.store.metadata(document)? {
            Some(metadata) => {
                let content = self.store.fetch(document)?;
                PendingChange {
                    content,
                    metadata,
                    kind: ChangeKind::Update,
                }
            }
            None => PendingChange {
                content: DocumentContent::markdown(document.clone(), String::new()),
                metadata: DocumentMetadata {
                    kind: DocumentType::Markdown,
                    hash: String::new(),
                    label: document.name().to_string(),
                },
                kind: ChangeKind::Delete,
            },
        };
        tracing::debug!(document = %document, kind = ?change.kind, "resubmitted for indexing");
        pending.push(change);
        Ok(())
    }

    /// Metadata of a document in this corpus, if stored
    pub fn metadata(&self, document: &Document) -> Result<Option<DocumentMetadata>> {
        self.check_owned(document)?;
        self.store.metadata(document)
    }

    /// Content and metadata of a stored document
    pub fn fetch(&self, document: &Document) -> Result<DocumentContent> {
        self.check_owned(document)?;
        self.store.fetch(document)
    }

    pub fn children(&self, document: &Document) -> Result<Vec<(Document, DocumentMetadata)>> {
        self.check_owned(document)?;
        self.store.children(document)
    }

    /// Commit the pending log to the index, clearing it on success
    pub fn update_index(&self) -> Result<usize> {
        let mut pending = self.lock_pending()?;
        if pending.is_empty() {
            return Ok(0);
        }

        let updates: Vec<DocumentSections> = pending.par_iter().map(prepare_sections).collect();
        self.index.apply(&updates)?;

        let committed = pending.len();
        pending.clear();
        tracing::info!(korpus = %self.korpus, changes = committed, "index updated");
        Ok(committed)
    }

    /// Rebuild this corpus's sections from stored content in bounded batches
    pub fn full_index(&self) -> Result<usize> {
        let mut pending = self.lock_pending()?;
        self.index.clear_corpus(&self.korpus)?;

        let documents: Vec<(Document, DocumentMetadata)> = self
            .store
            .list_corpus(&self.korpus)?
            .into_iter()
            .filter(|(_, metadata)| !metadata.is_folder())
            .collect();

        for batch in documents.chunks(self.settings.full_index_batch.max(1)) {
            let changes = batch
                .iter()
                .map(|(document, metadata)| {
                    Ok(PendingChange {
                        content: DocumentContent {
                            document: document.clone(),
                            kind: metadata.kind,
                            content: self.store.read_content(document)?,
                            label: Some(metadata.label.clone()),
                        },
                        metadata: metadata.clone(),
                        kind: ChangeKind::Create,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let updates: Vec<DocumentSections> = changes.par_iter().map(prepare_sections).collect();
            self.index.apply(&updates)?;
        }

        // Everything pending is covered by the rebuild.
        pending.clear();
        tracing::info!(korpus = %self.korpus, documents = documents.len(), "full index rebuilt");
        Ok(documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus(temp_dir: &TempDir) -> Corpus {
        let store = Arc::new(
            DocumentStore::open_at(
                &temp_dir.path().join("db").join("documents.redb"),
                &temp_dir.path().join("content"),
            )
            .unwrap(),
        );
        let index = Arc::new(SectionIndex::in_memory(&IndexSettings::default()).unwrap());
        Corpus::new("root", store, index, IndexSettings::default()).unwrap()
    }

    fn doc(path: &str) -> Document {
        Document::parse(path).unwrap()
    }

    #[test]
    fn test_create_makes_parent_folders() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);

        let metadata = corpus
            .create_document(DocumentContent::markdown(doc("/root/a/b/c.md"), "# C"))
            .unwrap();
        assert_eq!(metadata.label, "C");

        for folder in ["/root", "/root/a", "/root/a/b"] {
            assert!(corpus.metadata(&doc(folder)).unwrap().unwrap().is_folder());
        }
        // Three folders and the document.
        assert_eq!(corpus.pending_len().unwrap(), 4);
    }

    #[test]
    fn test_create_existing_fails_unless_folder() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        corpus
            .create_document(DocumentContent::markdown(doc("/root/x.md"), "x"))
            .unwrap();

        let again = corpus.create_document(DocumentContent::markdown(doc("/root/x.md"), "y"));
        assert!(matches!(again, Err(Error::AlreadyExists(_))));

        let folder = corpus
            .create_document(DocumentContent::folder(doc("/root")))
            .unwrap();
        assert!(folder.is_folder());
    }

    #[test]
    fn test_update_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        corpus
            .create_document(DocumentContent::markdown(doc("/root/x.md"), "one"))
            .unwrap();
        corpus.update_index().unwrap();
        let writes = corpus.store.durable_writes();

        corpus
            .update_document(DocumentContent::markdown(doc("/root/x.md"), "two"))
            .unwrap();
        corpus
            .update_document(DocumentContent::markdown(doc("/root/x.md"), "two"))
            .unwrap();

        assert_eq!(corpus.store.durable_writes(), writes + 1);
        assert_eq!(corpus.pending_len().unwrap(), 1);
    }

    #[test]
    fn test_update_missing_document() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        let result = corpus.update_document(DocumentContent::markdown(doc("/root/nope/x.md"), "x"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_folder_removes_descendants() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        corpus
            .create_document(DocumentContent::markdown(doc("/root/dir/a.md"), "a"))
            .unwrap();
        corpus
            .create_document(DocumentContent::markdown(doc("/root/dir/sub/b.md"), "b"))
            .unwrap();

        corpus.delete_document(&doc("/root/dir")).unwrap();
        assert!(corpus.metadata(&doc("/root/dir/sub/b.md")).unwrap().is_none());
        assert!(corpus.metadata(&doc("/root/dir")).unwrap().is_none());
        assert!(!corpus.store.content_path(&doc("/root/dir")).exists());
        assert_eq!(corpus.children(&doc("/root")).unwrap().len(), 0);
    }

    #[test]
    fn test_delete_restores_metadata_when_content_removal_fails() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        let target = doc("/root/x.md");
        corpus
            .create_document(DocumentContent::markdown(target.clone(), "x"))
            .unwrap();
        corpus.update_index().unwrap();

        // A non-empty directory where the content file should be.
        let path = corpus.store.content_path(&target);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir_all(path.join("blocker")).unwrap();

        assert!(corpus.delete_document(&target).is_err());
        assert!(corpus.metadata(&target).unwrap().is_some());
        assert_eq!(corpus.pending_len().unwrap(), 0);
    }

    #[test]
    fn test_update_properties_relabels() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        corpus
            .create_document(DocumentContent::markdown(doc("/root/x.md"), "# Old"))
            .unwrap();
        corpus.update_index().unwrap();

        let metadata = corpus
            .update_properties(DocumentProperties {
                document: doc("/root/x.md"),
                label: Some("New".to_string()),
                kind: None,
            })
            .unwrap();
        assert_eq!(metadata.label, "New");
        assert_eq!(corpus.pending_len().unwrap(), 1);
        assert_eq!(corpus.fetch(&doc("/root/x.md")).unwrap().content, "# Old");
    }

    #[test]
    fn test_prune_removes_only_empty_folders() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        corpus
            .create_document(DocumentContent::markdown(doc("/root/a/b/c.md"), "c"))
            .unwrap();
        corpus
            .create_document(DocumentContent::markdown(doc("/root/a/keep.md"), "k"))
            .unwrap();
        corpus.update_index().unwrap();

        corpus.delete_document(&doc("/root/a/b/c.md")).unwrap();
        assert_eq!(corpus.prune_empty_folders(&doc("/root/a/b")).unwrap(), 1);
        assert!(corpus.metadata(&doc("/root/a/b")).unwrap().is_none());
        assert!(corpus.metadata(&doc("/root/a")).unwrap().is_some());
        // The document delete and the folder delete.
        assert_eq!(corpus.pending_len().unwrap(), 2);

        corpus.delete_document(&doc("/root/a/keep.md")).unwrap();
        assert_eq!(corpus.prune_empty_folders(&doc("/root/a")).unwrap(), 1);
        assert!(corpus.metadata(&doc("/root/a")).unwrap().is_none());
        assert!(corpus.metadata(&doc("/root")).unwrap().unwrap().is_folder());
        assert!(corpus.store.list_corpus("root").unwrap().is_empty());

        assert_eq!(corpus.prune_empty_folders(&doc("/root")).unwrap(), 0);
    }

    #[test]
    fn test_resubmit_logs_without_writing() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        corpus
            .create_document(DocumentContent::markdown(doc("/root/x.md"), "# X"))
            .unwrap();
        corpus.update_index().unwrap();
        let writes = corpus.store.durable_writes();

        corpus.resubmit(&doc("/root/x.md")).unwrap();
        corpus.resubmit(&doc("/root/gone.md")).unwrap();
        assert_eq!(corpus.store.durable_writes(), writes);

        let pending = corpus.lock_pending().unwrap();
        assert_eq!(pending[0].kind, ChangeKind::Update);
        assert_eq!(pending[0].content.content, "# X");
        assert_eq!(pending[1].kind, ChangeKind::Delete);
        assert!(prepare_sections(&pending[1]).sections.is_empty());
    }

    #[test]
    fn test_store_fetch_handles_folders_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        corpus
            .create_document(DocumentContent::markdown(doc("/root/dir/x.md"), "# X\n\nbody"))
            .unwrap();

        let file = corpus.store.fetch(&doc("/root/dir/x.md")).unwrap();
        assert_eq!(file.content, "# X\n\nbody");
        assert_eq!(file.label.as_deref(), Some("X"));
        assert_eq!(corpus.fetch(&doc("/root/dir/x.md")).unwrap(), file);

        let folder = corpus.store.fetch(&doc("/root/dir")).unwrap();
        assert_eq!(folder.kind, DocumentType::Folder);
        assert!(folder.content.is_empty());

        let missing = corpus.store.fetch(&doc("/root/none.md"));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_other_corpus_paths_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = corpus(&temp_dir);
        let result = corpus.create_document(DocumentContent::markdown(doc("/other/x.md"), "x"));
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }
}
