use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A document is addressed by a `/`-delimited path; the empty path is the tree root.
///
/// The first segment of a non-root path names the corpus ("korpus") the
/// document belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    path: String,
}

impl Document {
    /// The root of the document tree.
    pub fn root() -> Self {
        Self { path: String::new() }
    }

    /// Parse and normalize a document path.
    ///
    /// Empty segments are collapsed, a leading `/` is added, and `.`/`..`
    /// segments are rejected.
    pub fn parse(path: &str) -> Result<Self> {
        let mut normalized = String::with_capacity(path.len() + 1);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." || segment.contains('\\') {
                return Err(Error::InvalidPath(path.to_string()));
            }
            normalized.push('/');
            normalized.push_str(segment);
        }
        Ok(Self { path: normalized })
    }

    /// Build the path of `relative` inside corpus `korpus`.
    pub fn in_corpus(korpus: &str, relative: &str) -> Result<Self> {
        if korpus.is_empty() || korpus.contains('/') {
            return Err(Error::InvalidPath(format!("invalid corpus name '{}'", korpus)));
        }
        Self::parse(&format!("/{}/{}", korpus, relative))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// The path with its last segment removed. The root is its own parent.
    pub fn parent(&self) -> Document {
        match self.path.rfind('/') {
            Some(idx) => Document {
                path: self.path[..idx].to_string(),
            },
            None => Document::root(),
        }
    }

    /// The tenant id: the first non-empty segment.
    pub fn korpus(&self) -> Option<&str> {
        self.segments().next()
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.segments().last().unwrap_or("")
    }

    /// Lowercased extension of the last segment, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        name.rfind('.')
            .filter(|idx| *idx > 0)
            .map(|idx| name[idx + 1..].to_lowercase())
    }

    /// Path relative to the corpus folder (no korpus segment, no leading `/`).
    pub fn relative_path(&self) -> String {
        self.segments().skip(1).collect::<Vec<_>>().join("/")
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Document) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.path.len() > ancestor.path.len()
            && self.path.starts_with(&ancestor.path)
            && self.path.as_bytes()[ancestor.path.len()] == b'/'
    }

    pub fn join(&self, segment: &str) -> Result<Document> {
        Document::parse(&format!("{}/{}", self.path, segment))
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.path)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Folder,
    Markdown,
    Chat,
}

/// Stored per-document metadata. `hash` is the dirty-check oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(rename = "type")]
    pub kind: DocumentType,
    pub hash: String,
    pub label: String,
}

impl DocumentMetadata {
    pub fn folder(label: impl Into<String>) -> Self {
        Self {
            kind: DocumentType::Folder,
            hash: String::new(),
            label: label.into(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == DocumentType::Folder
    }
}

/// A document together with its full content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContent {
    pub document: Document,
    pub kind: DocumentType,
    pub content: String,
    /// Explicit label; derived from the content when absent.
    pub label: Option<String>,
}

impl DocumentContent {
    pub fn markdown(document: Document, content: impl Into<String>) -> Self {
        Self {
            document,
            kind: DocumentType::Markdown,
            content: content.into(),
            label: None,
        }
    }

    pub fn folder(document: Document) -> Self {
        Self {
            document,
            kind: DocumentType::Folder,
            content: String::new(),
            label: None,
        }
    }
}

/// Metadata-only update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentProperties {
    pub document: Document,
    pub label: Option<String>,
    pub kind: Option<DocumentType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One entry of a corpus's pending log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub content: DocumentContent,
    pub metadata: DocumentMetadata,
    pub kind: ChangeKind,
}
