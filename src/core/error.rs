use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A builder scope was closed out of order.
    #[error("Builder stack corrupted: expected {expected}, found {found}")]
    StackCorruption { expected: String, found: String },

    /// The parse produced a tree that violates the node model.
    #[error("Malformed document structure: {0}")]
    Structure(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Sync failed for {path}: {source}")]
    Sync {
        path: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps a storage-layer error into [`Error::Database`] with context.
pub(crate) fn db_err<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(format!("{}: {}", what, e))
}
