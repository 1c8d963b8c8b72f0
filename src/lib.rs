// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
}

// Document model and node trees
pub mod document {
    pub mod builder;
    pub mod model;
    pub mod node;
}

// Parsing, section extraction and source enumeration
pub mod indexing {
    pub mod discovery;
    pub mod parser;
    pub mod sections;
}

// Data storage
pub mod storage {
    pub mod corpus;
    pub mod index;
    pub mod state;
}

// Query serving
pub mod search {
    pub mod profile;
    pub mod query;
}

// Reconciliation against external sources
pub mod sync {
    pub mod worker;
}

pub mod engine;

// User interfaces
pub mod ui {
    pub mod cli;
    pub mod watch;
}

// Re-export commonly used types
pub use core::config::Config;
pub use core::error::{Error, Result};
pub use document::model::{Document, DocumentContent, DocumentMetadata, DocumentType};
pub use document::node::{ImdexNode, ImdexSpan, NodeType, SpanStyle};
pub use engine::Engine;
pub use indexing::discovery::{ArchiveSource, DirectorySource, ExternalSource, SourceUnit};
pub use indexing::parser;
pub use search::profile::Profile;
pub use search::query::{DocumentLink, DocumentSectionContent, QueryEngine};
pub use storage::corpus::{Corpus, DocumentStore};
pub use storage::index::SectionIndex;
pub use storage::state::{StateChange, SyncState, SyncStateStore};
pub use sync::worker::{SyncReport, SyncWorker};
pub use ui::cli::Cli;
pub use ui::watch::SourceWatcher;
