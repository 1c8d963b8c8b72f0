use clap::{Parser, Subcommand};

/// imdex - Markdown corpus indexing and section search
#[derive(Parser, Debug)]
#[command(name = "imdex")]
#[command(about = "Ingests Markdown corpora and serves section-level full-text search", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.imdex)
    #[arg(long, global = true)]
    pub base_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directories
    Init,
    /// Reconcile a corpus with a directory or a zip archive
    Sync {
        /// Corpus name
        korpus: String,
        /// Directory, or archive with --archive
        path: String,
        /// Treat the path as a zip archive
        #[arg(short, long)]
        archive: bool,
    },
    /// Commit pending changes, or rebuild a corpus's index with --full
    Index {
        /// Corpus name
        korpus: String,
        /// Rebuild every section from stored content
        #[arg(short, long)]
        full: bool,
    },
    /// Search indexed sections
    Search {
        /// Query text; the last word matches as a prefix
        query: String,
        /// Named profile from imdex.toml
        #[arg(short, long, conflicts_with = "corpus")]
        profile: Option<String>,
        /// Corpus to search (repeatable; default: all corpora)
        #[arg(short, long)]
        corpus: Vec<String>,
        /// Maximum number of results to return
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Watch a directory and re-sync the corpus on changes
    Watch {
        /// Corpus name
        korpus: String,
        /// Directory to watch
        path: String,
    },
    /// Print a stored document, or list a folder's children
    Show {
        /// Document path, e.g. /notes/guide.md
        document: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_arguments() {
        let cli = Cli::try_parse_from(["imdex", "search", "hello wor", "-c", "docs", "-c", "wiki"])
            .unwrap();
        match cli.command {
            Commands::Search {
                query,
                profile,
                corpus,
                limit,
            } => {
                assert_eq!(query, "hello wor");
                assert!(profile.is_none());
                assert_eq!(corpus, vec!["docs", "wiki"]);
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_profile_conflicts_with_corpus() {
        let result = Cli::try_parse_from(["imdex", "search", "x", "-p", "work", "-c", "docs"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_base_dir() {
        let cli =
            Cli::try_parse_from(["imdex", "sync", "docs", "/tmp/notes", "--base-dir", "/tmp/b"])
                .unwrap();
        assert_eq!(cli.base_dir.as_deref(), Some("/tmp/b"));
        assert!(matches!(cli.command, Commands::Sync { archive: false, .. }));
    }
}
