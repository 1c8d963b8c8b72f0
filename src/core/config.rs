use super::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the optional overrides file inside the base directory.
pub const CONFIG_FILE_NAME: &str = "imdex.toml";

/// Settings for the reconciliation worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Maximum number of reconciliation tasks running at once.
    pub concurrency: usize,
    /// Completed tasks between interim index commits.
    pub commit_threshold: usize,
    /// How often the progress monitor polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// File extensions eligible for synchronization (lowercase, no dot).
    pub extensions: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            commit_threshold: 500,
            poll_interval_ms: 200,
            extensions: vec!["md".to_string(), "markdown".to_string(), "txt".to_string()],
        }
    }
}

impl SyncSettings {
    /// Check whether a path passes the extension filter.
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}

/// Settings for the full-text index writer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub writer_heap_bytes: usize,
    pub writer_threads: usize,
    /// Documents re-submitted per commit during a full rebuild.
    pub full_index_batch: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            writer_heap_bytes: 64 * 1024 * 1024,
            writer_threads: 2,
            full_index_batch: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileSettings {
    #[serde(default)]
    pub corpora: Vec<String>,
}

/// Shape of `imdex.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    sync: SyncSettings,
    index: IndexSettings,
    profiles: BTreeMap<String, ProfileSettings>,
    profile_cache_capacity: Option<usize>,
}

/// Configuration for imdex
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for imdex data
    pub base_dir: PathBuf,
    /// Directory for the document metadata database
    pub database_dir: PathBuf,
    /// Directory holding document content, one file per document
    pub content_dir: PathBuf,
    /// Directory for the full-text index
    pub index_dir: PathBuf,
    /// Path to the sync state store
    pub state_path: PathBuf,
    pub sync: SyncSettings,
    pub index: IndexSettings,
    /// Named profiles and the corpora each one enables
    pub profiles: BTreeMap<String, ProfileSettings>,
    pub profile_cache_capacity: usize,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".imdex"))
    }

    /// Create a new configuration, applying `imdex.toml` overrides if present
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.unwrap_or_else(|| {
            Self::default_base_dir().unwrap_or_else(|_| PathBuf::from(".imdex"))
        });

        let file_config = Self::read_file_config(&base_dir.join(CONFIG_FILE_NAME))?;

        Ok(Self {
            database_dir: base_dir.join("database"),
            content_dir: base_dir.join("content"),
            index_dir: base_dir.join("index"),
            state_path: base_dir.join("state").join("state.redb"),
            base_dir,
            sync: file_config.sync,
            index: file_config.index,
            profiles: file_config.profiles,
            profile_cache_capacity: file_config.profile_cache_capacity.unwrap_or(32),
        })
    }

    fn read_file_config(path: &Path) -> Result<FileConfig> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let parsed: FileConfig = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", path.display(), e)))?;

        if parsed.sync.concurrency == 0 {
            return Err(Error::Config("sync.concurrency must be at least 1".to_string()));
        }
        if parsed.index.full_index_batch == 0 {
            return Err(Error::Config("index.full_index_batch must be at least 1".to_string()));
        }
        Ok(parsed)
    }

    /// Initialize the configuration directories
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.database_dir)?;
        std::fs::create_dir_all(&self.content_dir)?;
        std::fs::create_dir_all(&self.index_dir)?;
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.exists() && self.database_dir.exists() && self.index_dir.exists()
    }
}
