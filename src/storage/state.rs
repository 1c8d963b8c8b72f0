use crate::core::error::{db_err, Error, Result};
use redb::{Database, ReadableTable, TableDefinition, TableError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

/// Prefix of the per-corpus state tables
const STATE_TABLE_PREFIX: &str = "sync_state";

/// Last synchronized state of one external path
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncState {
    /// Path relative to the source root
    pub path: String,
    /// SHA256 digest of the content at last sync
    pub hash: String,
    /// Unix timestamp of the last sync
    pub synced_at: u64,
}

impl SyncState {
    pub fn new(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            synced_at: SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Database(format!("Failed to serialize sync state: {}", e)))
    }

    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Database(format!("Failed to deserialize sync state: {}", e)))
    }
}

/// A row change produced by one sync task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Upsert(SyncState),
    Remove(String),
}

/// Per-corpus sync state, one redb table per corpus
pub struct SyncStateStore {
    db: Database,
}

impl SyncStateStore {
    /// Open or create the state store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path.exists() {
            Database::open(path).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("lock") {
                    Error::Database("State database is locked. Another imdex process may be running. Close other instances and try again.".to_string())
                } else {
                    Error::Database(format!("Failed to open state database: {}", e))
                }
            })?
        } else {
            Database::create(path)
                .map_err(|e| Error::Database(format!("Failed to create state database: {}", e)))?
        };

        Ok(Self { db })
    }

    fn table_name(korpus: &str) -> String {
        format!("{}/{}", STATE_TABLE_PREFIX, korpus)
    }

    /// All rows for `korpus`, keyed by path. A corpus never synced has none.
    pub fn load(&self, korpus: &str) -> Result<HashMap<String, SyncState>> {
        let name = Self::table_name(korpus);
        let definition: TableDefinition<&str, &str> = TableDefinition::new(&name);

        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = match read_txn.open_table(definition) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(HashMap::new()),
            Err(e) => return Err(Error::Database(format!("Failed to open table: {}", e))),
        };

        let mut rows = HashMap::new();
        for entry in table.iter().map_err(db_err("Failed to iterate sync state"))? {
            let (key, value) = entry.map_err(db_err("Failed to read sync state"))?;
            let state = SyncState::from_json(value.value())?;
            rows.insert(key.value().to_string(), state);
        }
        Ok(rows)
    }

    /// Apply a batch of row changes in one transaction.
    /// Removing a missing row is not an error.
    pub fn apply(&self, korpus: &str, changes: &[StateChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let name = Self::table_name(korpus);
        let definition: TableDefinition<&str, &str> = TableDefinition::new(&name);

        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            let mut table = write_txn
                .open_table(definition)
                .map_err(db_err("Failed to open table"))?;
            for change in changes {
                match change {
                    StateChange::Upsert(state) => {
                        let json = state.to_json()?;
                        table
                            .insert(state.path.as_str(), json.as_str())
                            .map_err(db_err("Failed to insert sync state"))?;
                    }
                    StateChange::Remove(path) => {
                        table
                            .remove(path.as_str())
                            .map_err(db_err("Failed to remove sync state"))?;
                    }
                }
            }
        }
        write_txn
            .commit()
            .map_err(db_err("Failed to commit transaction"))?;
        Ok(())
    }
}

/// SHA256 hex digest of text content
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> SyncStateStore {
        SyncStateStore::open(&temp_dir.path().join("state").join("state.redb")).unwrap()
    }

    #[test]
    fn test_sync_state_serialization() {
        let state = SyncState::new("notes/a.md", "abc123");
        let json = state.to_json().unwrap();
        assert!(json.contains("abc123"));
        assert_eq!(SyncState::from_json(&json).unwrap(), state);
        assert!(state.synced_at > 0);
    }

    #[test]
    fn test_unknown_corpus_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        assert!(store.load("never").unwrap().is_empty());
    }

    #[test]
    fn test_rows_are_scoped_per_corpus() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store
            .apply(
                "docs",
                &[
                    StateChange::Upsert(SyncState::new("a.md", "h1")),
                    StateChange::Upsert(SyncState::new("b.md", "h2")),
                ],
            )
            .unwrap();
        store
            .apply("wiki", &[StateChange::Upsert(SyncState::new("a.md", "h3"))])
            .unwrap();

        let docs = store.load("docs").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs["a.md"].hash, "h1");
        assert_eq!(store.load("wiki").unwrap()["a.md"].hash, "h3");

        store
            .apply("docs", &[StateChange::Upsert(SyncState::new("a.md", "h4"))])
            .unwrap();
        assert_eq!(store.load("docs").unwrap()["a.md"].hash, "h4");

        store
            .apply(
                "docs",
                &[
                    StateChange::Remove("a.md".to_string()),
                    StateChange::Remove("missing.md".to_string()),
                ],
            )
            .unwrap();
        assert_eq!(store.load("docs").unwrap().len(), 1);
        assert_eq!(store.load("wiki").unwrap().len(), 1);

        store.apply("never", &[]).unwrap();
        assert!(store.load("never").unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir);
            store
                .apply("docs", &[StateChange::Upsert(SyncState::new("a.md", "h1"))])
                .unwrap();
        }
        let store = open_store(&temp_dir);
        assert_eq!(store.load("docs").unwrap().len(), 1);
    }

    #[test]
    fn test_content_digest() {
        let digest = content_digest("Hello, world!");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, content_digest("Hello, world!"));
        assert_ne!(content_digest("a"), content_digest("b"));
    }
}
