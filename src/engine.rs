use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::search::profile::{Profile, ProfileCache, ProfileSource};
use crate::search::query::QueryEngine;
use crate::storage::corpus::{Corpus, DocumentStore};
use crate::storage::index::SectionIndex;
use crate::storage::state::SyncStateStore;
use crate::sync::worker::SyncWorker;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Owns the shared stores and hands out per-corpus handles
pub struct Engine {
    config: Config,
    store: Arc<DocumentStore>,
    index: Arc<SectionIndex>,
    state: Arc<SyncStateStore>,
    corpora: Mutex<HashMap<String, Arc<Corpus>>>,
    profiles: ProfileCache,
}

impl Engine {
    /// Open every store under `config`, creating directories as needed
    pub fn open(config: Config) -> Result<Self> {
        config.init()?;
        let store = Arc::new(DocumentStore::open(&config)?);
        let index = Arc::new(SectionIndex::open(&config.index_dir, &config.index)?);
        let state = Arc::new(SyncStateStore::open(&config.state_path)?);
        let source: Arc<dyn ProfileSource> = Arc::new(config.clone());
        let profiles = ProfileCache::new(source, config.profile_cache_capacity);

        tracing::debug!(base_dir = %config.base_dir.display(), "engine opened");
        Ok(Self {
            config,
            store,
            index,
            state,
            corpora: Mutex::new(HashMap::new()),
            profiles,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn sync_state(&self) -> &Arc<SyncStateStore> {
        &self.state
    }

    /// The handle for `korpus`; one instance per corpus so its pending log
    /// is shared by every caller.
    pub fn corpus(&self, korpus: &str) -> Result<Arc<Corpus>> {
        let mut corpora = self
            .corpora
            .lock()
            .map_err(|e| Error::Database(format!("Corpus registry lock poisoned: {}", e)))?;
        if let Some(corpus) = corpora.get(korpus) {
            return Ok(Arc::clone(corpus));
        }
        let corpus = Arc::new(Corpus::new(
            korpus,
            Arc::clone(&self.store),
            Arc::clone(&self.index),
            self.config.index.clone(),
        )?);
        corpora.insert(korpus.to_string(), Arc::clone(&corpus));
        Ok(corpus)
    }

    pub fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(Arc::clone(&self.store), Arc::clone(&self.index))
    }

    pub fn sync_worker(&self, korpus: &str) -> Result<SyncWorker> {
        Ok(SyncWorker::new(
            self.corpus(korpus)?,
            Arc::clone(&self.state),
            self.config.sync.clone(),
        ))
    }

    /// Resolve a configured profile by name
    pub fn profile(&self, name: &str) -> Result<Arc<Profile>> {
        self.profiles.get(name)
    }

    /// A profile over every stored corpus
    pub fn all_corpora_profile(&self) -> Result<Profile> {
        Ok(Profile::adhoc(self.store.list_corpora()?))
    }
}
