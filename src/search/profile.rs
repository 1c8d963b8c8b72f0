use crate::core::config::Config;
use crate::core::error::{Error, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// A named visibility scope: the corpora a query may return documents from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub corpora: Vec<String>,
}

impl Profile {
    /// An unnamed profile over an explicit corpus list
    pub fn adhoc(corpora: Vec<String>) -> Self {
        Self {
            name: String::new(),
            corpora,
        }
    }
}

/// Resolves profile names to their enabled corpora
pub trait ProfileSource: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Profile>;
}

impl ProfileSource for Config {
    fn resolve(&self, name: &str) -> Result<Profile> {
        let settings = self
            .profiles
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("profile '{}'", name)))?;
        // Keep order, drop repeats.
        let mut corpora: Vec<String> = Vec::with_capacity(settings.corpora.len());
        for korpus in &settings.corpora {
            if !corpora.contains(korpus) {
                corpora.push(korpus.clone());
            }
        }
        Ok(Profile {
            name: name.to_string(),
            corpora,
        })
    }
}

/// Capacity-bounded cache of resolved profiles
pub struct ProfileCache {
    source: Arc<dyn ProfileSource>,
    cache: Mutex<LruCache<String, Arc<Profile>>>,
}

impl ProfileCache {
    pub fn new(source: Arc<dyn ProfileSource>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Arc<Profile>>>> {
        self.cache
            .lock()
            .map_err(|e| Error::Database(format!("Profile cache lock poisoned: {}", e)))
    }

    /// Cached profile, resolving and inserting it on a miss
    pub fn get(&self, name: &str) -> Result<Arc<Profile>> {
        if let Some(profile) = self.lock()?.get(name) {
            return Ok(Arc::clone(profile));
        }
        let profile = Arc::new(self.source.resolve(name)?);
        self.lock()?.put(name.to_string(), Arc::clone(&profile));
        tracing::debug!(profile = name, corpora = profile.corpora.len(), "resolved profile");
        Ok(profile)
    }

    /// Drop one cached profile so the next lookup re-resolves it
    pub fn invalidate(&self, name: &str) -> Result<()> {
        self.lock()?.pop(name);
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl ProfileSource for CountingSource {
        fn resolve(&self, name: &str) -> Result<Profile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if name == "missing" {
                return Err(Error::NotFound(name.to_string()));
            }
            Ok(Profile {
                name: name.to_string(),
                corpora: vec![format!("{}-corpus", name)],
            })
        }
    }

    #[test]
    fn test_cache_hits_and_evicts() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = ProfileCache::new(source.clone(), 2);

        cache.get("a").unwrap();
        cache.get("a").unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cache.get("b").unwrap();
        cache.get("c").unwrap();
        assert_eq!(cache.len().unwrap(), 2);

        // "a" was least recently used and got evicted.
        cache.get("a").unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_invalidate_forces_resolve() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = ProfileCache::new(source.clone(), 4);
        cache.get("a").unwrap();
        cache.invalidate("a").unwrap();
        cache.get("a").unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(cache.get("missing").is_err());
    }

    #[test]
    fn test_config_profiles() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();
        config.profiles.insert(
            "work".to_string(),
            crate::core::config::ProfileSettings {
                corpora: vec!["docs".to_string(), "wiki".to_string(), "docs".to_string()],
            },
        );
        let profile = config.resolve("work").unwrap();
        assert_eq!(profile.corpora, vec!["docs", "wiki"]);
        assert!(matches!(config.resolve("home"), Err(Error::NotFound(_))));
    }
}
