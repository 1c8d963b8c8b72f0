use crate::core::config::SyncSettings;
use crate::core::error::{Error, Result};
use crate::engine::Engine;
use crate::indexing::discovery::{DirectorySource, ExternalSource};
use notify_debouncer_full::{
    new_debouncer,
    notify::{RecursiveMode, Watcher},
    DebounceEventResult,
};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Quiet period before a batch of file events triggers a sync
const DEBOUNCE: Duration = Duration::from_secs(2);

/// Keeps a corpus in step with a directory by re-running sync on changes
pub struct SourceWatcher {
    root_path: PathBuf,
    korpus: String,
    engine: Arc<Engine>,
}

impl SourceWatcher {
    pub fn new(root_path: &Path, korpus: &str, engine: Arc<Engine>) -> Result<Self> {
        if !root_path.is_dir() {
            return Err(Error::InvalidPath(format!(
                "{} is not a directory",
                root_path.display()
            )));
        }
        Ok(Self {
            root_path: root_path.to_path_buf(),
            korpus: korpus.to_string(),
            engine,
        })
    }

    /// Sync once, then again after every debounced batch that touches an
    /// eligible path. Returns when `cancel` fires.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        self.sync_once().await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> =
                        events.into_iter().flat_map(|event| event.paths.clone()).collect();
                    let _ = tx.send(paths);
                }
                Err(errors) => {
                    for e in errors {
                        tracing::warn!(error = %e, "watch error");
                    }
                }
            }
        })
        .map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to create file watcher: {}", e),
            ))
        })?;

        debouncer
            .watcher()
            .watch(&self.root_path, RecursiveMode::Recursive)
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to watch directory: {}", e),
                ))
            })?;
        tracing::info!(korpus = %self.korpus, root = %self.root_path.display(), "watching for changes");

        let settings = self.engine.config().sync.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => {
                    let Some(paths) = received else { break };
                    if !paths.iter().any(|p| is_relevant(&self.root_path, &settings, p)) {
                        continue;
                    }
                    // A failed run is retried on the next change.
                    if let Err(e) = self.sync_once().await {
                        tracing::error!(korpus = %self.korpus, error = %e, "sync after change failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn sync_once(&self) -> Result<()> {
        let worker = self.engine.sync_worker(&self.korpus)?;
        let source: Arc<dyn ExternalSource> = Arc::new(DirectorySource::new(&self.root_path));
        let report = worker.run(source).await?;
        if report.changed() > 0 {
            tracing::info!(
                korpus = %self.korpus,
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                "corpus updated"
            );
        }
        Ok(())
    }
}

/// Whether a changed path can affect the synced corpus.
fn is_relevant(root: &Path, settings: &SyncSettings, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let hidden = relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    });
    if hidden {
        return false;
    }
    // Removed folders carry no extension.
    settings.accepts(path) || !path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_relevant() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let settings = SyncSettings::default();
        std::fs::write(root.join("notes.md"), "# Notes").unwrap();
        std::fs::write(root.join("image.png"), [0u8; 4]).unwrap();

        assert!(is_relevant(root, &settings, &root.join("notes.md")));
        assert!(!is_relevant(root, &settings, &root.join("image.png")));
        assert!(!is_relevant(root, &settings, &root.join(".git").join("HEAD")));
        assert!(!is_relevant(root, &settings, Path::new("/elsewhere/notes.md")));
        assert!(is_relevant(root, &settings, &root.join("removed-folder")));
    }

    #[test]
    fn test_new_rejects_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config = crate::core::config::Config::new(Some(temp_dir.path().join("base"))).unwrap();
        let engine = Arc::new(Engine::open(config).unwrap());
        let missing = temp_dir.path().join("missing");
        assert!(SourceWatcher::new(&missing, "docs", engine).is_err());
    }
}
