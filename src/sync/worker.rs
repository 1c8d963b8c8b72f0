//! Incremental reconciliation of a corpus against an external source.
//!
//! Enumeration and diffing run up front; the resulting tasks execute under a
//! fixed-size semaphore. A monitor loop commits the index every
//! `commit_threshold` completions and once more at the end. The first task
//! failure cancels the run and is returned as-is.
//!
//! Tasks write to the corpus but never to the state table. Their state rows
//! are staged by the monitor and persisted only after an index commit that
//! covers them, so a run that fails leaves no row for a change the index has
//! not seen and the retry schedules that path again.

use crate::core::config::SyncSettings;
use crate::core::error::{Error, Result};
use crate::document::model::{Document, DocumentContent};
use crate::indexing::discovery::{ExternalSource, SourceUnit};
use crate::storage::corpus::Corpus;
use crate::storage::state::{StateChange, SyncState, SyncStateStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Work scheduled for one path
#[derive(Debug)]
pub enum SyncTask {
    /// Never seen before
    Create(SourceUnit),
    /// Seen before; rewritten only if the digest changed
    Update(SourceUnit, SyncState),
    /// Known path that vanished from the source
    Delete(String),
}

impl SyncTask {
    pub fn path(&self) -> &str {
        match self {
            SyncTask::Create(unit) | SyncTask::Update(unit, _) => &unit.relative_path,
            SyncTask::Delete(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

/// Counts from one reconciliation run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Index commits issued, interim and final
    pub commits: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Deleted => self.deleted += 1,
        }
    }

    /// Paths that caused corpus calls
    pub fn changed(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

fn task_error(e: impl std::fmt::Display) -> Error {
    Error::Task(e.to_string())
}

pub struct SyncWorker {
    corpus: Arc<Corpus>,
    state: Arc<SyncStateStore>,
    settings: SyncSettings,
}

impl SyncWorker {
    pub fn new(corpus: Arc<Corpus>, state: Arc<SyncStateStore>, settings: SyncSettings) -> Self {
        Self {
            corpus,
            state,
            settings,
        }
    }

    /// Diff enumerated units against the stored state.
    pub fn plan(&self, units: Vec<SourceUnit>) -> Result<Vec<SyncTask>> {
        let mut known = self.state.load(self.corpus.korpus())?;
        let mut tasks = Vec::with_capacity(units.len() + known.len());
        for unit in units {
            match known.remove(&unit.relative_path) {
                Some(previous) => tasks.push(SyncTask::Update(unit, previous)),
                None => tasks.push(SyncTask::Create(unit)),
            }
        }
        let mut vanished: Vec<String> = known.into_keys().collect();
        vanished.sort();
        tasks.extend(vanished.into_iter().map(SyncTask::Delete));
        Ok(tasks)
    }

    /// Reconcile the corpus with `source`.
    pub async fn run(&self, source: Arc<dyn ExternalSource>) -> Result<SyncReport> {
        let korpus = self.corpus.korpus().to_string();
        info!(korpus = %korpus, source = %source.describe(), "starting sync");

        let settings = self.settings.clone();
        let units = tokio::task::spawn_blocking(move || source.enumerate(&settings))
            .await
            .map_err(task_error)??;
        let plan = self.plan(units)?;
        debug!(korpus = %korpus, tasks = plan.len(), "planned sync tasks");

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for task in plan {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let completed = Arc::clone(&completed);
            let corpus = Arc::clone(&self.corpus);

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.map_err(task_error)?,
                    _ = cancel.cancelled() => return Ok(None),
                };
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                let path = task.path().to_string();
                let executed = tokio::task::spawn_blocking(move || execute(&corpus, task))
                    .await
                    .map_err(task_error)?;
                completed.fetch_add(1, Ordering::SeqCst);
                executed.map(Some).map_err(|e| Error::Sync {
                    path,
                    source: Box::new(e),
                })
            });
        }

        let threshold = self.settings.commit_threshold.max(1);
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.settings.poll_interval_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = SyncReport::default();
        let mut first_error: Option<Error> = None;
        let mut staged: Vec<StateChange> = Vec::new();
        let mut committed_at = 0usize;

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let result = joined.map_err(task_error).and_then(|r| r);
                    match result {
                        Ok(Some((outcome, change))) => {
                            report.record(outcome);
                            staged.extend(change);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            if first_error.is_none() {
                                error!(korpus = %korpus, error = %e, "sync task failed, cancelling run");
                                cancel.cancel();
                                first_error = Some(e);
                            }
                        }
                    }
                }
                _ = interval.tick() => {}
            }

            let done = completed.load(Ordering::SeqCst);
            if first_error.is_none() && done - committed_at >= threshold {
                committed_at = done;
                match self.commit(std::mem::take(&mut staged)).await {
                    Ok(changes) => {
                        report.commits += 1;
                        debug!(korpus = %korpus, completed = done, changes, "interim commit");
                    }
                    Err(e) => {
                        error!(korpus = %korpus, error = %e, "interim commit failed");
                        cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            debug!(korpus = %korpus, discarded = staged.len(), "dropping uncommitted state rows");
            return Err(e);
        }

        self.commit(staged).await?;
        report.commits += 1;
        info!(
            korpus = %korpus,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deleted = report.deleted,
            commits = report.commits,
            "sync finished"
        );
        Ok(report)
    }

    /// Commit the pending log, then persist the state rows it covers.
    async fn commit(&self, staged: Vec<StateChange>) -> Result<usize> {
        let corpus = Arc::clone(&self.corpus);
        let changes = tokio::task::spawn_blocking(move || corpus.update_index())
            .await
            .map_err(task_error)??;

        let state = Arc::clone(&self.state);
        let korpus = self.corpus.korpus().to_string();
        tokio::task::spawn_blocking(move || state.apply(&korpus, &staged))
            .await
            .map_err(task_error)??;
        Ok(changes)
    }
}

/// Bring the stored document in line with a unit's text.
fn store_unit(corpus: &Corpus, document: Document, text: String, digest: &str) -> Result<()> {
    match corpus.metadata(&document)? {
        // Written by an earlier run that never committed it.
        Some(existing) if existing.hash == digest => corpus.resubmit(&document),
        Some(_) => corpus
            .update_document(DocumentContent::markdown(document, text))
            .map(|_| ()),
        None => corpus
            .create_document(DocumentContent::markdown(document, text))
            .map(|_| ()),
    }
}

/// Apply one task to the corpus. The returned row change is persisted by
/// the caller once the change is committed.
fn execute(corpus: &Corpus, task: SyncTask) -> Result<(Outcome, Option<StateChange>)> {
    let korpus = corpus.korpus();
    match task {
        SyncTask::Create(unit) => {
            let (text, digest) = unit.load_with_digest()?;
            let document = Document::in_corpus(korpus, &unit.relative_path)?;
            store_unit(corpus, document, text, &digest)?;
            let change = StateChange::Upsert(SyncState::new(unit.relative_path, digest));
            Ok((Outcome::Created, Some(change)))
        }
        SyncTask::Update(unit, previous) => {
            let (text, digest) = unit.load_with_digest()?;
            if digest == previous.hash {
                return Ok((Outcome::Unchanged, None));
            }
            let document = Document::in_corpus(korpus, &unit.relative_path)?;
            store_unit(corpus, document, text, &digest)?;
            let change = StateChange::Upsert(SyncState::new(unit.relative_path, digest));
            Ok((Outcome::Updated, Some(change)))
        }
        SyncTask::Delete(path) => {
            let document = Document::in_corpus(korpus, &path)?;
            match corpus.delete_document(&document) {
                Ok(_) => {}
                // Deleted by an earlier run that never committed it.
                Err(Error::NotFound(_)) => corpus.resubmit(&document)?,
                Err(e) => return Err(e),
            }
            corpus.prune_empty_folders(&document.parent())?;
            Ok((Outcome::Deleted, Some(StateChange::Remove(path))))
        }
    }
}
