use imdex::{
    ArchiveSource, Config, DirectorySource, Document, Engine, Error, ExternalSource, Profile,
    Result,
};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn engine(temp_dir: &TempDir) -> Result<Engine> {
    let config = Config::new(Some(temp_dir.path().join("imdex")))?;
    Engine::open(config)
}

fn directory(root: &Path) -> Arc<dyn ExternalSource> {
    Arc::new(DirectorySource::new(root))
}

/// Every document of the corpus, folders marked with a trailing `/`.
fn listed(engine: &Engine, korpus: &str) -> Result<Vec<String>> {
    Ok(engine
        .store()
        .list_corpus(korpus)?
        .into_iter()
        .map(|(document, metadata)| {
            let marker = if metadata.is_folder() { "/" } else { "" };
            format!("{}{}", document.relative_path(), marker)
        })
        .collect())
}

fn state_paths(engine: &Engine, korpus: &str) -> Result<Vec<String>> {
    let mut paths: Vec<String> = engine.sync_state().load(korpus)?.into_keys().collect();
    paths.sort();
    Ok(paths)
}

#[tokio::test]
async fn test_sync_tracks_source_changes() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir)?;
    let notes = temp_dir.path().join("notes");
    fs::create_dir_all(notes.join("sub"))?;
    fs::create_dir_all(notes.join("old"))?;
    fs::write(notes.join("a.md"), "# A\n\nalpha text")?;
    fs::write(notes.join("sub/b.md"), "# B\n\nbeta text")?;
    fs::write(notes.join("old/d.md"), "# D\n\nepsilon text")?;

    let worker = engine.sync_worker("docs")?;
    let first = worker.run(directory(&notes)).await?;
    assert_eq!(first.created, 3);
    assert_eq!(
        listed(&engine, "docs")?,
        vec!["a.md", "old/", "old/d.md", "sub/", "sub/b.md"]
    );

    fs::remove_file(notes.join("a.md"))?;
    fs::remove_dir_all(notes.join("old"))?;
    fs::write(notes.join("sub/b.md"), "# B\n\ngamma text")?;
    fs::write(notes.join("c.md"), "# C\n\ndelta text")?;

    let second = worker.run(directory(&notes)).await?;
    assert_eq!(
        (second.created, second.updated, second.deleted, second.unchanged),
        (1, 1, 2, 0)
    );
    // The emptied folder goes with its last document.
    assert_eq!(listed(&engine, "docs")?, vec!["c.md", "sub/", "sub/b.md"]);
    assert_eq!(state_paths(&engine, "docs")?, vec!["c.md", "sub/b.md"]);

    let content = engine
        .query_engine()
        .fetch(&Document::in_corpus("docs", "sub/b.md")?)?;
    assert_eq!(content.content, "# B\n\ngamma text");

    // Search reflects the reconciled state once the run returns.
    let profile = Profile::adhoc(vec!["docs".to_string()]);
    let queries = engine.query_engine();
    assert!(queries.query(&profile, "alpha", 10)?.is_empty());
    assert!(queries.query(&profile, "beta", 10)?.is_empty());
    assert!(queries.query(&profile, "epsilon", 10)?.is_empty());
    assert!(!queries.query(&profile, "gamma", 10)?.is_empty());
    assert!(!queries.query(&profile, "delta", 10)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unchanged_source_writes_nothing() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir)?;
    let notes = temp_dir.path().join("notes");
    fs::create_dir_all(&notes)?;
    fs::write(notes.join("a.md"), "stable")?;
    fs::write(notes.join("b.md"), "also stable")?;

    let worker = engine.sync_worker("docs")?;
    worker.run(directory(&notes)).await?;
    let writes = engine.store().durable_writes();

    let again = worker.run(directory(&notes)).await?;
    assert_eq!(again.unchanged, 2);
    assert_eq!(again.changed(), 0);
    assert_eq!(engine.store().durable_writes(), writes);
    Ok(())
}

#[tokio::test]
async fn test_sync_from_archive() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir)?;
    let archive_path = temp_dir.path().join("snapshot.zip");
    {
        let file = fs::File::create(&archive_path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("project-main/README.md", options).unwrap();
        zip.write_all(b"# Project\n\nInstallation notes")?;
        zip.start_file("project-main/docs/usage.md", options).unwrap();
        zip.write_all(b"Usage details")?;
        zip.finish().unwrap();
    }

    let report = engine
        .sync_worker("project")?
        .run(Arc::new(ArchiveSource::new(&archive_path)))
        .await?;
    assert_eq!(report.created, 2);
    assert_eq!(
        listed(&engine, "project")?,
        vec!["README.md", "docs/", "docs/usage.md"]
    );

    let profile = Profile::adhoc(vec!["project".to_string()]);
    let results = engine.query_engine().query(&profile, "install", 10)?;
    assert!(results
        .iter()
        .any(|r| r.document == Document::in_corpus("project", "README.md").unwrap()));
    Ok(())
}

#[tokio::test]
async fn test_failing_unit_aborts_run() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir)?;
    let notes = temp_dir.path().join("notes");
    fs::create_dir_all(&notes)?;
    fs::write(notes.join("good.md"), "fine")?;
    fs::write(notes.join("bad.md"), [0xffu8, 0xfe, 0xfd])?;

    let result = engine.sync_worker("docs")?.run(directory(&notes)).await;
    match result {
        Err(Error::Sync { path, .. }) => assert_eq!(path, "bad.md"),
        other => panic!("expected a sync failure, got {:?}", other),
    }

    // Once the bad unit is fixed the next run completes.
    fs::write(notes.join("bad.md"), "repaired")?;
    engine.sync_worker("docs")?.run(directory(&notes)).await?;
    assert_eq!(listed(&engine, "docs")?, vec!["bad.md", "good.md"]);
    assert_eq!(state_paths(&engine, "docs")?, vec!["bad.md", "good.md"]);
    Ok(())
}

#[tokio::test]
async fn test_retry_in_new_process_indexes_earlier_writes() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let notes = temp_dir.path().join("notes");
    fs::create_dir_all(&notes)?;
    fs::write(notes.join("good.md"), "wombat burrow")?;
    fs::write(notes.join("bad.md"), [0xffu8, 0xfe, 0xfd])?;

    {
        let engine = engine(&temp_dir)?;
        let result = engine.sync_worker("docs")?.run(directory(&notes)).await;
        assert!(matches!(result, Err(Error::Sync { .. })));
        // Nothing was committed, so no row claims otherwise.
        assert!(state_paths(&engine, "docs")?.is_empty());
    }

    fs::write(notes.join("bad.md"), "repaired")?;
    let engine = engine(&temp_dir)?;
    let report = engine.sync_worker("docs")?.run(directory(&notes)).await?;
    assert_eq!(report.created, 2);
    assert_eq!(listed(&engine, "docs")?, vec!["bad.md", "good.md"]);
    assert_eq!(state_paths(&engine, "docs")?, vec!["bad.md", "good.md"]);

    let profile = Profile::adhoc(vec!["docs".to_string()]);
    let hits = engine.query_engine().query(&profile, "wombat", 10)?;
    assert!(hits
        .iter()
        .any(|r| r.document == Document::in_corpus("docs", "good.md").unwrap()));
    Ok(())
}

#[tokio::test]
async fn test_retry_in_new_process_applies_updates_and_deletes() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let notes = temp_dir.path().join("notes");
    fs::create_dir_all(&notes)?;
    fs::write(notes.join("gone.md"), "platypus")?;
    fs::write(notes.join("edited.md"), "koala")?;

    let profile = Profile::adhoc(vec!["docs".to_string()]);
    {
        let engine = engine(&temp_dir)?;
        engine.sync_worker("docs")?.run(directory(&notes)).await?;

        // These changes may reach the store, but the run fails before committing them.
        fs::remove_file(notes.join("gone.md"))?;
        fs::write(notes.join("edited.md"), "dingo")?;
        fs::write(notes.join("bad.md"), [0xffu8, 0xfe])?;
        let result = engine.sync_worker("docs")?.run(directory(&notes)).await;
        assert!(result.is_err());
    }

    fs::remove_file(notes.join("bad.md"))?;
    let engine = engine(&temp_dir)?;
    engine.sync_worker("docs")?.run(directory(&notes)).await?;
    assert_eq!(listed(&engine, "docs")?, vec!["edited.md"]);
    assert_eq!(state_paths(&engine, "docs")?, vec!["edited.md"]);

    let queries = engine.query_engine();
    assert!(queries.query(&profile, "platypus", 10)?.is_empty());
    assert!(queries.query(&profile, "koala", 10)?.is_empty());
    assert!(!queries.query(&profile, "dingo", 10)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_non_utf8_archive_member_aborts_run() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir)?;
    let archive_path = temp_dir.path().join("snapshot.zip");
    {
        let file = fs::File::create(&archive_path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("ok.md", options).unwrap();
        zip.write_all(b"fine")?;
        zip.start_file("broken.md", options).unwrap();
        zip.write_all(&[0xff, 0xfe])?;
        zip.finish().unwrap();
    }

    let result = engine
        .sync_worker("project")?
        .run(Arc::new(ArchiveSource::new(&archive_path)))
        .await;
    match result {
        Err(Error::Sync { path, .. }) => assert_eq!(path, "broken.md"),
        other => panic!("expected a sync failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_interim_commits_with_small_threshold() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("imdex");
    fs::create_dir_all(&base)?;
    fs::write(
        base.join("imdex.toml"),
        "[sync]\nconcurrency = 2\ncommit_threshold = 1\npoll_interval_ms = 1\n",
    )?;
    let engine = Engine::open(Config::new(Some(base))?)?;

    let notes = temp_dir.path().join("notes");
    fs::create_dir_all(&notes)?;
    for i in 0..40 {
        fs::write(notes.join(format!("n{:02}.md", i)), format!("note number {}", i))?;
    }

    let report = engine.sync_worker("docs")?.run(directory(&notes)).await?;
    assert_eq!(report.created, 40);
    // At least one interim commit before the final one.
    assert!(report.commits > 1);
    assert_eq!(engine.corpus("docs")?.pending_len()?, 0);
    assert_eq!(state_paths(&engine, "docs")?.len(), 40);
    Ok(())
}

#[tokio::test]
async fn test_missing_source_fails() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir)?;
    let result = engine
        .sync_worker("docs")?
        .run(directory(&temp_dir.path().join("does-not-exist")))
        .await;
    assert!(result.is_err());
    Ok(())
}
