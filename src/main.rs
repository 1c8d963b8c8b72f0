use anyhow::Context;
use clap::Parser;
use imdex::ui::cli::{Cli, Commands};
use imdex::{
    ArchiveSource, Config, DirectorySource, Document, DocumentType, Engine, ExternalSource, Profile,
    SourceWatcher,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imdex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.base_dir.as_deref().map(PathBuf::from))?;

    match cli.command {
        Commands::Init => handle_init(config),
        Commands::Sync {
            korpus,
            path,
            archive,
        } => handle_sync(config, &korpus, &path, archive).await,
        Commands::Index { korpus, full } => handle_index(config, &korpus, full),
        Commands::Search {
            query,
            profile,
            corpus,
            limit,
        } => handle_search(config, &query, profile.as_deref(), corpus, limit),
        Commands::Watch { korpus, path } => handle_watch(config, &korpus, &path).await,
        Commands::Show { document } => handle_show(config, &document),
    }
}

fn open_engine(config: Config) -> anyhow::Result<Engine> {
    if !config.is_initialized() {
        anyhow::bail!("imdex is not initialized. Run 'imdex init' first.");
    }
    Engine::open(config).context("Failed to open imdex stores")
}

fn handle_init(config: Config) -> anyhow::Result<()> {
    if config.is_initialized() {
        println!("imdex is already initialized at: {}", config.base_dir.display());
        return Ok(());
    }
    config.init()?;
    println!("✓ Created base directory: {}", config.base_dir.display());
    println!("\nNext steps:");
    println!("  1. Sync a corpus: imdex sync <corpus> /path/to/notes");
    println!("  2. Search it:     imdex search \"some words\"");
    Ok(())
}

async fn handle_sync(config: Config, korpus: &str, path: &str, archive: bool) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let source: Arc<dyn ExternalSource> = if archive {
        Arc::new(ArchiveSource::new(path))
    } else {
        Arc::new(DirectorySource::new(path))
    };
    let report = engine
        .sync_worker(korpus)?
        .run(source)
        .await
        .with_context(|| format!("Sync of corpus '{}' failed", korpus))?;

    println!("Sync complete for '{}'", korpus);
    println!("  Created:   {}", report.created);
    println!("  Updated:   {}", report.updated);
    println!("  Deleted:   {}", report.deleted);
    println!("  Unchanged: {}", report.unchanged);
    Ok(())
}

fn handle_index(config: Config, korpus: &str, full: bool) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let corpus = engine.corpus(korpus)?;
    if full {
        let documents = corpus.full_index()?;
        println!("Rebuilt index for '{}' from {} documents", korpus, documents);
    } else {
        let changes = corpus.update_index()?;
        println!("Committed {} pending changes for '{}'", changes, korpus);
    }
    Ok(())
}

fn handle_search(
    config: Config,
    query: &str,
    profile: Option<&str>,
    corpora: Vec<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let profile = match profile {
        Some(name) => engine.profile(name)?.as_ref().clone(),
        None if !corpora.is_empty() => Profile::adhoc(corpora),
        None => engine.all_corpora_profile()?,
    };

    let results = engine.query_engine().query(&profile, query, limit)?;
    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} results:", results.len());
    for (i, result) in results.iter().enumerate() {
        println!("\n{}. {} (score: {:.3})", i + 1, result.document, result.score);
        if !result.metadata.label.is_empty() {
            println!("   Label: {}", result.metadata.label);
        }
        match (&result.text, &result.integrity) {
            (Some(text), _) => {
                let preview: String = text.chars().take(200).collect();
                for line in preview.lines() {
                    println!("   {}", line);
                }
            }
            (None, Some(problem)) => println!("   ⚠ {}", problem),
            (None, None) => {}
        }
    }
    Ok(())
}

async fn handle_watch(config: Config, korpus: &str, path: &str) -> anyhow::Result<()> {
    let engine = Arc::new(open_engine(config)?);
    let watcher = SourceWatcher::new(&PathBuf::from(path), korpus, engine)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    println!("Watching {} for corpus '{}'. Press Ctrl+C to stop.", path, korpus);
    watcher.watch(cancel).await?;
    Ok(())
}

fn handle_show(config: Config, path: &str) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let document = Document::parse(path)?;
    let content = engine.query_engine().fetch(&document)?;

    if content.kind == DocumentType::Folder {
        for (child, metadata) in engine.store().children(&document)? {
            let marker = if metadata.is_folder() { "/" } else { "" };
            println!("{}{}", child, marker);
        }
    } else {
        print!("{}", content.content);
    }
    Ok(())
}
