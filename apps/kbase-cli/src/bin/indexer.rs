use std::path::PathBuf;
use std::{env, sync::Arc};

use kbase_core::chunker::Chunker;
use kbase_core::config::Config;
use kbase_core::corpus::load_corpus;
use kbase_core::traits::Embedder;
use kbase_embed::get_default_embedder;
use kbase_vector::{corpus_fingerprint, SnapshotStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Offline build: chunk + embed the corpus and write the snapshot, without a completion service.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let mut settings = config.settings()?;
    let args: Vec<String> = env::args().skip(1).collect();
    let mut dry_run = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--dry-run" | "-n" => dry_run = true,
            "--index" => {
                if i + 1 < args.len() {
                    settings.corpus.index_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                } else {
                    eprintln!("Error: --index requires a path");
                    std::process::exit(1);
                }
            }
            _ if !args[i].starts_with('-') => settings.corpus.docs_dir = PathBuf::from(&args[i]),
            _ => {}
        }
        i += 1;
    }

    println!("kbase indexer\n=============");
    println!("Corpus directory: {}", settings.corpus.docs_dir.display());
    println!("Snapshot path:    {}", settings.corpus.index_path.display());

    let docs = load_corpus(&settings.corpus.docs_dir, &settings.corpus.extensions)?;
    let chunks = Chunker::new(settings.chunking.clone()).chunk_corpus(&docs);
    info!(documents = docs.len(), chunks = chunks.len(), "corpus chunked");
    println!("📊 {} documents -> {} chunks", docs.len(), chunks.len());
    if dry_run {
        let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder(&settings.embedding)?);
        println!("Fingerprint: {}", corpus_fingerprint(&docs, &settings.chunking, embedder.model_id()));
        println!("Dry run, nothing written.");
        return Ok(());
    }

    settings.rebuild.show_progress = true;
    let store = SnapshotStore::new(&settings.corpus.index_path);
    let assistant = kbase_assist::KnowledgeAssistant::open_default(settings, kbase_assist::StartupMode::ForceRebuild).await?;
    let stats = assistant.stats();
    let saved = store.load()?.map(|s| s.generation());
    println!("\n✅ Indexed {} chunks (dimension {}) as generation {}", stats.chunk_count, stats.dimension, stats.generation);
    match saved {
        Some(generation) => println!("💾 Snapshot on disk: generation {}", generation),
        None => warn!(path = %store.path().display(), "no snapshot found on disk after rebuild"),
    }
    Ok(())
}
