use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use kbase_core::chunker::Chunker;
use kbase_core::config::{CorpusSettings, Settings};
use kbase_core::corpus::{load_corpus, SourceDocument};
use kbase_core::error::{Error, Result};
use kbase_core::retry::{with_retry, RetryPolicy};
use kbase_core::traits::{Completer, Embedder};
use kbase_core::types::{Chunk, CompletionPrompt, EmbeddedChunk, Resolution};
use kbase_embed::get_default_embedder;
use kbase_vector::{
    corpus_fingerprint, ActiveIndex, GenerationId, IndexSnapshot, PublishOutcome, SnapshotMeta, SnapshotStore,
};

use crate::completion::HttpCompleter;
use crate::prompt::PromptBuilder;
use crate::retriever::{Retrieval, RetrievalPolicy, Retriever};
use crate::validator::{degraded_resolution, fallback_resolution, DegradedReason, ResponseValidator, Validated, ValidationWarning};

const EMBED_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupMode {
    /// Reuse the persisted snapshot when it matches the current corpus, otherwise rebuild.
    #[default]
    LoadOrBuild,
    /// Ignore any persisted snapshot, including a corrupt one.
    ForceRebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub generation: GenerationId,
    pub chunk_count: usize,
    /// False when a newer generation was already active and this one was discarded.
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub chunk_count: usize,
    pub generation: GenerationId,
    pub last_rebuild_time: DateTime<Utc>,
    pub embedding_model: String,
    pub completion_model: String,
    pub dimension: usize,
    pub max_relevant_chunks: usize,
    pub similarity_threshold: f32,
}

/// A resolution plus what happened while producing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionReport {
    pub resolution: Resolution,
    /// Index generation the whole request ran against.
    pub generation: GenerationId,
    pub warnings: Vec<ValidationWarning>,
    pub degraded: Option<DegradedReason>,
}

impl ResolutionReport {
    fn validated(generation: GenerationId, validated: Validated, mut warnings: Vec<ValidationWarning>) -> Self {
        warnings.extend(validated.warnings);
        Self { resolution: validated.resolution, generation, warnings, degraded: None }
    }

    fn degraded(generation: GenerationId, reason: DegradedReason, warnings: Vec<ValidationWarning>) -> Self {
        let resolution = match reason {
            DegradedReason::UnparseableOutput => fallback_resolution(),
            _ => degraded_resolution(),
        };
        Self { resolution, generation, warnings, degraded: Some(reason) }
    }
}

/// Ties chunking, embedding, retrieval, prompting, completion and validation
/// together over an atomically swapped index snapshot.
///
/// Requests read the active snapshot once and hold that `Arc` until they finish.
/// Rebuilds do all expensive work on a private snapshot, then persist and publish
/// it under `publish_lock`, which no request ever takes.
pub struct KnowledgeAssistant {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    chunker: Chunker,
    retriever: Retriever,
    prompts: PromptBuilder,
    active: ActiveIndex,
    store: SnapshotStore,
    embed_retry: RetryPolicy,
    completion_retry: RetryPolicy,
    next_generation: AtomicU64,
    publish_lock: Mutex<()>,
}

impl KnowledgeAssistant {
    /// Open with the embedder selected by `get_default_embedder` and the HTTP completion client.
    pub async fn open_default(settings: Settings, mode: StartupMode) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder(&settings.embedding)?);
        let completer: Arc<dyn Completer> = Arc::new(HttpCompleter::new(&settings.completion)?);
        Self::open(settings, embedder, completer, mode).await
    }

    pub async fn open(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        mode: StartupMode,
    ) -> Result<Self> {
        settings.validate()?;
        let store = SnapshotStore::new(&settings.corpus.index_path);

        // generation numbering continues from a persisted snapshot even when it is stale
        let mut last_generation = 0;
        let reusable = match mode {
            StartupMode::ForceRebuild => None,
            StartupMode::LoadOrBuild => {
                let loader = store.clone();
                match blocking(move || loader.load()).await? {
                    Some(snapshot) => {
                        last_generation = snapshot.generation();
                        let docs = read_corpus(&settings.corpus).await?;
                        let fingerprint = corpus_fingerprint(&docs, &settings.chunking, embedder.model_id());
                        if snapshot.meta().corpus_fingerprint == fingerprint {
                            Some(snapshot)
                        } else {
                            info!(path = %store.path().display(), "persisted snapshot is stale, rebuilding");
                            None
                        }
                    }
                    None => None,
                }
            }
        };

        let needs_build = reusable.is_none();
        let initial = reusable.unwrap_or_else(|| {
            IndexSnapshot::empty(SnapshotMeta {
                generation: last_generation,
                embedder_id: embedder.model_id().to_string(),
                corpus_fingerprint: String::new(),
                built_at: Utc::now(),
            })
        });
        let next_generation = initial.generation() + 1;

        let assistant = Self {
            chunker: Chunker::new(settings.chunking.clone()),
            retriever: Retriever::new(RetrievalPolicy::from(&settings.retrieval)),
            prompts: PromptBuilder::new(),
            active: ActiveIndex::new(initial),
            store,
            embed_retry: RetryPolicy::from_settings(&settings.retry, Duration::from_secs(settings.embedding.timeout_secs)),
            completion_retry: RetryPolicy::from_settings(
                &settings.retry,
                Duration::from_secs(settings.completion.timeout_secs),
            ),
            next_generation: AtomicU64::new(next_generation),
            publish_lock: Mutex::new(()),
            embedder,
            completer,
            settings,
        };
        if needs_build {
            assistant.rebuild_knowledge_base().await?;
        }
        Ok(assistant)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn current_generation(&self) -> GenerationId {
        self.active.current().generation()
    }

    /// Resolve one ticket. Fails only for empty input; downstream failures yield a degraded resolution.
    pub async fn resolve_ticket(&self, ticket_text: &str) -> Result<Resolution> {
        Ok(self.resolve_ticket_report(ticket_text).await?.resolution)
    }

    pub async fn resolve_ticket_report(&self, ticket_text: &str) -> Result<ResolutionReport> {
        let ticket = ticket_text.trim();
        if ticket.is_empty() {
            return Err(Error::Validation("ticket text is empty".into()));
        }
        let snapshot = self.active.current();
        let generation = snapshot.generation();

        let retrieval = match self.retrieve(&snapshot, ticket).await {
            Ok(r) => r,
            Err(reason) => return Ok(ResolutionReport::degraded(generation, reason, Vec::new())),
        };
        debug!(generation, passages = retrieval.passages().len(), "retrieval done");

        let prompt = self.prompts.build(ticket, &retrieval);
        let validator = ResponseValidator::for_retrieval(&retrieval);

        let Some(raw) = self.complete(&prompt).await else {
            return Ok(ResolutionReport::degraded(generation, DegradedReason::CompletionUnavailable, Vec::new()));
        };
        let report = match validator.validate(&raw) {
            Ok(validated) => ResolutionReport::validated(generation, validated, Vec::new()),
            Err(err) => {
                warn!(generation, error = %err, "unparseable completion, sending corrective request");
                let retried = vec![ValidationWarning::CorrectiveRetry { error: err.to_string() }];
                let Some(raw) = self.complete(&self.prompts.corrective(&prompt)).await else {
                    return Ok(ResolutionReport::degraded(generation, DegradedReason::CompletionUnavailable, retried));
                };
                match validator.validate(&raw) {
                    Ok(validated) => ResolutionReport::validated(generation, validated, retried),
                    Err(err) => {
                        warn!(generation, error = %err, "completion still unparseable, using fallback resolution");
                        ResolutionReport::degraded(generation, DegradedReason::UnparseableOutput, retried)
                    }
                }
            }
        };
        if !report.warnings.is_empty() {
            warn!(generation, warnings = report.warnings.len(), details = ?report.warnings, "resolution repaired");
        }
        info!(generation, action = %report.resolution.action, references = report.resolution.references.len(), "ticket resolved");
        Ok(report)
    }

    async fn retrieve(&self, snapshot: &IndexSnapshot, ticket: &str) -> std::result::Result<Retrieval, DegradedReason> {
        if snapshot.is_empty() {
            return Ok(Retrieval::NoRelevantContext);
        }
        let input = [ticket.to_string()];
        let mut vectors = with_retry(&self.embed_retry, "query embedding", || self.embedder.embed_batch(&input))
            .await
            .map_err(|e| {
                warn!(error = %e, "query embedding failed");
                DegradedReason::EmbeddingUnavailable
            })?;
        if vectors.len() != 1 {
            warn!(returned = vectors.len(), "embedding service returned the wrong number of vectors");
            return Err(DegradedReason::EmbeddingUnavailable);
        }
        let query = vectors.swap_remove(0);
        self.retriever.retrieve(snapshot, &query).map_err(|e| {
            warn!(error = %e, generation = snapshot.generation(), "search failed");
            DegradedReason::RetrievalFailed
        })
    }

    async fn complete(&self, prompt: &CompletionPrompt) -> Option<String> {
        match with_retry(&self.completion_retry, "completion", || self.completer.complete(prompt)).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(error = %e, "completion failed");
                None
            }
        }
    }

    /// Re-read, re-chunk and re-embed the whole corpus, then persist and publish
    /// the result as a new generation.
    ///
    /// On failure the active snapshot is untouched. A rebuild overtaken by a newer
    /// one finishes with `published == false` and leaves the persisted file alone.
    pub async fn rebuild_knowledge_base(&self) -> Result<RebuildReport> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        info!(generation, "rebuild started");

        let docs = read_corpus(&self.settings.corpus).await?;
        let fingerprint = corpus_fingerprint(&docs, self.chunker.config(), self.embedder.model_id());
        let chunks = self.chunker.chunk_corpus(&docs);
        debug!(generation, documents = docs.len(), chunks = chunks.len(), "corpus chunked");

        let entries = self.embed_chunks(chunks).await?;
        let meta = SnapshotMeta {
            generation,
            embedder_id: self.embedder.model_id().to_string(),
            corpus_fingerprint: fingerprint,
            built_at: Utc::now(),
        };
        let snapshot = Arc::new(IndexSnapshot::build(meta, entries)?);
        let chunk_count = snapshot.chunk_count();
        let published = self.persist_and_publish(snapshot).await?;

        info!(
            generation,
            chunks = chunk_count,
            published,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuild finished"
        );
        Ok(RebuildReport { generation, chunk_count, published })
    }

    async fn persist_and_publish(&self, snapshot: Arc<IndexSnapshot>) -> Result<bool> {
        let _guard = self.publish_lock.lock().await;
        let active = self.active.current().generation();
        if snapshot.generation() <= active {
            info!(generation = snapshot.generation(), active, "rebuild superseded by a newer generation");
            return Ok(false);
        }
        let store = self.store.clone();
        let to_save = Arc::clone(&snapshot);
        blocking(move || store.save(&to_save)).await?;
        Ok(matches!(self.active.publish_if_newer(snapshot), PublishOutcome::Published { .. }))
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batches: Vec<&[String]> = texts.chunks(self.settings.embedding.batch_size.max(1)).collect();
        let pb = self.progress_bar(batches.len());
        let progress = &pb;

        let batch_futures: Vec<_> = batches
            .into_iter()
            .map(move |batch| async move {
                let vectors =
                    with_retry(&self.embed_retry, "embedding batch", || self.embedder.embed_batch(batch)).await?;
                if vectors.len() != batch.len() {
                    return Err(Error::Service(format!(
                        "embedding service returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    )));
                }
                progress.inc(1);
                Ok::<_, Error>(vectors)
            })
            .collect();
        let per_batch: Vec<Vec<Vec<f32>>> = futures::stream::iter(batch_futures)
            .buffered(EMBED_CONCURRENCY)
            .try_collect()
            .await?;
        pb.finish_and_clear();

        Ok(chunks
            .into_iter()
            .zip(per_batch.into_iter().flatten())
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect())
    }

    fn progress_bar(&self, batches: usize) -> ProgressBar {
        if !self.settings.rebuild.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(batches as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    /// Read-only view of the active generation.
    pub fn stats(&self) -> Stats {
        let snapshot = self.active.current();
        let policy = self.retriever.policy();
        Stats {
            chunk_count: snapshot.chunk_count(),
            generation: snapshot.generation(),
            last_rebuild_time: snapshot.meta().built_at,
            embedding_model: self.embedder.model_id().to_string(),
            completion_model: self.completer.model_id().to_string(),
            dimension: snapshot.dim(),
            max_relevant_chunks: policy.max_relevant_chunks,
            similarity_threshold: policy.similarity_threshold,
        }
    }
}

async fn read_corpus(corpus: &CorpusSettings) -> Result<Vec<SourceDocument>> {
    let root = corpus.docs_dir.clone();
    let extensions = corpus.extensions.clone();
    blocking(move || load_corpus(&root, &extensions)).await
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Index(format!("blocking task failed: {e}")))?
}
