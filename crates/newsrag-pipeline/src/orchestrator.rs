//! Ingest and Answer, wired from the individual components.
//!
//! Ingest: chunk -> embed (parallel batches) -> build -> save/publish.
//! Answer: resolve the published index (reloading when another writer
//! published a newer generation) -> retrieve -> synthesize.
//!
//! Every failure is reported as a [`PipelineError`] naming its [`Stage`].

use futures::{stream, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use newsrag_core::chunker;
use newsrag_core::config::Settings;
use newsrag_core::traits::{ChatModel, DocumentSource, Embedder};
use newsrag_core::types::{AnswerRecord, Document};
use newsrag_core::{Error, Stage};
use newsrag_vector::{IndexHandle, IndexManifest, IndexStore, VectorIndex};

use crate::llm::OpenAiChatModel;
use crate::retriever::Retriever;
use crate::retry::{ResilientChatModel, ResilientEmbedder, RetryPolicy};
use crate::synthesizer::AnswerSynthesizer;

#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(stage: Stage, source: Error) -> Self { Self { stage, source } }

    /// Short message suitable for end users.
    pub fn user_message(&self) -> String {
        match &self.source {
            Error::NoKnowledgeBase => "No knowledge base yet. Please run ingestion first.".to_string(),
            Error::EmptyIndex => "Nothing to search: the ingested documents contained no text.".to_string(),
            Error::IndexLoad { .. } => {
                "The stored index is unreadable or was built with a different embedding model. Please re-run ingestion."
                    .to_string()
            }
            Error::EmptyDocumentSet => "No documents were found for this topic.".to_string(),
            Error::Configuration(msg) => format!("Configuration problem: {msg}"),
            Error::EmbeddingBackend { .. } => "The embedding service is unavailable. Please try again later.".to_string(),
            Error::Synthesis { .. } => "The answer could not be generated. Please try again later.".to_string(),
            Error::Source { .. } => format!("Could not retrieve documents ({} step). Please try again later.", self.stage),
            Error::Storage(_) => "The index could not be written.".to_string(),
        }
    }
}

/// Drop exact repeats and suffix ids that collide across different URLs,
/// so every chunk keeps the URL of the document it came from.
fn distinct_ids(documents: Vec<Document>) -> Vec<Document> {
    let mut seen_urls: HashMap<String, HashSet<String>> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(documents.len());
    for mut doc in documents {
        let urls = seen_urls.entry(doc.id.clone()).or_default();
        if !urls.insert(doc.source_url.clone()) {
            debug!(id = %doc.id, url = %doc.source_url, "skipping repeated document");
            continue;
        }
        if !taken.insert(doc.id.clone()) {
            let base = doc.id.clone();
            let mut n = 2;
            while taken.contains(&format!("{base}-{n}")) {
                n += 1;
            }
            doc.id = format!("{base}-{n}");
            debug!(id = %base, renamed = %doc.id, "document id collision");
            taken.insert(doc.id.clone());
        }
        out.push(doc);
    }
    out
}

fn at(stage: Stage) -> impl FnOnce(Error) -> PipelineError { move |source| PipelineError::new(stage, source) }

type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug)]
pub enum IngestOutcome {
    Indexed { handle: IndexHandle, documents: usize, chunks: usize },
    /// The source produced nothing; the previously published index is untouched.
    NoDocuments,
}

impl IngestOutcome {
    /// The published handle, or `EmptyDocumentSet` when nothing was ingested.
    pub fn into_handle(self) -> PipelineResult<IndexHandle> {
        match self {
            IngestOutcome::Indexed { handle, .. } => Ok(handle),
            IngestOutcome::NoDocuments => Err(PipelineError::new(Stage::Fetch, Error::EmptyDocumentSet)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub generation: String,
    pub manifest: IndexManifest,
    /// Whether the configured embedder can query this index.
    pub compatible: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EmbedProgress {
    pub embedded: usize,
    pub total: usize,
}

pub type ProgressFn = Arc<dyn Fn(EmbedProgress) + Send + Sync>;

pub struct Pipeline {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    store: IndexStore,
    resident: RwLock<Option<IndexHandle>>,
    progress: Option<ProgressFn>,
}

impl Pipeline {
    /// Wire a pipeline from explicit collaborators. Both are wrapped with the
    /// configured timeouts and retry policy.
    pub fn new(settings: Settings, embedder: Arc<dyn Embedder>, chat: Arc<dyn ChatModel>) -> newsrag_core::Result<Self> {
        settings.validate()?;
        let policy = RetryPolicy::from_settings(&settings.retry);
        let embedder: Arc<dyn Embedder> =
            Arc::new(ResilientEmbedder::new(embedder, policy, settings.embedding.timeout()));
        let chat: Arc<dyn ChatModel> = Arc::new(ResilientChatModel::new(chat, policy, settings.synthesis.timeout()));
        let store = IndexStore::new(settings.index.resolved_dir(), settings.index.keep_generations);
        Ok(Self {
            retriever: Retriever::new(embedder.clone(), &settings.retrieval),
            synthesizer: AnswerSynthesizer::new(chat, settings.synthesis.json_schema),
            embedder,
            store,
            resident: RwLock::new(None),
            progress: None,
            settings,
        })
    }

    /// Configured embedder and OpenAI-compatible chat model.
    pub fn from_settings(settings: Settings) -> newsrag_core::Result<Self> {
        let embedder = newsrag_embed::build_embedder(&settings.embedding)?;
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(&settings.synthesis));
        Self::new(settings, embedder, chat)
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn store(&self) -> &IndexStore { &self.store }

    /// Search, fetch and ingest documents for `topic`.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn research(&self, source: &dyn DocumentSource, topic: &str) -> PipelineResult<IngestOutcome> {
        let policy = RetryPolicy::from_settings(&self.settings.retry);
        let mut urls = policy.run("search", || source.search(topic)).await.map_err(at(Stage::Search))?;
        urls.truncate(self.settings.source.max_links);
        if urls.is_empty() {
            info!("search returned no links");
            return Ok(IngestOutcome::NoDocuments);
        }
        info!(links = urls.len(), "fetching");
        let documents = source.fetch(&urls).await.map_err(at(Stage::Fetch))?;
        self.ingest(documents).await
    }

    /// Chunk, embed, build and atomically publish a new index generation.
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn ingest(&self, documents: Vec<Document>) -> PipelineResult<IngestOutcome> {
        if documents.is_empty() {
            info!("no documents to ingest, keeping the published index");
            return Ok(IngestOutcome::NoDocuments);
        }
        let documents = distinct_ids(documents);
        let chunks = chunker::split(&documents, &self.settings.chunking).map_err(at(Stage::Chunk))?;
        if chunks.is_empty() {
            return Err(PipelineError::new(Stage::Index, Error::EmptyIndex));
        }
        info!(chunks = chunks.len(), "documents chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_all(&texts).await.map_err(at(Stage::Embed))?;

        let urls: HashMap<&str, &str> = documents.iter().map(|d| (d.id.as_str(), d.source_url.as_str())).collect();
        let entries: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let url = urls.get(chunk.document_id.as_str()).copied().unwrap_or_default().to_string();
                (chunk, url)
            })
            .collect();
        let chunk_count = entries.len();
        let index = VectorIndex::build(self.embedder.embedder_id(), self.embedder.dim(), entries, vectors)
            .map_err(at(Stage::Index))?;
        let handle = self.store.save(index).await.map_err(at(Stage::Index))?;

        *self.resident.write().await = Some(handle.clone());
        info!(generation = handle.generation(), chunks = chunk_count, "ingestion complete");
        Ok(IngestOutcome::Indexed { handle, documents: documents.len(), chunks: chunk_count })
    }

    async fn embed_all(&self, texts: &[String]) -> newsrag_core::Result<Vec<Vec<f32>>> {
        let total = texts.len();
        let done = AtomicUsize::new(0);
        let batch_size = self.settings.embedding.batch_size;
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(batch_size))
            .map(|batch| {
                let done = &done;
                async move {
                    let vectors = self.embedder.embed_batch(batch).await?;
                    if vectors.len() != batch.len() {
                        return Err(Error::embedding_fatal(format!(
                            "embedder returned {} vectors for {} texts", vectors.len(), batch.len()
                        )));
                    }
                    let embedded = done.fetch_add(batch.len(), Ordering::SeqCst) + batch.len();
                    debug!(embedded, total, "embedding batch done");
                    if let Some(progress) = &self.progress {
                        progress(EmbedProgress { embedded, total });
                    }
                    Ok(vectors)
                }
            })
            .buffered(self.settings.embedding.concurrency)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }

    /// Answer against the currently published index.
    #[instrument(skip_all)]
    pub async fn answer(&self, query: &str) -> PipelineResult<AnswerRecord> {
        let handle = self.published_handle().await.map_err(at(Stage::Index))?;
        self.answer_with(query, &handle).await
    }

    /// Answer against an explicit handle, e.g. the one `ingest` returned.
    #[instrument(skip_all, fields(generation = handle.generation()))]
    pub async fn answer_with(&self, query: &str, handle: &IndexHandle) -> PipelineResult<AnswerRecord> {
        let retrieved = self
            .retriever
            .retrieve(query, handle.index(), self.settings.retrieval.top_k)
            .await
            .map_err(at(Stage::Retrieve))?;
        info!(hits = retrieved.len(), "retrieved context");
        self.synthesizer.synthesize(query, &retrieved).await.map_err(at(Stage::Synthesize))
    }

    /// Resident handle if it is still the published generation, else load.
    async fn published_handle(&self) -> newsrag_core::Result<IndexHandle> {
        let current = self.store.current_generation()?.ok_or(Error::NoKnowledgeBase)?;
        if let Some(handle) = self.resident.read().await.as_ref().filter(|h| h.generation() == current) {
            return Ok(handle.clone());
        }
        let mut resident = self.resident.write().await;
        if let Some(handle) = resident.as_ref().filter(|h| h.generation() == current) {
            return Ok(handle.clone());
        }
        let handle = self.store.load_generation(&current, self.embedder.embedder_id(), self.embedder.dim()).await?;
        info!(generation = %current, entries = handle.index().len(), "index loaded");
        *resident = Some(handle.clone());
        Ok(handle)
    }

    /// Published generation and its manifest, or `None` before the first ingest.
    pub fn status(&self) -> PipelineResult<Option<IndexStatus>> {
        let Some(generation) = self.store.current_generation().map_err(at(Stage::Index))? else { return Ok(None) };
        let manifest = self.store.manifest(&generation).map_err(at(Stage::Index))?;
        let compatible = manifest.embedder_id == self.embedder.embedder_id() && manifest.dimension == self.embedder.dim();
        Ok(Some(IndexStatus { generation, manifest, compatible }))
    }
}
