use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use newsrag_core::config::{ChunkingSettings, EmbeddingBackend, EmbeddingSettings, IndexSettings, RetrievalSettings, RetrySettings, Settings};
use newsrag_core::traits::{ChatModel, DocumentSource, Embedder};
use newsrag_core::types::{ChatRequest, Chunk, Document};
use newsrag_core::{Error, Result, Stage};
use newsrag_embed::HashedEmbedder;
use newsrag_pipeline::{IngestOutcome, Pipeline, Retriever, INSUFFICIENT_INFORMATION};
use newsrag_vector::VectorIndex;
use tempfile::TempDir;

const CAT_URL: &str = "https://pets.example/cats";
const DOG_URL: &str = "https://pets.example/dogs";

#[derive(Default)]
struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
    last_user: Mutex<Option<String>>,
}

impl ScriptedChat {
    fn replying(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()), ..Default::default() })
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    fn last_user(&self) -> String { self.last_user.lock().expect("lock").clone().unwrap_or_default() }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_id(&self) -> &str { "scripted" }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_user.lock().expect("lock") = Some(request.user.clone());
        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::synthesis("rate limited"));
        }
        let reply = self.replies.lock().expect("lock").pop_front();
        Ok(reply.unwrap_or_else(|| r#"{"answer": "See the sources [S1].", "sources": ["S1"]}"#.to_string()))
    }
}

/// Hashed embeddings with switchable failures.
struct FlakyEmbedder {
    inner: HashedEmbedder,
    transient_failures: AtomicUsize,
    fatal: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new(dim: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: HashedEmbedder::new(dim),
            transient_failures: AtomicUsize::new(0),
            fatal: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn embedder_id(&self) -> &str { self.inner.embedder_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal.load(Ordering::SeqCst) {
            return Err(Error::embedding_fatal("model weights missing"));
        }
        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::embedding("connection reset"));
        }
        self.inner.embed_batch(texts).await
    }
}

struct EmptySource;

#[async_trait]
impl DocumentSource for EmptySource {
    async fn search(&self, _topic: &str) -> Result<Vec<String>> { Ok(Vec::new()) }

    async fn fetch(&self, _urls: &[String]) -> Result<Vec<Document>> { Ok(Vec::new()) }
}

/// Serves fixed documents; counts how many URLs were requested.
struct FixedSource {
    documents: Vec<Document>,
    fetched: AtomicUsize,
}

#[async_trait]
impl DocumentSource for FixedSource {
    async fn search(&self, _topic: &str) -> Result<Vec<String>> {
        Ok(self.documents.iter().map(|d| d.source_url.clone()).collect())
    }

    async fn fetch(&self, urls: &[String]) -> Result<Vec<Document>> {
        self.fetched.fetch_add(urls.len(), Ordering::SeqCst);
        Ok(self.documents.iter().filter(|d| urls.contains(&d.source_url)).cloned().collect())
    }
}

fn settings(tmp: &TempDir, dim: usize) -> Settings {
    Settings {
        chunking: ChunkingSettings::new(50, 0),
        embedding: EmbeddingSettings { backend: EmbeddingBackend::Hashed, dimension: dim, batch_size: 2, ..Default::default() },
        index: IndexSettings { dir: tmp.path().to_string_lossy().to_string(), keep_generations: 2 },
        retrieval: RetrievalSettings { top_k: 4, min_score: 0.1 },
        retry: RetrySettings { max_retries: 2, base_delay_ms: 1 },
        ..Default::default()
    }
}

fn pets() -> Vec<Document> {
    vec![Document::new("cats", CAT_URL, "Cats are mammals."), Document::new("dogs", DOG_URL, "Dogs are mammals too.")]
}

#[tokio::test]
async fn ingest_then_answer_ranks_the_relevant_chunk_first() {
    let tmp = TempDir::new().expect("tmp");
    let chat = ScriptedChat::replying(&[r#"{"answer": "Cats are mammals [S1].", "sources": ["S1"]}"#]);
    let pipeline = Pipeline::new(settings(&tmp, 4096), FlakyEmbedder::new(4096), chat.clone()).expect("pipeline");

    let outcome = pipeline.ingest(pets()).await.expect("ingest");
    let IngestOutcome::Indexed { handle, documents, chunks } = outcome else { panic!("expected an index") };
    assert_eq!((documents, chunks), (2, 2), "one chunk per short document");

    let hits = handle.index().query(&HashedEmbedder::new(4096).embed_text("What are cats?"), 2).expect("query");
    assert_eq!(hits.hits[0].source_url, CAT_URL);
    assert!(hits.hits[0].score > hits.hits[1].score);

    let record = pipeline.answer("What are cats?").await.expect("answer");
    assert_eq!(record.cited_source_urls, vec![CAT_URL.to_string()]);
    assert_eq!(record.answer_text, "Cats are mammals [1].");
    let prompt = chat.last_user();
    let cat_at = prompt.find("Cats are mammals.").expect("cat chunk in prompt");
    assert!(prompt.contains(&format!("[S1] ({CAT_URL})")));
    if let Some(dog_at) = prompt.find("Dogs are mammals too.") {
        assert!(cat_at < dog_at, "higher ranked chunk comes first");
    }
}

#[tokio::test]
async fn empty_search_yields_marker_and_later_answers_ask_for_ingestion() {
    let tmp = TempDir::new().expect("tmp");
    let chat = ScriptedChat::replying(&[]);
    let pipeline = Pipeline::new(settings(&tmp, 256), FlakyEmbedder::new(256), chat.clone()).expect("pipeline");

    let outcome = pipeline.research(&EmptySource, "nothing here").await.expect("research");
    assert!(matches!(outcome, IngestOutcome::NoDocuments));
    let err = outcome.into_handle().unwrap_err();
    assert!(matches!(err.source, Error::EmptyDocumentSet));

    let err = pipeline.answer("anything?").await.unwrap_err();
    assert!(matches!(err.source, Error::NoKnowledgeBase), "got {err}");
    assert!(err.user_message().contains("ingestion first"));
    assert_eq!(chat.calls(), 0);
    assert!(pipeline.status().expect("status").is_none());
}

#[tokio::test]
async fn index_from_another_embedder_fails_to_load() {
    let tmp = TempDir::new().expect("tmp");
    let writer = Pipeline::new(settings(&tmp, 4096), FlakyEmbedder::new(4096), ScriptedChat::replying(&[])).expect("pipeline");
    writer.ingest(pets()).await.expect("ingest");

    let reader = Pipeline::new(settings(&tmp, 512), FlakyEmbedder::new(512), ScriptedChat::replying(&[])).expect("pipeline");
    let err = reader.answer("What are cats?").await.unwrap_err();
    assert_eq!(err.stage, Stage::Index);
    assert!(matches!(err.source, Error::IndexLoad { .. }), "got {err}");
    assert!(!reader.status().expect("status").expect("published").compatible);
}

#[tokio::test]
async fn nothing_above_threshold_answers_without_calling_the_model() {
    let tmp = TempDir::new().expect("tmp");
    let mut s = settings(&tmp, 4096);
    s.retrieval.min_score = 0.9;
    let chat = ScriptedChat::replying(&[]);
    let pipeline = Pipeline::new(s, FlakyEmbedder::new(4096), chat.clone()).expect("pipeline");
    pipeline.ingest(pets()).await.expect("ingest");

    let record = pipeline.answer("quantum chromodynamics lattice").await.expect("answer");
    assert_eq!(record.answer_text, INSUFFICIENT_INFORMATION);
    assert!(record.cited_source_urls.is_empty());
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn uncited_replies_attribute_every_retrieved_source() {
    let tmp = TempDir::new().expect("tmp");
    let mut s = settings(&tmp, 4096);
    s.retrieval.min_score = 0.0;
    let chat = ScriptedChat::replying(&["Both are mammals."]);
    let pipeline = Pipeline::new(s, FlakyEmbedder::new(4096), chat).expect("pipeline");
    pipeline.ingest(pets()).await.expect("ingest");

    let record = pipeline.answer("Are they mammals?").await.expect("answer");
    assert_eq!(record.answer_text, "Both are mammals.");
    assert_eq!(record.cited_source_urls.len(), 2);
}

#[tokio::test]
async fn transient_failures_are_retried_and_fatal_ones_are_not() {
    let tmp = TempDir::new().expect("tmp");
    let embedder = FlakyEmbedder::new(4096);
    let chat = ScriptedChat::replying(&[]);
    let pipeline = Pipeline::new(settings(&tmp, 4096), embedder.clone(), chat.clone()).expect("pipeline");

    embedder.transient_failures.store(2, Ordering::SeqCst);
    pipeline.ingest(pets()).await.expect("ingest survives two transient failures");

    chat.transient_failures.store(1, Ordering::SeqCst);
    pipeline.answer("What are cats?").await.expect("answer survives one rate limit");
    assert_eq!(chat.calls(), 2);

    chat.transient_failures.store(10, Ordering::SeqCst);
    let err = pipeline.answer("What are cats?").await.unwrap_err();
    assert_eq!(err.stage, Stage::Synthesize);
    assert!(err.source.is_retryable(), "retries exhausted surface the transient error");

    embedder.fatal.store(true, Ordering::SeqCst);
    let before = embedder.calls.load(Ordering::SeqCst);
    let err = pipeline.ingest(pets()).await.unwrap_err();
    assert_eq!(err.stage, Stage::Embed);
    assert_eq!(embedder.calls.load(Ordering::SeqCst) - before, 1, "fatal errors are not retried");
}

#[tokio::test]
async fn failed_ingestion_keeps_the_published_index() {
    let tmp = TempDir::new().expect("tmp");
    let embedder = FlakyEmbedder::new(4096);
    let pipeline = Pipeline::new(settings(&tmp, 4096), embedder.clone(), ScriptedChat::replying(&[])).expect("pipeline");
    pipeline.ingest(pets()).await.expect("ingest");
    let published = pipeline.status().expect("status").expect("published").generation;

    embedder.fatal.store(true, Ordering::SeqCst);
    pipeline.ingest(vec![Document::new("new", "https://new.example", "Fresh news.")]).await.unwrap_err();
    embedder.fatal.store(false, Ordering::SeqCst);

    let status = pipeline.status().expect("status").expect("published");
    assert_eq!(status.generation, published);
    assert_eq!(status.manifest.sources, vec![CAT_URL.to_string(), DOG_URL.to_string()]);
    pipeline.answer("What are cats?").await.expect("old index still answers");
}

#[tokio::test]
async fn blank_documents_are_an_empty_index() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = Pipeline::new(settings(&tmp, 64), FlakyEmbedder::new(64), ScriptedChat::replying(&[])).expect("pipeline");
    let err = pipeline.ingest(vec![Document::new("blank", "https://blank.example", "   ")]).await.unwrap_err();
    assert!(matches!(err.source, Error::EmptyIndex));
    assert!(err.user_message().contains("Nothing to search"));
}

#[tokio::test]
async fn research_caps_links_before_fetching() {
    let tmp = TempDir::new().expect("tmp");
    let mut s = settings(&tmp, 4096);
    s.source.max_links = 1;
    let pipeline = Pipeline::new(s, FlakyEmbedder::new(4096), ScriptedChat::replying(&[])).expect("pipeline");
    let source = FixedSource { documents: pets(), fetched: AtomicUsize::new(0) };

    let outcome = pipeline.research(&source, "pets").await.expect("research");
    assert_eq!(source.fetched.load(Ordering::SeqCst), 1);
    let handle = outcome.into_handle().expect("indexed");
    assert_eq!(handle.index().sources(), vec![CAT_URL.to_string()]);
}

#[tokio::test]
async fn answers_follow_generations_published_by_other_writers() {
    let tmp = TempDir::new().expect("tmp");
    let chat = ScriptedChat::replying(&[]);
    let reader = Pipeline::new(settings(&tmp, 4096), FlakyEmbedder::new(4096), chat.clone()).expect("pipeline");
    let writer = Pipeline::new(settings(&tmp, 4096), FlakyEmbedder::new(4096), ScriptedChat::replying(&[])).expect("pipeline");

    writer.ingest(pets()).await.expect("first ingest");
    reader.answer("What are cats?").await.expect("answer");
    assert!(chat.last_user().contains("Cats are mammals."));

    writer
        .ingest(vec![Document::new("birds", "https://pets.example/birds", "Parrots are birds that talk.")])
        .await
        .expect("second ingest");
    reader.answer("Which birds talk?").await.expect("answer");
    assert!(chat.last_user().contains("Parrots are birds"));
    assert!(!chat.last_user().contains("Cats are mammals."));
}

#[tokio::test]
async fn concurrent_answers_share_the_resident_index() {
    let tmp = TempDir::new().expect("tmp");
    let chat = ScriptedChat::replying(&[]);
    let pipeline = Pipeline::new(settings(&tmp, 4096), FlakyEmbedder::new(4096), chat.clone()).expect("pipeline");
    pipeline.ingest(pets()).await.expect("ingest");

    let questions = ["What are cats?", "What are dogs?", "Are cats mammals?", "Are dogs mammals?"];
    let answers = futures::future::join_all(questions.iter().map(|q| pipeline.answer(q))).await;
    assert!(answers.iter().all(|a| a.is_ok()));
    assert_eq!(chat.calls(), questions.len());
}

#[tokio::test]
async fn colliding_document_ids_keep_their_own_sources() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = Pipeline::new(settings(&tmp, 256), FlakyEmbedder::new(256), ScriptedChat::replying(&[])).expect("pipeline");
    let documents = vec![
        Document::new("article", CAT_URL, "Cats are mammals."),
        Document::new("article", DOG_URL, "Dogs are mammals too."),
        Document::new("article", CAT_URL, "Cats are mammals."),
    ];

    let outcome = pipeline.ingest(documents).await.expect("ingest");
    let IngestOutcome::Indexed { handle, documents, chunks } = outcome else { panic!("expected an index") };
    assert_eq!((documents, chunks), (2, 2), "exact repeat dropped");
    let index = handle.index();
    assert_eq!(index.sources(), vec![CAT_URL.to_string(), DOG_URL.to_string()]);
    let by_url: Vec<(&str, &str)> =
        index.entries().iter().map(|e| (e.chunk.document_id.as_str(), e.source_url.as_str())).collect();
    assert_eq!(by_url, vec![("article", CAT_URL), ("article-2", DOG_URL)]);
}

fn indexed(embedder: &HashedEmbedder, texts: &[&str]) -> VectorIndex {
    let chunks: Vec<(Chunk, String)> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let chunk = Chunk {
                id: format!("doc{i}:0"),
                document_id: format!("doc{i}"),
                text: text.to_string(),
                start_offset: 0,
                end_offset: text.chars().count(),
            };
            (chunk, format!("https://news.example/{i}"))
        })
        .collect();
    let vectors = texts.iter().map(|t| embedder.embed_text(t)).collect();
    VectorIndex::build(embedder.embedder_id(), embedder.dim(), chunks, vectors).expect("build")
}

#[tokio::test]
async fn retriever_cuts_below_threshold_inside_top_k() {
    let embedder = Arc::new(HashedEmbedder::new(4096));
    let index = indexed(
        &embedder,
        &[
            "interest rates central bank",
            "weather sunny coast",
            "interest rates rose",
            "football scores tonight",
            "central bank news",
        ],
    );
    let retriever = Retriever::new(embedder, &RetrievalSettings { top_k: 4, min_score: 0.5 });

    let result = retriever.retrieve("interest rates central bank", &index, 4).await.expect("retrieve");
    assert!(result.len() < 4, "threshold drops the unrelated tail: {:?}", result.source_urls());
    assert!(result.iter().all(|h| h.score >= 0.5));
    assert_eq!(result.hits[0].source_url, "https://news.example/0");
    assert!(result.iter().all(|h| h.chunk.text != "weather sunny coast" && h.chunk.text != "football scores tonight"));
}

#[tokio::test]
async fn retriever_rejects_an_index_from_another_embedder() {
    let index = indexed(&HashedEmbedder::new(64), &["interest rates", "weather"]);
    let retriever = Retriever::new(Arc::new(HashedEmbedder::new(128)), &RetrievalSettings { top_k: 2, min_score: 0.0 });

    let err = retriever.retrieve("interest rates", &index, 2).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
}
