//! Domain types shared by the ingestion and query paths.

use serde::{Deserialize, Serialize};

pub type DocumentId = String;
pub type ChunkId = String;

/// A fetched page as handed over by a document source.
///
/// Immutable once ingested. `source_url` is the identifier shown to users
/// when an answer cites this document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_url: String,
    pub raw_text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self { id: id.into(), source_url: source_url.into(), raw_text: raw_text.into() }
    }
}

/// A bounded window of a document's text; the unit of retrieval.
///
/// - `id`: `<document_id>:<index>`
/// - `document_id`: back-reference to the parent [`Document`]
/// - `start_offset`/`end_offset`: character offsets into `raw_text`,
///   half-open, `end_offset - start_offset <= max_size`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    pub fn len(&self) -> usize { self.end_offset - self.start_offset }

    pub fn is_empty(&self) -> bool { self.start_offset == self.end_offset }
}

/// One ranked hit. `score` is cosine similarity; higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub source_url: String,
    pub score: f32,
}

/// Hits ordered by descending similarity, ties in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn new(hits: Vec<RetrievedChunk>) -> Self { Self { hits } }

    pub fn len(&self) -> usize { self.hits.len() }

    pub fn is_empty(&self) -> bool { self.hits.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, RetrievedChunk> { self.hits.iter() }

    /// Distinct source URLs in rank order.
    pub fn source_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for hit in &self.hits {
            if !urls.iter().any(|u| u == &hit.source_url) {
                urls.push(hit.source_url.clone());
            }
        }
        urls
    }
}

impl<'a> IntoIterator for &'a RetrievalResult {
    type Item = &'a RetrievedChunk;
    type IntoIter = std::slice::Iter<'a, RetrievedChunk>;

    fn into_iter(self) -> Self::IntoIter { self.hits.iter() }
}

/// The answer shown to the user. Not persisted.
///
/// `cited_source_urls` is deduplicated and keeps first-citation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub answer_text: String,
    pub cited_source_urls: Vec<String>,
}

/// A chat request: system instructions plus the user turn, optionally
/// constrained to a JSON schema when the provider supports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub response_schema: Option<serde_json::Value>,
}
