//! In-memory vector index with exact cosine ranking.

use std::collections::HashSet;
use std::sync::Arc;

use newsrag_core::types::{Chunk, RetrievalResult, RetrievedChunk};
use newsrag_core::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub source_url: String,
    pub vector: Vec<f32>,
}

/// Entries in insertion order plus the identity of the embedder that
/// produced every vector.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedder_id: String,
    dim: usize,
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
}

impl VectorIndex {
    /// `chunks[i]` (with its source URL) is paired with `vectors[i]`.
    pub fn build(embedder_id: &str, dim: usize, chunks: Vec<(Chunk, String)>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(Error::config(format!("{} chunks but {} vectors", chunks.len(), vectors.len())));
        }
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|((chunk, source_url), vector)| IndexEntry { chunk, source_url, vector })
            .collect();
        Self::from_entries(embedder_id, dim, entries)
    }

    pub fn from_entries(embedder_id: &str, dim: usize, entries: Vec<IndexEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptyIndex);
        }
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.vector.len() != dim {
                return Err(Error::embedding_fatal(format!(
                    "chunk {} has a {}-dimensional vector, index expects {}",
                    entry.chunk.id, entry.vector.len(), dim
                )));
            }
            if !seen.insert(entry.chunk.id.as_str()) {
                return Err(Error::config(format!("duplicate chunk id {}", entry.chunk.id)));
            }
        }
        let norms = entries.iter().map(|e| l2_norm(&e.vector)).collect();
        Ok(Self { embedder_id: embedder_id.to_string(), dim, entries, norms })
    }

    pub fn embedder_id(&self) -> &str { &self.embedder_id }

    pub fn dim(&self) -> usize { self.dim }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn entries(&self) -> &[IndexEntry] { &self.entries }

    /// Distinct source URLs in insertion order.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.source_url.as_str()))
            .map(|e| e.source_url.clone())
            .collect()
    }

    /// At most `k` entries by descending cosine similarity; equal scores
    /// keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(Error::config("k must be positive"));
        }
        if vector.len() != self.dim {
            return Err(Error::config(format!(
                "query vector has dimension {}, index expects {}", vector.len(), self.dim
            )));
        }
        let query_norm = l2_norm(vector);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (entry, norm))| (i, cosine(vector, query_norm, &entry.vector, *norm)))
            .collect();
        // stable sort keeps insertion order among equal scores; NaN ranks last
        scored.sort_by(|a, b| rank_key(b.1).total_cmp(&rank_key(a.1)));
        let hits = scored
            .into_iter()
            .take(k)
            .map(|(i, score)| {
                let entry = &self.entries[i];
                RetrievedChunk { chunk: entry.chunk.clone(), source_url: entry.source_url.clone(), score }
            })
            .collect();
        Ok(RetrievalResult::new(hits))
    }
}

fn rank_key(score: f32) -> f32 { if score.is_nan() { f32::NEG_INFINITY } else { score } }

fn l2_norm(v: &[f32]) -> f32 { v.iter().map(|x| x * x).sum::<f32>().sqrt() }

fn cosine(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// A built index tagged with the generation it was published as.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    generation: String,
    index: Arc<VectorIndex>,
}

impl IndexHandle {
    pub fn new(generation: impl Into<String>, index: VectorIndex) -> Self {
        Self { generation: generation.into(), index: Arc::new(index) }
    }

    pub fn generation(&self) -> &str { &self.generation }

    pub fn index(&self) -> &VectorIndex { &self.index }
}
