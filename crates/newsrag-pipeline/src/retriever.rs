use std::sync::Arc;
use tracing::debug;

use newsrag_core::config::RetrievalSettings;
use newsrag_core::traits::Embedder;
use newsrag_core::types::RetrievalResult;
use newsrag_core::{Error, Result};
use newsrag_vector::VectorIndex;

/// Embeds a query and returns the closest chunks at or above `min_score`.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    min_score: f32,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, settings: &RetrievalSettings) -> Self {
        Self { embedder, min_score: settings.min_score }
    }

    pub fn min_score(&self) -> f32 { self.min_score }

    /// At most `k` hits; fewer when the threshold cuts the tail.
    pub async fn retrieve(&self, query: &str, index: &VectorIndex, k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(Error::config("k must be positive"));
        }
        if self.embedder.embedder_id() != index.embedder_id() {
            return Err(Error::config(format!(
                "index was built with '{}' but queries use '{}'",
                index.embedder_id(),
                self.embedder.embedder_id()
            )));
        }
        let mut vectors = self.embedder.embed_batch(&[query.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| Error::embedding_fatal("no vector returned for query"))?;
        let ranked = index.query(&vector, k)?;
        let candidates = ranked.len();
        let hits: Vec<_> = ranked.hits.into_iter().filter(|h| h.score >= self.min_score).collect();
        debug!(candidates, kept = hits.len(), min_score = self.min_score, "retrieved");
        Ok(RetrievalResult::new(hits))
    }
}
