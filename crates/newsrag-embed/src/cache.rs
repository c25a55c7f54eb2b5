//! In-memory embedding cache keyed by `(embedder_id, content_hash)`.
//!
//! Consulted before calling the wrapped embedder and written through on
//! misses, so re-ingesting the same pages does not recompute vectors.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use newsrag_core::traits::Embedder;
use newsrag_core::{Error, Result};

fn hash_content(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}

pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    entries: Mutex<HashMap<(String, String), Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self { inner, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn len(&self) -> usize { self.entries.lock().await.len() }

    pub async fn is_empty(&self) -> bool { self.entries.lock().await.is_empty() }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    fn embedder_id(&self) -> &str { self.inner.embedder_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let eid = self.inner.embedder_id().to_string();
        let keys: Vec<(String, String)> = texts.iter().map(|t| (eid.clone(), hash_content(t))).collect();
        let mut vectors: Vec<Option<Vec<f32>>> = {
            let entries = self.entries.lock().await;
            keys.iter().map(|k| entries.get(k).cloned()).collect()
        };
        let miss_indices: Vec<usize> = (0..texts.len()).filter(|&i| vectors[i].is_none()).collect();
        if !miss_indices.is_empty() {
            let miss_texts: Vec<String> = miss_indices.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(Error::embedding_fatal(format!(
                    "embedder returned {} vectors for {} texts", fresh.len(), miss_texts.len()
                )));
            }
            let mut entries = self.entries.lock().await;
            for (&i, v) in miss_indices.iter().zip(fresh) {
                entries.insert(keys[i].clone(), v.clone());
                vectors[i] = Some(v);
            }
        }
        debug!(hits = texts.len() - miss_indices.len(), misses = miss_indices.len(), "embedding cache");
        Ok(vectors.into_iter().flatten().collect())
    }
}
