use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, Document};

/// Maps texts to fixed-dimension vectors.
///
/// Output order and length match the input. The same text under the same
/// `embedder_id` always yields the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the backend/model pair (e.g. `local:all-MiniLM-L6-v2:d384`).
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A generative model that turns a prompt into a completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Search plus fetch. Both may legitimately return nothing.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn search(&self, topic: &str) -> Result<Vec<String>>;
    async fn fetch(&self, urls: &[String]) -> Result<Vec<Document>>;
}
