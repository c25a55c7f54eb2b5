//! OpenAI-compatible `/embeddings` endpoint.

use async_openai::{config::OpenAIConfig, error::OpenAIError, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use tracing::debug;

use newsrag_core::config::EmbeddingSettings;
use newsrag_core::traits::Embedder;
use newsrag_core::{Error, Result};

pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dim: usize,
    id: String,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(base) = &settings.api_base { config = config.with_api_base(base); }
        if let Some(key) = &settings.api_key { config = config.with_api_key(key); }
        Self {
            client: Client::with_config(config),
            model: settings.model.clone(),
            dim: settings.dimension,
            id: format!("openai:{}:d{}", settings.model, settings.dimension),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn embedder_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(texts.to_vec())
            .build()
            .map_err(classify)?;
        let response = self.client.embeddings().create(request).await.map_err(classify)?;
        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        if data.len() != texts.len() {
            return Err(Error::embedding_fatal(format!(
                "provider returned {} embeddings for {} inputs", data.len(), texts.len()
            )));
        }
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|e| e.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(Error::embedding_fatal(format!(
                "provider returned dimension {} but {} is configured", bad.len(), self.dim
            )));
        }
        debug!(batch = texts.len(), "remote embeddings received");
        Ok(vectors)
    }
}

/// Transport and provider-side failures are worth retrying; malformed
/// requests and responses are not.
fn classify(err: OpenAIError) -> Error {
    match err {
        OpenAIError::Reqwest(e) => Error::embedding(format!("transport: {e}")),
        OpenAIError::ApiError(e) => Error::embedding(format!("provider: {}", e.message)),
        other => Error::embedding_fatal(other.to_string()),
    }
}
