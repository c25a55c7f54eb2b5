//! Embedding backends behind the `newsrag_core::traits::Embedder` trait.
//!
//! `APP_USE_FAKE_EMBEDDINGS=1` forces the hashed backend regardless of
//! configuration, for fast deterministic runs.

use std::sync::Arc;
use tracing::info;

use newsrag_core::config::{EmbeddingBackend, EmbeddingSettings};
use newsrag_core::traits::Embedder;
use newsrag_core::Result;

pub mod cache;
pub mod device;
pub mod hashed;
pub mod local;
pub mod pool;
pub mod remote;
pub mod tokenize;

pub use cache::CachedEmbedder;
pub use hashed::HashedEmbedder;
pub use local::LocalEmbedder;
pub use pool::masked_mean_l2;
pub use remote::OpenAiEmbedder;

fn fake_embeddings_requested() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Construct the configured embedder, wrapped in a content-hash cache.
pub fn build_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    settings.validate()?;
    let backend = if fake_embeddings_requested() { EmbeddingBackend::Hashed } else { settings.backend };
    let inner: Arc<dyn Embedder> = match backend {
        EmbeddingBackend::Hashed => Arc::new(HashedEmbedder::new(settings.dimension)),
        EmbeddingBackend::Local => Arc::new(LocalEmbedder::new(settings)?),
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(settings)),
    };
    info!(embedder = inner.embedder_id(), "embedder ready");
    Ok(Arc::new(CachedEmbedder::new(inner)))
}
