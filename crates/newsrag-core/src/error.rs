use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Search,
    Fetch,
    Chunk,
    Embed,
    Index,
    Retrieve,
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Search => "search",
            Stage::Fetch => "fetch",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Index => "index",
            Stage::Retrieve => "retrieve",
            Stage::Synthesize => "synthesize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Embedding backend error: {message}")]
    EmbeddingBackend { message: String, retryable: bool },

    #[error("Answer synthesis failed: {message}")]
    Synthesis { message: String, retryable: bool },

    #[error("Index has no entries")]
    EmptyIndex,

    #[error("Index at {} could not be loaded: {reason}", location.display())]
    IndexLoad { location: PathBuf, reason: String },

    #[error("No knowledge base has been ingested yet")]
    NoKnowledgeBase,

    #[error("Document source returned no documents")]
    EmptyDocumentSet,

    #[error("Document source error: {message}")]
    Source { message: String, retryable: bool },

    #[error("Index storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self { Error::Configuration(msg.into()) }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Error::EmbeddingBackend { message: msg.into(), retryable: true }
    }

    pub fn embedding_fatal(msg: impl Into<String>) -> Self {
        Error::EmbeddingBackend { message: msg.into(), retryable: false }
    }

    pub fn synthesis(msg: impl Into<String>) -> Self {
        Error::Synthesis { message: msg.into(), retryable: true }
    }

    pub fn synthesis_fatal(msg: impl Into<String>) -> Self {
        Error::Synthesis { message: msg.into(), retryable: false }
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Error::Source { message: msg.into(), retryable: true }
    }

    pub fn index_load(location: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::IndexLoad { location: location.into(), reason: reason.into() }
    }

    /// Transient provider failures may be retried with backoff; structural
    /// and configuration errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::EmbeddingBackend { retryable, .. }
            | Error::Synthesis { retryable, .. }
            | Error::Source { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
