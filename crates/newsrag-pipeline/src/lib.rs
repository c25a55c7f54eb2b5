//! Retrieval, answer synthesis and the orchestrator tying ingestion and
//! question answering together.

pub mod llm;
pub mod orchestrator;
pub mod retriever;
pub mod retry;
pub mod synthesizer;

pub use llm::OpenAiChatModel;
pub use orchestrator::{EmbedProgress, IndexStatus, IngestOutcome, Pipeline, PipelineError, ProgressFn};
pub use retriever::Retriever;
pub use retry::{ResilientChatModel, ResilientEmbedder, RetryPolicy};
pub use synthesizer::{AnswerSynthesizer, INSUFFICIENT_INFORMATION};
