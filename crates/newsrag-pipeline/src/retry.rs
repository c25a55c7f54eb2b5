//! Bounded retry with exponential backoff, plus per-call timeouts.
//!
//! Only errors reporting [`Error::is_retryable`] are retried. A call that
//! exceeds its timeout becomes a retryable error of the caller's kind.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

use newsrag_core::config::RetrySettings;
use newsrag_core::traits::{ChatModel, Embedder};
use newsrag_core::types::ChatRequest;
use newsrag_core::{Error, Result};

const MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self { max_retries: settings.max_retries, base_delay: Duration::from_millis(settings.base_delay_ms) }
    }

    pub fn none() -> Self { Self { max_retries: 0, base_delay: Duration::ZERO } }

    /// base, 2x base, 4x base, ... capped, with jitter.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let factor = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(2)
            .factor(factor / 2)
            .max_delay(MAX_DELAY)
            .map(jitter)
            .take(self.max_retries)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        let max_retries = self.max_retries;
        RetryIf::spawn(self.delays(), op, |e: &Error| {
            attempt += 1;
            let retry = e.is_retryable() && attempt <= max_retries;
            if retry {
                warn!(call = what, attempt, max_retries, error = %e, "retrying after transient failure");
            }
            retry
        })
        .await
    }
}

/// Await `fut` for at most `limit`; on expiry return `on_elapsed()`.
pub async fn with_timeout<T>(
    limit: Duration,
    on_elapsed: impl FnOnce() -> Error,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed()),
    }
}

/// Embedder with a per-batch timeout and bounded retries.
pub struct ResilientEmbedder {
    inner: Arc<dyn Embedder>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ResilientEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self { inner, policy, timeout }
    }
}

#[async_trait]
impl Embedder for ResilientEmbedder {
    fn embedder_id(&self) -> &str { self.inner.embedder_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let limit = self.timeout;
        self.policy
            .run("embed", || {
                with_timeout(
                    limit,
                    || Error::embedding(format!("no response within {}s", limit.as_secs_f32())),
                    self.inner.embed_batch(texts),
                )
            })
            .await
    }
}

/// Chat model with a per-call timeout and bounded retries.
pub struct ResilientChatModel {
    inner: Arc<dyn ChatModel>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ResilientChatModel {
    pub fn new(inner: Arc<dyn ChatModel>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self { inner, policy, timeout }
    }
}

#[async_trait]
impl ChatModel for ResilientChatModel {
    fn model_id(&self) -> &str { self.inner.model_id() }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let limit = self.timeout;
        self.policy
            .run("chat", || {
                with_timeout(
                    limit,
                    || Error::synthesis(format!("no response within {}s", limit.as_secs_f32())),
                    self.inner.complete(request),
                )
            })
            .await
    }
}
