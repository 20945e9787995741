//! Retrying completion client.
//!
//! [`CompletionClient`] wraps a single-attempt [`CompletionBackend`] and owns
//! every transport-level retry decision: transient failures are retried with
//! exponential back-off, everything else surfaces immediately.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use pipeline::{
    CompletionError, CompletionProvider, CompletionRequest, CompletionResult, ProgressHandle,
    RetryPolicy,
};

/// Issues exactly one request to the completion service.
///
/// Implementations classify failures through [`CompletionError`]; they never
/// retry on their own.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn send(&self, request: &CompletionRequest)
        -> Result<CompletionResult, CompletionError>;
}

#[async_trait]
impl<T: CompletionBackend + ?Sized> CompletionBackend for std::sync::Arc<T> {
    async fn send(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, CompletionError> {
        (**self).send(request).await
    }
}

/// Retry and timeout settings for [`CompletionClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Upper bound on a single attempt.
    pub request_timeout: Duration,
    /// Retries allowed after the first attempt for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubled after every retry.
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Completion client with transient-failure retry and progress reporting.
#[derive(Debug)]
pub struct CompletionClient<B> {
    backend: B,
    config: RetryConfig,
    progress: ProgressHandle,
}

impl<B: CompletionBackend> CompletionClient<B> {
    pub fn new(backend: B, config: RetryConfig) -> Self {
        Self {
            backend,
            config,
            progress: ProgressHandle::new(),
        }
    }

    /// Reports successful calls to `progress` instead of a private slot.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Sends `request`, retrying transient failures.
    ///
    /// The delay before retry *n* (zero-based) is `initial_backoff * 2^n`,
    /// raised to the server's retry hint when that is larger. Exhausting the
    /// retry budget yields [`CompletionError::RetriesExhausted`] wrapping the
    /// last failure; a non-transient failure is returned as-is on the attempt
    /// that produced it.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, CompletionError> {
        let mut attempt: u32 = 0;
        let mut backoff = self.config.initial_backoff;

        loop {
            let outcome =
                match tokio::time::timeout(self.config.request_timeout, self.backend.send(request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CompletionError::Timeout(self.config.request_timeout)),
                };

            let err = match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(model = %request.model, retries = attempt, "completion succeeded after retry");
                    }
                    self.progress.tick();
                    return Ok(result);
                }
                Err(err) => err,
            };

            let hint = match err.retry_policy() {
                RetryPolicy::Retryable { after } => after,
                RetryPolicy::NonRetryable => {
                    warn!(model = %request.model, status = ?err.status(), error = %err, "completion failed");
                    return Err(err);
                }
            };

            if attempt >= self.config.max_retries {
                warn!(model = %request.model, attempts = attempt + 1, error = %err, "completion retries exhausted");
                return Err(CompletionError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            let delay = hint.map_or(backoff, |after| after.max(backoff));
            warn!(
                model = %request.model,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient completion failure, backing off"
            );
            tokio::time::sleep(delay).await;

            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }
}

#[async_trait]
impl<B: CompletionBackend> CompletionProvider for CompletionClient<B> {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResult, CompletionError> {
        CompletionClient::complete(self, &request).await
    }
}
