//! Retry decorator for generation calls.

use async_trait::async_trait;
use docflow_core::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::generator::TextGenerator;

/// Wraps a generator with bounded exponential backoff.
///
/// Transient failures are retried until `policy.max_attempts` attempts have
/// been made, sleeping `policy.delay_with_hint` between attempts. Exhaustion
/// turns into [`GenerationError::Permanent`]. Backoff sleeps observe the
/// cancellation token.
pub struct RetryingGenerator<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G> TextGenerator for RetryingGenerator<G>
where
    G: TextGenerator,
{
    async fn generate(
        &self,
        instructions: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            attempt += 1;

            let (message, retry_after) = match self.inner.generate(instructions, prompt, cancel).await {
                Ok(text) => {
                    if attempt > 1 {
                        debug!(attempt, "generation succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(GenerationError::Transient {
                    message,
                    retry_after,
                }) => (message, retry_after),
                Err(other) => return Err(other),
            };

            if !self.policy.should_retry(attempt) {
                warn!(attempt, error = %message, "generation retries exhausted");
                return Err(GenerationError::Permanent(format!(
                    "gave up after {attempt} attempts: {message}"
                )));
            }

            let delay = self.policy.delay_with_hint(attempt, retry_after);
            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "transient generation failure, backing off"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
