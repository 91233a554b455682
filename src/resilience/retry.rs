use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::drivers::{Completion, Provider};
use crate::types::{Message, RequestOptions};
use crate::{Error, Result};

/// Exponential backoff for transient errors: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            ..Self::default()
        }
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Per-call overrides from request options.
    pub fn for_options(&self, options: &RequestOptions) -> Self {
        Self {
            max_retries: options.max_retries.unwrap_or(self.max_retries),
            base_delay_ms: options.backoff_base_ms.unwrap_or(self.base_delay_ms),
            max_delay_ms: self.max_delay_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let computed = || {
            let exp = attempt.saturating_sub(1).min(31);
            self.base_delay_ms.saturating_mul(1u64 << exp)
        };
        let ms = retry_after_ms.unwrap_or_else(computed).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Retries the wrapped provider on retryable errors.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    async fn call(&self, messages: &[Message], options: &RequestOptions) -> Result<Completion> {
        let policy = self.policy.for_options(options);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.inner.call(messages, options).await {
                Ok(c) => return Ok(c),
                Err(e) => e,
            };

            if err.is_retryable() && attempt <= policy.max_retries {
                let delay = policy.delay_for(attempt, err.retry_after_ms());
                warn!(
                    provider = self.inner.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient upstream error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(if attempt > 1 {
                Error::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                }
            } else {
                err
            });
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn endpoint(&self) -> Option<String> {
        self.inner.endpoint()
    }

    fn default_model(&self) -> Option<&str> {
        self.inner.default_model()
    }

    fn supports_native_streaming(&self) -> bool {
        self.inner.supports_native_streaming()
    }

    async fn call_stream(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        on_event: crate::types::ChunkCallback,
    ) -> Result<Completion> {
        self.inner.call_stream(messages, options, on_event).await
    }
}
