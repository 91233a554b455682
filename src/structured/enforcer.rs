use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::drivers::{Completion, Provider};
use crate::types::{ChunkCallback, Message, RequestOptions};
use crate::{Error, Result};

use super::repair::{repair_json, RepairStage};

/// Longest raw excerpt carried by a format validation error.
pub const RAW_EXCERPT_CHARS: usize = 500;

/// Re-issue policy for output that fails JSON validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatPolicy {
    pub max_json_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self {
            max_json_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl FormatPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << exp))
    }
}

/// Validated JSON plus the completion it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcedOutput {
    pub completion: Completion,
    pub value: Value,
    /// Re-issued calls needed before the output validated.
    pub retries: u32,
}

/// Decorator that guarantees parseable JSON when strict JSON output is requested.
///
/// Any other request passes straight through to the wrapped provider.
pub struct FormatEnforcer {
    inner: Arc<dyn Provider>,
    policy: FormatPolicy,
}

impl FormatEnforcer {
    pub fn new(inner: Arc<dyn Provider>, policy: FormatPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &FormatPolicy {
        &self.policy
    }

    /// Call until the output parses as JSON or the retry budget is spent.
    ///
    /// Upstream errors propagate immediately; transient ones are expected to have
    /// been retried by an inner [`crate::resilience::RetryingProvider`].
    pub async fn enforce(
        &self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> Result<EnforcedOutput> {
        let max_retries = options
            .max_json_retries
            .unwrap_or(self.policy.max_json_retries);
        let attempts = max_retries + 1;
        let mut last_raw = String::new();

        for attempt in 1..=attempts {
            let completion = self.inner.call(messages, options).await?;

            if completion.is_recognized() {
                if let Some((value, stage)) = repair_json(&completion.text) {
                    if stage != RepairStage::Direct {
                        debug!(provider = self.inner.name(), ?stage, "repaired JSON output");
                    }
                    return Ok(EnforcedOutput {
                        completion,
                        value,
                        retries: attempt - 1,
                    });
                }
            }

            last_raw = completion.text;
            if attempt < attempts {
                let delay = self.policy.delay_for(attempt);
                warn!(
                    provider = self.inner.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "output failed JSON validation, re-issuing"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(Error::FormatValidation {
            attempts,
            raw: last_raw.chars().take(RAW_EXCERPT_CHARS).collect(),
        })
    }
}

#[async_trait]
impl Provider for FormatEnforcer {
    async fn call(&self, messages: &[Message], options: &RequestOptions) -> Result<Completion> {
        if !options.wants_strict_json() {
            return self.inner.call(messages, options).await;
        }
        let out = self.enforce(messages, options).await?;
        Ok(Completion::recognized(
            out.value.to_string(),
            out.completion.provider,
            out.completion.model,
        ))
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
        on_event: ChunkCallback,
    ) -> Result<Completion> {
        self.inner.call_stream(messages, options, on_event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mock::{MockProvider, MockReply};
    use crate::error::ErrorKind;
    use serde_json::json;

    fn fast() -> FormatPolicy {
        FormatPolicy {
            max_json_retries: 3,
            backoff_base_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_two_malformed_then_valid_counts_two_retries() {
        let mock = Arc::new(MockProvider::default().with_script([
            MockReply::Text("not json".into()),
            MockReply::Text("{broken".into()),
            MockReply::Text(r#"{"ok": true}"#.into()),
        ]));
        let enforcer = FormatEnforcer::new(mock.clone(), fast());
        let out = enforcer
            .enforce(&[Message::user("x")], &RequestOptions::json_strict())
            .await
            .unwrap();
        assert_eq!(out.retries, 2);
        assert_eq!(out.value, json!({"ok": true}));
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_fenced_output_needs_no_retry() {
        let mock = Arc::new(MockProvider::default().with_script([MockReply::Text(
            "```json\n{\"a\": 1}\n```".into(),
        )]));
        let enforcer = FormatEnforcer::new(mock.clone(), fast());
        let c = enforcer
            .call(&[Message::user("x")], &RequestOptions::json_strict())
            .await
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(&c.text).unwrap(), json!({"a": 1}));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_format_validation() {
        let long = "x".repeat(900);
        let mock = Arc::new(MockProvider::default().with_script([
            MockReply::Unrecognized("<html>".into()),
            MockReply::Text(long.clone()),
        ]));
        let enforcer = FormatEnforcer::new(mock.clone(), fast());
        let err = enforcer
            .enforce(
                &[Message::user("x")],
                &RequestOptions::json_strict().with_max_json_retries(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatValidation);
        assert_eq!(err.retries(), 1);
        match err {
            Error::FormatValidation { attempts, raw } => {
                assert_eq!(attempts, 2);
                assert_eq!(raw.chars().count(), RAW_EXCERPT_CHARS);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unrecognized_envelope_counts_as_failed_attempt() {
        let mock = Arc::new(MockProvider::default().with_script([
            MockReply::Unrecognized(r#"{"weird": "envelope"}"#.into()),
            MockReply::Text("[1]".into()),
        ]));
        let enforcer = FormatEnforcer::new(mock.clone(), fast());
        let out = enforcer
            .enforce(&[Message::user("x")], &RequestOptions::json_strict())
            .await
            .unwrap();
        assert_eq!(out.retries, 1);
        assert_eq!(out.value, json!([1]));
    }

    #[tokio::test]
    async fn test_pass_through_without_strict_json() {
        let mock = Arc::new(
            MockProvider::default().with_script([MockReply::Text("plain words".into())]),
        );
        let enforcer = FormatEnforcer::new(mock.clone(), fast());
        let c = enforcer
            .call(&[Message::user("x")], &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(c.text, "plain words");
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let mock = Arc::new(
            MockProvider::default().with_script([MockReply::Fail(Error::network("down"))]),
        );
        let enforcer = FormatEnforcer::new(mock.clone(), fast());
        let err = enforcer
            .enforce(&[Message::user("x")], &RequestOptions::json_strict())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_json_backoff_grows() {
        let p = FormatPolicy::default();
        assert_eq!(p.delay_for(1).as_millis(), 1000);
        assert_eq!(p.delay_for(2).as_millis(), 2000);
        assert_eq!(p.delay_for(3).as_millis(), 4000);
    }
}
