//! Offline provider used in mock mode and in tests.
//!
//! Replies are deterministic: a JSON object when JSON output is requested,
//! otherwise a short text echo. A script of replies can be queued to simulate
//! malformed output and upstream failures; the canned reply resumes once the
//! script is drained.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::types::{Message, MessageRole, OutputFormat, RequestOptions};
use crate::{Error, Result};

use super::{Completion, Provider};

/// Most recent call options kept by [`MockProvider::seen_options`].
pub const SEEN_OPTIONS_CAP: usize = 256;

/// One scripted reply.
#[derive(Debug)]
pub enum MockReply {
    Text(String),
    Unrecognized(String),
    Fail(Error),
}

#[derive(Debug)]
pub struct MockProvider {
    name: String,
    default_model: String,
    latency: Option<Duration>,
    calls: AtomicUsize,
    script: Mutex<VecDeque<MockReply>>,
    seen: Mutex<VecDeque<RequestOptions>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("mock", "mock-model")
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_model: default_model.into(),
            latency: None,
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_script(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.push_replies(replies);
        self
    }

    pub fn push_replies(&self, replies: impl IntoIterator<Item = MockReply>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Options of the last [`SEEN_OPTIONS_CAP`] calls, in arrival order.
    pub fn seen_options(&self) -> Vec<RequestOptions> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn canned(&self, messages: &[Message], options: &RequestOptions, model: &str) -> String {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let excerpt: String = prompt.chars().take(80).collect();
        match options.format {
            OutputFormat::Json => json!({
                "summary": format!("Mock analysis of: {}", excerpt),
                "model": model,
                "mock": true,
            })
            .to_string(),
            _ => format!("[{}] Mock analysis of: {}", model, excerpt),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn call(&self, messages: &[Message], options: &RequestOptions) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            if seen.len() == SEEN_OPTIONS_CAP {
                seen.pop_front();
            }
            seen.push_back(options.clone());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(MockReply::Text(text)) => Ok(Completion::recognized(text, &self.name, model)),
            Some(MockReply::Unrecognized(raw)) => {
                Ok(Completion::unrecognized(raw, &self.name, model))
            }
            Some(MockReply::Fail(err)) => Err(err),
            None => {
                let text = self.canned(messages, options, &model);
                Ok(Completion::recognized(text, &self.name, model))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("mock://{}", self.name))
    }

    fn default_model(&self) -> Option<&str> {
        Some(&self.default_model)
    }
}
