//! 通义千问 / Dashscope 兼容驱动
//!
//! Qwen driver. Requests go to Dashscope's OpenAI-compatible mode; replies are
//! read from the compatible envelope first and then from the native Dashscope
//! envelopes, since gateways in front of Dashscope return either.

use serde_json::Value;
use std::collections::HashMap;

use crate::types::{Message, RequestOptions};
use crate::Result;

use super::openai::{bearer, chat_body};
use super::{BackendKind, DriverRequest, ProviderDriver};

#[derive(Debug, Default, Clone, Copy)]
pub struct QwenDriver;

impl ProviderDriver for QwenDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::QwenCompatible
    }

    fn build_request(
        &self,
        messages: &[Message],
        model: &str,
        options: &RequestOptions,
    ) -> Result<DriverRequest> {
        Ok(DriverRequest {
            path: "/chat/completions".into(),
            headers: HashMap::new(),
            body: chat_body(messages, model, options),
        })
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(String, String)> {
        bearer(api_key)
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        [
            "/choices/0/message/content",
            "/output/choices/0/message/content",
            "/output/text",
        ]
        .iter()
        .find_map(|p| body.pointer(p).and_then(Value::as_str))
        .map(String::from)
    }
}
