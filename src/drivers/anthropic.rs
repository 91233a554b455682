//! Anthropic Messages 兼容驱动
//!
//! Anthropic Messages API driver. Differences from the OpenAI style:
//! - System messages become the top-level `system` parameter.
//! - Content is sent as typed blocks: `[{"type": "text", "text": "..."}]`.
//! - The reply text lives at `content[0].text`.
//! - `max_tokens` is mandatory.
//! - Authentication uses `x-api-key` plus a pinned `anthropic-version`.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::types::{Message, MessageRole, RequestOptions};
use crate::Result;

use super::{merge_extra, BackendKind, DriverRequest, ProviderDriver};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicDriver;

impl AnthropicDriver {
    /// Split system text out of the conversation; keep everything else in order.
    ///
    /// Function results have no native role here and are sent as user turns
    /// tagged with the function name.
    pub(crate) fn split_system_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns: Vec<Value> = Vec::new();

        for m in messages {
            let (role, text) = match m.role {
                MessageRole::System => {
                    system_parts.push(&m.content);
                    continue;
                }
                MessageRole::User => ("user", m.content.clone()),
                MessageRole::Assistant => ("assistant", m.content.clone()),
                MessageRole::Function => {
                    let name = m.name.as_deref().unwrap_or("function");
                    ("user", format!("[{} result]\n{}", name, m.content))
                }
            };
            turns.push(json!({
                "role": role,
                "content": [{ "type": "text", "text": text }],
            }));
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, turns)
    }
}

impl ProviderDriver for AnthropicDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::AnthropicCompatible
    }

    fn build_request(
        &self,
        messages: &[Message],
        model: &str,
        options: &RequestOptions,
    ) -> Result<DriverRequest> {
        let (system, turns) = Self::split_system_messages(messages);

        let mut body = json!({
            "model": model,
            "messages": turns,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        merge_extra(&mut body, options);

        let mut headers = HashMap::new();
        headers.insert("anthropic-version".into(), ANTHROPIC_VERSION.into());

        Ok(DriverRequest {
            path: "/messages".into(),
            headers,
            body,
        })
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![("x-api-key".into(), api_key.to_string())]
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        // Concatenate every text block; tool_use and thinking blocks are skipped.
        let blocks = body.get("content")?.as_array()?;
        let mut text = String::new();
        let mut found = false;
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                    found = true;
                }
            }
        }
        found.then_some(text)
    }
}
