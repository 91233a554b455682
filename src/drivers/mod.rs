//! Provider 协议与厂商驱动：统一 `call(messages, options)` 契约
//!
//! Provider protocol and vendor drivers.
//!
//! Two layers:
//! - [`Provider`]: the async contract every backend (and every decorator) implements.
//! - [`ProviderDriver`]: pure, I/O-free payload adaptation for one vendor API style.
//!   [`HttpProvider`] binds a driver to the HTTP transport.
//!
//! The backend is an explicit [`BackendKind`] resolved once at configuration time;
//! nothing downstream sniffs model names to pick a wire format.

pub mod anthropic;
pub mod http_provider;
pub mod mock;
pub mod openai;
pub mod qwen;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::{ChunkCallback, Message, OutputFormat, RequestOptions};
use crate::{Error, Result};

pub use anthropic::AnthropicDriver;
pub use http_provider::HttpProvider;
pub use mock::MockProvider;
pub use openai::OpenAiDriver;
pub use qwen::QwenDriver;

/// Generic analyst persona used when the caller supplies no system prompt.
pub const DEFAULT_PERSONA: &str = "You are a senior market research analyst. \
Give accurate, well-structured and actionable insights grounded in the data provided.";

/// Appended to the system prompt when JSON output is requested.
pub const JSON_DIRECTIVE: &str = "Respond with a single valid JSON value only. \
Do not wrap it in Markdown code fences and do not add commentary.";

/// Vendor API style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    #[serde(rename = "openai", alias = "openai_compatible")]
    OpenAiCompatible,
    #[serde(rename = "anthropic", alias = "anthropic_compatible")]
    AnthropicCompatible,
    #[serde(rename = "qwen", alias = "qwen_compatible", alias = "dashscope")]
    QwenCompatible,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::OpenAiCompatible,
        BackendKind::AnthropicCompatible,
        BackendKind::QwenCompatible,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            BackendKind::OpenAiCompatible => "openai",
            BackendKind::AnthropicCompatible => "anthropic",
            BackendKind::QwenCompatible => "qwen",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            BackendKind::OpenAiCompatible => "https://api.openai.com/v1",
            BackendKind::AnthropicCompatible => "https://api.anthropic.com/v1",
            BackendKind::QwenCompatible => "https://dashscope.aliyuncs.com/compatible-mode/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            BackendKind::OpenAiCompatible => "gpt-4o-mini",
            BackendKind::AnthropicCompatible => "claude-3-5-sonnet-latest",
            BackendKind::QwenCompatible => "qwen-plus",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai_compatible" => Ok(BackendKind::OpenAiCompatible),
            "anthropic" | "anthropic_compatible" | "claude" => Ok(BackendKind::AnthropicCompatible),
            "qwen" | "qwen_compatible" | "dashscope" => Ok(BackendKind::QwenCompatible),
            other => Err(Error::configuration(format!("Unknown backend: {}", other))),
        }
    }
}

/// Whether the vendor envelope was understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Recognized,
    /// Bytes arrived but the envelope did not match the vendor's known shape;
    /// `Completion::text` then holds the raw body.
    Unrecognized,
}

/// Text produced by one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub shape: ResponseShape,
    pub provider: String,
    pub model: String,
}

impl Completion {
    pub fn recognized(
        text: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            shape: ResponseShape::Recognized,
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn unrecognized(
        raw: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            text: raw.into(),
            shape: ResponseShape::Unrecognized,
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.shape == ResponseShape::Recognized
    }

    /// Text of a recognized envelope, or `UpstreamShape` carrying the raw body.
    pub fn into_recognized(self) -> Result<String> {
        match self.shape {
            ResponseShape::Recognized => Ok(self.text),
            ResponseShape::Unrecognized => Err(Error::UpstreamShape {
                provider: self.provider,
                raw: self.text,
            }),
        }
    }
}

/// The contract all backends and decorators implement.
///
/// Providers are stateless adapters and never retry; retries belong to
/// [`crate::resilience::RetryingProvider`] and [`crate::structured::FormatEnforcer`].
#[async_trait]
pub trait Provider: Send + Sync {
    async fn call(&self, messages: &[Message], options: &RequestOptions) -> Result<Completion>;

    fn name(&self) -> &str;

    /// Resolved upstream endpoint, for diagnostics.
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// Model used when the request does not pin one.
    fn default_model(&self) -> Option<&str> {
        None
    }

    fn supports_native_streaming(&self) -> bool {
        false
    }

    /// Native streaming; only called when [`Provider::supports_native_streaming`] is true.
    async fn call_stream(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        on_event: ChunkCallback,
    ) -> Result<Completion> {
        let _ = (messages, options, on_event);
        Err(Error::validation(format!(
            "provider '{}' does not support native streaming",
            self.name()
        )))
    }
}

/// Vendor-shaped HTTP request, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

/// Pure payload adaptation for one vendor API style.
pub trait ProviderDriver: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Build the vendor request body from already-prepared messages.
    fn build_request(
        &self,
        messages: &[Message],
        model: &str,
        options: &RequestOptions,
    ) -> Result<DriverRequest>;

    fn auth_headers(&self, api_key: &str) -> Vec<(String, String)>;

    /// Generated text from the vendor envelope; `None` when the shape is unknown.
    fn extract_text(&self, body: &Value) -> Option<String>;
}

/// Factory for the driver matching a backend kind.
pub fn create_driver(kind: BackendKind) -> Box<dyn ProviderDriver> {
    match kind {
        BackendKind::OpenAiCompatible => Box::new(OpenAiDriver),
        BackendKind::AnthropicCompatible => Box::new(AnthropicDriver),
        BackendKind::QwenCompatible => Box::new(QwenDriver),
    }
}

/// Ensure a system prompt exists and carries the JSON directive when JSON is requested.
pub fn prepare_messages(messages: &[Message], options: &RequestOptions) -> Vec<Message> {
    let mut prepared = messages.to_vec();
    if !prepared.iter().any(Message::is_system) {
        let persona = options
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_PERSONA.to_string());
        prepared.insert(0, Message::system(persona));
    }
    if options.format == OutputFormat::Json {
        if let Some(system) = prepared.iter_mut().find(|m| m.is_system()) {
            if !system.content.contains(JSON_DIRECTIVE) {
                system.content.push_str("\n\n");
                system.content.push_str(JSON_DIRECTIVE);
            }
        }
    }
    prepared
}

/// Merge `options.extra` into a request body without clobbering core fields.
pub(crate) fn merge_extra(body: &mut Value, options: &RequestOptions) {
    if let Value::Object(map) = body {
        for (k, v) in &options.extra {
            if !matches!(k.as_str(), "model" | "messages") {
                map.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_synthesizes_persona() {
        let prepared = prepare_messages(&[Message::user("hi")], &RequestOptions::new());
        assert_eq!(prepared.len(), 2);
        assert!(prepared[0].is_system());
        assert_eq!(prepared[0].content, DEFAULT_PERSONA);
        assert_eq!(prepared[1].content, "hi");
    }

    #[test]
    fn test_prepare_uses_caller_prompt_and_json_directive() {
        let options = RequestOptions::json_strict().with_system_prompt("Be terse.");
        let prepared = prepare_messages(&[Message::user("hi")], &options);
        assert!(prepared[0].content.starts_with("Be terse."));
        assert!(prepared[0].content.ends_with(JSON_DIRECTIVE));

        // idempotent
        let again = prepare_messages(&prepared, &options);
        assert_eq!(again, prepared);
    }

    #[test]
    fn test_prepare_keeps_existing_system_and_order() {
        let msgs = vec![
            Message::user("a"),
            Message::system("custom"),
            Message::assistant("b"),
        ];
        let prepared = prepare_messages(&msgs, &RequestOptions::new());
        assert_eq!(prepared, msgs);
    }

    #[test]
    fn test_backend_kind_parse_and_serde() {
        assert_eq!("dashscope".parse::<BackendKind>().unwrap(), BackendKind::QwenCompatible);
        assert!("gemini".parse::<BackendKind>().is_err());
        let v = serde_json::to_value(BackendKind::AnthropicCompatible).unwrap();
        assert_eq!(v, "anthropic");
    }

    #[test]
    fn test_unrecognized_completion_surfaces_shape_error() {
        let c = Completion::unrecognized(r#"{"data":1}"#, "openai", "gpt-4o-mini");
        match c.into_recognized() {
            Err(Error::UpstreamShape { provider, raw }) => {
                assert_eq!(provider, "openai");
                assert!(raw.contains("data"));
            }
            other => panic!("expected UpstreamShape, got {:?}", other),
        }
    }
}
