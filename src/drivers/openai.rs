//! OpenAI Chat Completions 兼容驱动
//!
//! OpenAI-compatible driver. Also the wire format for most "compatible mode"
//! gateways, so the message conversion is shared with [`super::qwen`].

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::types::{Message, OutputFormat, RequestOptions};
use crate::Result;

use super::{merge_extra, BackendKind, DriverRequest, ProviderDriver};

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiDriver;

/// `messages` array in Chat Completions form, order preserved.
pub(crate) fn chat_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut obj = json!({ "role": m.role.as_str(), "content": m.content });
            if let Some(ref name) = m.name {
                obj["name"] = Value::String(name.clone());
            }
            obj
        })
        .collect()
}

/// Chat Completions request body shared by compatible backends.
pub(crate) fn chat_body(messages: &[Message], model: &str, options: &RequestOptions) -> Value {
    let mut body = json!({
        "model": model,
        "messages": chat_messages(messages),
    });
    if let Some(t) = options.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(mt) = options.max_tokens {
        body["max_tokens"] = json!(mt);
    }
    if options.format == OutputFormat::Json {
        body["response_format"] = json!({ "type": "json_object" });
    }
    merge_extra(&mut body, options);
    body
}

pub(crate) fn bearer(api_key: &str) -> Vec<(String, String)> {
    vec![("authorization".into(), format!("Bearer {}", api_key))]
}

impl ProviderDriver for OpenAiDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAiCompatible
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
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_build_request() {
        let options = RequestOptions::json_strict()
            .with_temperature(0.7)
            .with_max_tokens(1024)
            .with_extra("seed", json!(7));
        let msgs = vec![Message::system("sys"), Message::user("Hello")];
        let req = OpenAiDriver.build_request(&msgs, "gpt-4o", &options).unwrap();

        assert_eq!(req.path, "/chat/completions");
        assert_eq!(req.body["model"], "gpt-4o");
        assert_eq!(req.body["temperature"], 0.7);
        assert_eq!(req.body["max_tokens"], 1024);
        assert_eq!(req.body["response_format"]["type"], "json_object");
        assert_eq!(req.body["seed"], 7);
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert_eq!(req.body["messages"][1]["content"], "Hello");
    }

    #[test]
    fn test_text_format_omits_response_format() {
        let req = OpenAiDriver
            .build_request(&[Message::user("x")], "gpt-4o-mini", &RequestOptions::new())
            .unwrap();
        assert!(req.body.get("response_format").is_none());
        assert!(req.body.get("temperature").is_none());
    }

    #[test]
    fn test_openai_extract_text() {
        let body = json!({
            "choices": [{"message": {"content": "Hi there!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        assert_eq!(OpenAiDriver.extract_text(&body).as_deref(), Some("Hi there!"));
        assert!(OpenAiDriver.extract_text(&json!({"output": {}})).is_none());
    }

    #[test]
    fn test_bearer_auth() {
        let headers = OpenAiDriver.auth_headers("sk-test");
        assert_eq!(headers[0].0, "authorization");
        assert_eq!(headers[0].1, "Bearer sk-test");
    }
}
