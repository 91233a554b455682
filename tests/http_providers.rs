//! Vendor adapters against a local mock HTTP server.

use llm_access::drivers::HttpProvider;
use llm_access::resilience::{RetryPolicy, RetryingProvider};
use llm_access::transport::{HttpTransport, TransportSettings};
use llm_access::{
    AccessConfig, AccessService, BackendKind, Error, ErrorKind, Message, Provider, RequestOptions,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;

fn transport() -> Arc<HttpTransport> {
    Arc::new(HttpTransport::new(&TransportSettings::default()).expect("client builds"))
}

fn provider(kind: BackendKind, base_url: &str, key: &str, model: &str) -> HttpProvider {
    HttpProvider::new(kind, Some(base_url), key, model, transport()).expect("provider builds")
}

#[tokio::test]
async fn openai_envelope_and_request_shape() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-openai")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"ok\":true}"}}]}"#)
        .create_async()
        .await;

    let p = provider(BackendKind::OpenAiCompatible, &server.url(), "sk-openai", "gpt-4o-mini");
    let options = RequestOptions::json_strict().with_temperature(0.2);
    let c = p.call(&[Message::user("hi")], &options).await.unwrap();

    mock.assert_async().await;
    assert!(c.is_recognized());
    assert_eq!(c.text, r#"{"ok":true}"#);
    assert_eq!(c.provider, "openai");
}

#[tokio::test]
async fn anthropic_lifts_system_and_sets_headers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/messages")
        .match_header("x-api-key", "sk-ant")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJson(json!({
            "model": "claude-3-5-haiku-latest",
            "system": "Be brief.",
            "max_tokens": 4096,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"content":[{"type":"text","text":"Hello"},{"type":"text","text":" there"}]}"#)
        .create_async()
        .await;

    let p = provider(
        BackendKind::AnthropicCompatible,
        &server.url(),
        "sk-ant",
        "claude-3-5-haiku-latest",
    );
    let c = p
        .call(
            &[Message::system("Be brief."), Message::user("hi")],
            &RequestOptions::new(),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(c.text, "Hello there");
}

#[tokio::test]
async fn qwen_native_envelope_fallback() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-qwen")
        .with_status(200)
        .with_body(r#"{"output":{"text":"native answer"},"request_id":"abc"}"#)
        .create_async()
        .await;

    let p = provider(BackendKind::QwenCompatible, &server.url(), "sk-qwen", "qwen-plus");
    let c = p.call(&[Message::user("hi")], &RequestOptions::new()).await.unwrap();
    assert!(c.is_recognized());
    assert_eq!(c.text, "native answer");
}

#[tokio::test]
async fn unrecognized_envelope_passes_raw_body() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"unexpected": {"shape": 1}}"#)
        .create_async()
        .await;

    let p = provider(BackendKind::OpenAiCompatible, &server.url(), "k", "gpt-4o-mini");
    let c = p.call(&[Message::user("hi")], &RequestOptions::new()).await.unwrap();
    assert!(!c.is_recognized());
    assert!(c.text.contains("unexpected"));
    assert!(matches!(
        c.into_recognized(),
        Err(Error::UpstreamShape { ref provider, .. }) if provider == "openai"
    ));
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("retry-after", "1")
        .with_body(r#"{"error":{"message":"slow down"}}"#)
        .create_async()
        .await;

    let p = provider(BackendKind::OpenAiCompatible, &server.url(), "k", "gpt-4o-mini");
    let err = p.call(&[Message::user("hi")], &RequestOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(err.retry_after_ms(), Some(1000));
    assert!(err.to_string().contains("slow down"));
}

#[tokio::test]
async fn client_errors_are_terminal() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(400)
        .with_body(r#"{"error":{"message":"bad model"}}"#)
        .expect(1)
        .create_async()
        .await;

    let inner = Arc::new(provider(BackendKind::OpenAiCompatible, &server.url(), "k", "nope"));
    let retrying = RetryingProvider::new(inner, RetryPolicy::new(3, 1));
    let err = retrying
        .call(&[Message::user("hi")], &RequestOptions::new())
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), ErrorKind::Client);
    assert_eq!(err.retries(), 0);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("upstream unavailable")
        .expect(2)
        .create_async()
        .await;

    let inner = Arc::new(provider(BackendKind::QwenCompatible, &server.url(), "k", "qwen-plus"));
    let retrying = RetryingProvider::new(inner, RetryPolicy::new(1, 1));
    let err = retrying
        .call(&[Message::user("hi")], &RequestOptions::new())
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.retries(), 1);
}

#[tokio::test]
async fn service_routes_to_configured_vendor() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"model": "qwen-turbo"})))
        .with_status(200)
        .with_body(
            r#"{"choices":[{"message":{"content":"```json\n{\"intent\":\"informational\"}\n```"}}]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let mut config = AccessConfig::default();
    config.backend = BackendKind::QwenCompatible;
    config.vendors.qwen.api_key = Some("sk-qwen".into());
    config.vendors.qwen.base_url = Some(server.url());
    let service = AccessService::from_config(config).unwrap();
    assert_eq!(service.backends(), vec![BackendKind::QwenCompatible]);

    for _ in 0..2 {
        let a = service
            .analyze("what is an air fryer", "keyword_intent", RequestOptions::json_strict())
            .await
            .unwrap();
        assert_eq!(a.value, json!({"intent": "informational"}));
        assert_eq!(a.backend, BackendKind::QwenCompatible);
    }
    mock.assert_async().await;
}
