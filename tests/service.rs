//! End-to-end tests for the access facade against offline providers.

use async_trait::async_trait;
use llm_access::drivers::mock::{MockProvider, MockReply};
use llm_access::experiments::Variant;
use llm_access::progress::ProgressUpdate;
use llm_access::search::{AutocompleteSuggestion, SearchEngine, SearchOptions, SearchResult};
use llm_access::types::OptionOverrides;
use llm_access::{
    AccessConfig, AccessService, AnalysisSource, BackendKind, Completion, Error, ErrorKind,
    Message, Provider, RequestOptions,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fast_config() -> AccessConfig {
    let mut c = AccessConfig::mock();
    c.retry.base_delay_ms = 1;
    c.format.backoff_base_ms = 1;
    c.stream_chunk_delay_ms = 0;
    c
}

fn service(mock: Arc<MockProvider>, config: AccessConfig) -> AccessService {
    AccessService::builder(config)
        .with_provider(BackendKind::OpenAiCompatible, mock)
        .with_seed(2024)
        .build()
        .expect("service builds")
}

/// Fails any request whose prompt mentions FAIL.
struct SelectiveProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for SelectiveProvider {
    async fn call(
        &self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> llm_access::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = &messages[messages.len() - 1].content;
        if prompt.contains("FAIL") {
            return Err(Error::validation("upstream rejected the prompt"));
        }
        Ok(Completion::recognized(
            format!("answer to {}", prompt),
            "selective",
            options.model.clone().unwrap_or_default(),
        ))
    }

    fn name(&self) -> &str {
        "selective"
    }
}

#[tokio::test]
async fn fenced_json_parses_without_retry() {
    let mock = Arc::new(MockProvider::default().with_script([MockReply::Text(
        "Here you go:\n```json\n{\"intent\": \"commercial\", \"score\": 0.8}\n```".into(),
    )]));
    let service = service(mock.clone(), fast_config());

    let a = service
        .analyze("air fryer", "keyword_intent", RequestOptions::json_strict())
        .await
        .unwrap();
    assert_eq!(a.value, json!({"intent": "commercial", "score": 0.8}));
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn malformed_output_is_reissued_until_valid() {
    let mock = Arc::new(MockProvider::default().with_script([
        MockReply::Text("I think the intent is commercial".into()),
        MockReply::Text("{\"intent\": ".into()),
        MockReply::Text("{\"intent\": \"commercial\"}".into()),
    ]));
    let service = service(mock.clone(), fast_config());

    let a = service
        .analyze("air fryer", "keyword_intent", RequestOptions::json_strict())
        .await
        .unwrap();
    assert_eq!(a.value["intent"], "commercial");
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn format_retries_exhausted_reports_attempts() {
    let mock = Arc::new(MockProvider::default().with_script([
        MockReply::Text("nope".into()),
        MockReply::Text("still nope".into()),
    ]));
    let service = service(mock.clone(), fast_config());

    let err = service
        .analyze(
            "air fryer",
            "keyword_intent",
            RequestOptions::json_strict().with_max_json_retries(1),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FormatValidation);
    assert_eq!(err.retries, 1);
    assert!(err.message.contains("still nope"));
}

#[tokio::test]
async fn identical_calls_hit_upstream_once() {
    let mock = Arc::new(MockProvider::default());
    let service = service(mock.clone(), fast_config());
    let options = RequestOptions::new().with_temperature(0.3);

    let first = service.analyze("same prompt", "keyword", options.clone()).await.unwrap();
    let second = service.analyze("same prompt", "keyword", options).await.unwrap();

    assert_eq!(mock.calls(), 1);
    assert_eq!(first.source, AnalysisSource::Direct);
    assert_eq!(second.source, AnalysisSource::Cache);
    assert_eq!(first.value, second.value);
    assert_ne!(first.request_id, second.request_id);

    let stats = service.cache_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.sets, 1);
}

#[tokio::test]
async fn concurrent_identical_calls_share_one_upstream_call() {
    let mock = Arc::new(MockProvider::default().with_latency(Duration::from_millis(50)));
    let service = service(mock.clone(), fast_config());
    let options = RequestOptions::new();

    let (a, b) = tokio::join!(
        service.analyze("same prompt", "keyword", options.clone()),
        service.analyze("same prompt", "keyword", options.clone()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(mock.calls(), 1);
    assert_eq!(a.value, b.value);
    let mut sources = [a.source, b.source];
    sources.sort_by_key(|s| *s == AnalysisSource::Cache);
    assert_eq!(sources, [AnalysisSource::Direct, AnalysisSource::Cache]);

    let batch = service
        .analyze_batch(&["repeat", "repeat", "repeat"], "keyword", options)
        .await;
    assert!(batch.iter().all(|r| r.is_ok()));
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn failed_leader_lets_waiting_twin_retry() {
    let mock = Arc::new(
        MockProvider::default()
            .with_latency(Duration::from_millis(30))
            .with_script([MockReply::Fail(Error::validation("rejected"))]),
    );
    let service = service(mock.clone(), fast_config());

    let (a, b) = tokio::join!(
        service.analyze("twin", "keyword", RequestOptions::new()),
        service.analyze("twin", "keyword", RequestOptions::new()),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn cache_opt_out_always_calls_upstream() {
    let mock = Arc::new(MockProvider::default());
    let service = service(mock.clone(), fast_config());
    let options = RequestOptions::new().with_cache(false);

    service.analyze("p", "keyword", options.clone()).await.unwrap();
    service.analyze("p", "keyword", options).await.unwrap();
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn upstream_failure_becomes_error_object() {
    let mock = Arc::new(MockProvider::default().with_script([
        MockReply::Fail(Error::server(503, "overloaded")),
        MockReply::Fail(Error::server(503, "overloaded")),
        MockReply::Fail(Error::server(503, "overloaded")),
    ]));
    let service = service(mock.clone(), fast_config());

    let err = service
        .analyze("p", "keyword", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(mock.calls(), 3);
    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(err.retries, 2);

    let v = err.to_value();
    for key in ["error", "message", "modelType", "endpoint", "retries"] {
        assert!(v.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(v["modelType"], "gpt-4o-mini");
    assert_eq!(v["retries"], 2);
}

#[tokio::test]
async fn batch_members_fail_independently() {
    let mut config = fast_config();
    config.batch.enabled = true;
    config.batch.window_ms = 30;
    let provider = Arc::new(SelectiveProvider {
        calls: AtomicUsize::new(0),
    });
    let service = AccessService::builder(config)
        .with_provider(BackendKind::OpenAiCompatible, provider.clone())
        .build()
        .unwrap();

    let results = service
        .analyze_batch(&["first", "FAIL second", "third"], "keyword", RequestOptions::new())
        .await;

    assert_eq!(results.len(), 3);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.source, AnalysisSource::Batch);
    assert!(first.value["content"].as_str().unwrap().ends_with("first"));
    assert_eq!(results[1].as_ref().unwrap_err().kind, ErrorKind::Validation);
    assert!(results[2].as_ref().unwrap().value["content"]
        .as_str()
        .unwrap()
        .ends_with("third"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn progress_callback_sees_monotonic_percentages() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let service = AccessService::builder(fast_config())
        .with_progress_callback(Arc::new(move |u: &ProgressUpdate| {
            sink.lock().unwrap().push(u.percent)
        }))
        .build()
        .unwrap();

    service.analyze("p", "keyword", RequestOptions::new()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
}

#[tokio::test]
async fn ab_variants_follow_weights() {
    let mock = Arc::new(MockProvider::default());
    let service = service(mock, fast_config());

    assert!(service.configure_ab_test("empty", vec![]).is_err());
    service
        .configure_ab_test(
            "temperature",
            vec![
                Variant::new("control", 3.0),
                Variant::new("never", 0.0),
                Variant::new("warm", 1.0).with_overrides(OptionOverrides {
                    temperature: Some(0.9),
                    ..Default::default()
                }),
            ],
        )
        .unwrap();

    let n = 400;
    let mut control = 0;
    for i in 0..n {
        let a = service
            .analyze(&format!("prompt {}", i), "keyword", RequestOptions::new())
            .await
            .unwrap();
        match a.variant_id.as_deref() {
            Some("control") => control += 1,
            Some("warm") => {}
            other => panic!("unexpected variant {:?}", other),
        }
    }
    let share = control as f64 / n as f64;
    assert!((share - 0.75).abs() < 0.1, "control share {}", share);

    service.clear_ab_test();
    let a = service.analyze("after", "keyword", RequestOptions::new()).await.unwrap();
    assert!(a.variant_id.is_none());
}

#[tokio::test]
async fn overflowing_ab_weights_are_rejected() {
    let service = service(Arc::new(MockProvider::default()), fast_config());
    let err = service
        .configure_ab_test(
            "big",
            vec![Variant::new("a", f64::MAX), Variant::new("b", f64::MAX)],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(service.active_ab_test().is_none());

    let a = service.analyze("still works", "keyword", RequestOptions::new()).await.unwrap();
    assert!(a.variant_id.is_none());
}

#[tokio::test]
async fn feedback_rating_and_escalation_hints() {
    let mut config = fast_config();
    config.feedback.self_optimize = true;
    let service = service(Arc::new(MockProvider::default()), config);

    let a = service.analyze("p", "competitor", RequestOptions::new()).await.unwrap();
    assert_eq!(service.feedback_records().len(), 1);

    service
        .submit_feedback(&a.request_id, 2, Some("too shallow".into()))
        .unwrap();
    let hints = service.escalation_hints();
    assert_eq!(hints.len(), 1);
    assert_eq!(hints[0].analysis_type, "competitor");

    service.submit_feedback(&a.request_id, 5, None).unwrap();
    assert_eq!(service.escalation_hints().len(), 1);

    assert!(matches!(
        service.submit_feedback("no-such-request", 4, None),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        service.submit_feedback(&a.request_id, 6, None),
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn closed_service_rejects_calls() {
    let service = service(Arc::new(MockProvider::default()), fast_config());
    service.close().await;
    let err = service
        .analyze("p", "keyword", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Closed);
}

#[test]
fn missing_api_key_is_configuration_error() {
    let mut config = AccessConfig::default();
    config.backend = BackendKind::QwenCompatible;
    let err = AccessService::from_config(config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

struct FakeEngine;

#[async_trait]
impl SearchEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn get_suggestions(&self, keyword: &str) -> llm_access::Result<Vec<AutocompleteSuggestion>> {
        Ok(vec![AutocompleteSuggestion::new(format!("{} reviews", keyword))])
    }

    async fn get_search_results(
        &self,
        keyword: &str,
        options: &SearchOptions,
    ) -> llm_access::Result<Vec<SearchResult>> {
        assert_eq!(options.max_results, 10);
        Ok(vec![SearchResult {
            title: format!("All about {}", keyword),
            url: "https://example.com".into(),
            snippet: String::new(),
            position: Some(1),
        }])
    }
}

#[tokio::test]
async fn search_data_reaches_the_prompt() {
    let mock = Arc::new(MockProvider::default());
    let service = service(mock.clone(), fast_config());
    let a = service
        .analyze_search(&FakeEngine, "standing desk", "serp", RequestOptions::new())
        .await
        .unwrap();
    assert!(a.value["content"]
        .as_str()
        .unwrap()
        .contains("Keyword: \"standing desk\""));
    assert_eq!(mock.calls(), 1);
}
