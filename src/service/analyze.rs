use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{Fingerprint, Flight};
use crate::drivers::{BackendKind, Completion, Provider, DEFAULT_PERSONA};
use crate::feedback::FeedbackRecord;
use crate::progress::ProgressStage;
use crate::search::{build_search_prompt, SearchEngine, SearchOptions};
use crate::streaming;
use crate::structured::parse_lenient;
use crate::types::{ChunkCallback, Message, OutputFormat, RequestOptions, StreamingEvent};
use crate::{Error, Result};

use super::{AccessService, Analysis, AnalysisError, AnalysisSource};

/// System prompt used when the caller does not supply one.
pub(crate) fn persona(analysis_type: &str) -> String {
    format!("{} You are performing a {} analysis.", DEFAULT_PERSONA, analysis_type)
}

/// Structured value for an output: parsed JSON, or the text wrapped in an object.
pub(crate) fn parse_output(text: &str, format: OutputFormat) -> Value {
    match format {
        OutputFormat::Json => parse_lenient(text).unwrap_or_else(|| json!({ "raw": text })),
        OutputFormat::Text | OutputFormat::Markdown => json!({ "content": text }),
    }
}

impl AccessService {
    /// Run one analysis.
    pub async fn analyze(
        &self,
        prompt: &str,
        analysis_type: &str,
        options: RequestOptions,
    ) -> std::result::Result<Analysis, AnalysisError> {
        self.run(prompt, analysis_type, options, None).await
    }

    /// Run one analysis, delivering the output in chunks as it is produced.
    ///
    /// Providers without native streaming make a full call first; the text is
    /// then replayed as short chunks with progress moving from 30% to 90%.
    /// A failed stream, including one cut short by the call budget, still ends
    /// with [`StreamingEvent::StreamEnd`] whose finish reason is the error kind.
    /// Cache hits return without any events.
    pub async fn analyze_streaming(
        &self,
        prompt: &str,
        analysis_type: &str,
        options: RequestOptions,
        on_event: ChunkCallback,
    ) -> std::result::Result<Analysis, AnalysisError> {
        self.run(prompt, analysis_type, options.with_stream(true), Some(on_event))
            .await
    }

    /// Analyze many prompts concurrently. Results keep the input order and each
    /// member fails on its own.
    pub async fn analyze_batch<S: AsRef<str>>(
        &self,
        prompts: &[S],
        analysis_type: &str,
        options: RequestOptions,
    ) -> Vec<std::result::Result<Analysis, AnalysisError>> {
        join_all(
            prompts
                .iter()
                .map(|p| self.analyze(p.as_ref(), analysis_type, options.clone())),
        )
        .await
    }

    /// Collect engine data for `keyword` and analyze it.
    pub async fn analyze_search(
        &self,
        engine: &dyn SearchEngine,
        keyword: &str,
        analysis_type: &str,
        options: RequestOptions,
    ) -> std::result::Result<Analysis, AnalysisError> {
        let gathered = async {
            let suggestions = engine.get_suggestions(keyword).await?;
            let results = engine
                .get_search_results(keyword, &SearchOptions::default())
                .await?;
            Ok::<_, Error>((suggestions, results))
        }
        .await;

        let (suggestions, results) = gathered.map_err(|e| {
            warn!(engine = engine.name(), keyword, error = %e, "search collaborator failed");
            AnalysisError::from_error(Uuid::new_v4().to_string(), &e, None, None)
        })?;
        let prompt = build_search_prompt(engine.name(), keyword, &suggestions, &results);
        self.analyze(&prompt, analysis_type, options).await
    }

    async fn run(
        &self,
        prompt: &str,
        analysis_type: &str,
        mut options: RequestOptions,
        on_event: Option<ChunkCallback>,
    ) -> std::result::Result<Analysis, AnalysisError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        self.progress.stage(&request_id, ProgressStage::Started);

        let fail = |err: Error, model: Option<String>, endpoint: Option<String>| {
            self.progress.stage(&request_id, ProgressStage::Failed);
            AnalysisError::from_error(&request_id, &err, model, endpoint)
        };

        if self.is_closed() {
            return Err(fail(Error::Closed, None, None));
        }

        let system = options
            .system_prompt
            .clone()
            .unwrap_or_else(|| persona(analysis_type));
        let messages = vec![Message::system(system), Message::user(prompt)];

        let assignment = self.draw(|rng| self.experiments.assign(rng));
        if let Some(ref a) = assignment {
            a.overrides.apply(&mut options);
            debug!(request_id = %request_id, test_id = %a.test_id, variant = %a.variant_id, "A/B variant assigned");
        }

        let pinned = options.model.is_some();
        let estimate = self.selector.estimate(&messages, &options);
        let target = self.selector.select(&messages, &options);
        let backend = target
            .backend
            .or(options.backend)
            .unwrap_or(self.config.backend);
        let model = target.model;
        options.model = Some(model.clone());
        options.backend = Some(backend);
        self.progress.stage(&request_id, ProgressStage::Prepared);

        let pipeline = self
            .pipeline(backend)
            .map_err(|e| fail(e, Some(model.clone()), None))?;
        let endpoint = pipeline.endpoint();

        let budget_ms = options.timeout_ms.unwrap_or(self.config.call_budget_ms);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(budget_ms);
        let cache_key = (self.cache.is_enabled() && options.cache.unwrap_or(true))
            .then(|| self.keys.fingerprint(&messages, &options));

        // A failed stream still ends with `StreamEnd`, carrying the error kind.
        let stream_cb = on_event.clone().filter(|_| options.stream);
        let end_stream = |err: &Error| {
            if let Some(cb) = &stream_cb {
                cb(StreamingEvent::StreamEnd {
                    finish_reason: Some(err.kind().as_str().to_string()),
                });
            }
        };

        // Identical requests in flight share one upstream call: followers wait
        // for the leader to land, then read its result from the cache.
        let mut flight = None;
        if let Some(ref key) = cache_key {
            loop {
                if let Some(value) = self.cached(&request_id, key).await {
                    self.progress.stage(&request_id, ProgressStage::Completed);
                    return Ok(Analysis {
                        request_id,
                        value,
                        model,
                        backend,
                        source: AnalysisSource::Cache,
                        variant_id: assignment.map(|a| a.variant_id),
                    });
                }
                match self.inflight.join(key) {
                    Flight::Leader(guard) => {
                        flight = Some(guard);
                        break;
                    }
                    Flight::Follower(waiter) => {
                        debug!(request_id = %request_id, "waiting for identical request in flight");
                        if tokio::time::timeout_at(deadline, waiter.landed()).await.is_err() {
                            let err = Error::Timeout { budget_ms };
                            end_stream(&err);
                            return Err(fail(err, Some(model), endpoint));
                        }
                    }
                }
            }
        }
        self.progress.stage(&request_id, ProgressStage::CacheChecked);

        let dispatched = tokio::time::timeout_at(
            deadline,
            self.dispatch(&request_id, pipeline, backend, &messages, &options, on_event),
        )
        .await
        .unwrap_or(Err(Error::Timeout { budget_ms }));

        let (completion, source) = match dispatched {
            Ok(done) => done,
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    model = %model,
                    backend = %backend,
                    retries = e.retries(),
                    error = %e,
                    "analysis failed"
                );
                end_stream(&e);
                return Err(fail(e, Some(model), endpoint));
            }
        };

        self.progress.stage(&request_id, ProgressStage::Parsing);
        let value = parse_output(&completion.text, options.format);

        if let Some(ref key) = cache_key {
            if completion.is_recognized() {
                if let Err(e) = self.cache.set(key, &value).await {
                    warn!(request_id = %request_id, error = %e, "cache write failed");
                }
            }
        }
        drop(flight);

        if self.config.feedback.enabled {
            let mut record = FeedbackRecord::new(
                &request_id,
                prompt,
                value.clone(),
                &completion.model,
                analysis_type,
            );
            if !pinned {
                record = record.with_tier(estimate.tier);
            }
            self.feedback.record(record);
        }

        self.progress.stage(&request_id, ProgressStage::Completed);
        info!(
            request_id = %request_id,
            model = %completion.model,
            backend = %backend,
            source = ?source,
            duration_ms = started.elapsed().as_millis() as u64,
            "analysis completed"
        );

        Ok(Analysis {
            request_id,
            value,
            model: completion.model,
            backend,
            source,
            variant_id: assignment.map(|a| a.variant_id),
        })
    }

    async fn cached(&self, request_id: &str, key: &Fingerprint) -> Option<Value> {
        match self.cache.get::<Value>(key).await {
            Ok(Some(value)) => {
                debug!(request_id = %request_id, "cache hit");
                Some(value)
            }
            Ok(None) => {
                debug!(request_id = %request_id, "cache miss");
                None
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn dispatch(
        &self,
        request_id: &str,
        pipeline: Arc<dyn Provider>,
        backend: BackendKind,
        messages: &[Message],
        options: &RequestOptions,
        on_event: Option<ChunkCallback>,
    ) -> Result<(Completion, AnalysisSource)> {
        self.progress.stage(request_id, ProgressStage::Dispatching);

        if let Some(on_event) = on_event.filter(|_| options.stream) {
            if pipeline.supports_native_streaming() {
                let completion = pipeline.call_stream(messages, options, on_event).await?;
                return Ok((completion, AnalysisSource::Stream));
            }
            let completion = pipeline.call(messages, options).await?;
            let mut rng = StdRng::seed_from_u64(self.next_seed());
            streaming::deliver(
                request_id,
                &completion.text,
                &self.chunk_plan,
                &mut rng,
                &on_event,
                &self.progress,
            )
            .await;
            return Ok((completion, AnalysisSource::Stream));
        }

        if self.config.batch.enabled && options.batch.unwrap_or(true) {
            let completion = self
                .batch
                .submit(pipeline, backend, messages.to_vec(), options.clone())
                .await?;
            return Ok((completion, AnalysisSource::Batch));
        }

        let completion = pipeline.call(messages, options).await?;
        Ok((completion, AnalysisSource::Direct))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessConfig;
    use crate::drivers::mock::{MockProvider, MockReply};
    use crate::error::ErrorKind;
    use crate::experiments::Variant;
    use crate::types::{OptionOverrides, StreamingEvent};
    use std::sync::Mutex;

    fn service_with(mock: Arc<MockProvider>, config: AccessConfig) -> AccessService {
        AccessService::builder(config)
            .with_provider(BackendKind::OpenAiCompatible, mock)
            .with_seed(11)
            .build()
            .unwrap()
    }

    fn quick_config() -> AccessConfig {
        let mut c = AccessConfig::mock();
        c.retry.base_delay_ms = 1;
        c.format.backoff_base_ms = 1;
        c.stream_chunk_delay_ms = 0;
        c
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(
            parse_output("```json\n{\"a\":1}\n```", OutputFormat::Json),
            json!({"a": 1})
        );
        assert_eq!(
            parse_output("not json at all", OutputFormat::Json),
            json!({"raw": "not json at all"})
        );
        assert_eq!(
            parse_output("# Title", OutputFormat::Markdown),
            json!({"content": "# Title"})
        );
    }

    #[test]
    fn test_persona_names_analysis_type() {
        assert!(persona("competitor").contains("competitor analysis"));
    }

    #[tokio::test]
    async fn test_progress_reaches_completion() {
        let mock = Arc::new(MockProvider::default());
        let service = service_with(mock, quick_config());
        let a = service
            .analyze("short prompt", "keyword", RequestOptions::new())
            .await
            .unwrap();
        let p = service.progress(&a.request_id).unwrap();
        assert_eq!(p.stage, ProgressStage::Completed);
        assert_eq!(p.percent, 100);
        assert_eq!(a.source, AnalysisSource::Direct);
        assert_eq!(a.value["content"].as_str().map(|s| s.contains("short prompt")), Some(true));
    }

    #[tokio::test]
    async fn test_tier_model_reaches_provider() {
        let mock = Arc::new(MockProvider::default());
        let service = service_with(mock.clone(), quick_config());
        service
            .analyze(&"x".repeat(9000), "keyword", RequestOptions::new())
            .await
            .unwrap();
        let seen = mock.seen_options();
        assert_eq!(seen[0].model.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn test_variant_overrides_applied() {
        let mock = Arc::new(MockProvider::default());
        let service = service_with(mock.clone(), quick_config());
        service
            .configure_ab_test(
                "temp",
                vec![Variant::new("hot", 1.0).with_overrides(OptionOverrides {
                    temperature: Some(0.95),
                    ..Default::default()
                })],
            )
            .unwrap();
        let a = service
            .analyze("p", "keyword", RequestOptions::new().with_temperature(0.1))
            .await
            .unwrap();
        assert_eq!(a.variant_id.as_deref(), Some("hot"));
        assert_eq!(mock.seen_options()[0].temperature, Some(0.95));
    }

    #[tokio::test]
    async fn test_simulated_stream_delivers_full_text() {
        let text = "A fairly long answer that will be cut into several chunks.";
        let mock = Arc::new(MockProvider::default().with_script([MockReply::Text(text.into())]));
        let service = service_with(mock, quick_config());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let a = service
            .analyze_streaming(
                "p",
                "keyword",
                RequestOptions::new(),
                Arc::new(move |e: StreamingEvent| sink.lock().unwrap().push(e)),
            )
            .await
            .unwrap();

        assert_eq!(a.source, AnalysisSource::Stream);
        let events = events.lock().unwrap();
        let body: String = events.iter().filter_map(|e| e.delta()).collect();
        assert_eq!(body, text);
        assert!(events.len() > 2);
    }

    #[tokio::test]
    async fn test_stream_cut_by_budget_still_ends() {
        let text = "An answer long enough to need many chunks before the budget runs out.";
        let mock = Arc::new(MockProvider::default().with_script([MockReply::Text(text.into())]));
        let mut config = quick_config();
        config.stream_chunk_delay_ms = 30;
        let service = service_with(mock, config);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let err = service
            .analyze_streaming(
                "p",
                "keyword",
                RequestOptions::new().with_timeout_ms(80),
                Arc::new(move |e: StreamingEvent| sink.lock().unwrap().push(e)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| e.delta().is_some()));
        let body: String = events.iter().filter_map(|e| e.delta()).collect();
        assert!(body.len() < text.len());
        assert_eq!(
            events.last(),
            Some(&StreamingEvent::StreamEnd {
                finish_reason: Some("timeout".into())
            })
        );
    }

    #[tokio::test]
    async fn test_budget_exceeded_is_timeout() {
        let mock = Arc::new(MockProvider::default().with_latency(Duration::from_millis(200)));
        let service = service_with(mock, quick_config());
        let err = service
            .analyze("p", "keyword", RequestOptions::new().with_timeout_ms(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(
            service.progress(&err.request_id).unwrap().stage,
            ProgressStage::Failed
        );
    }

    #[tokio::test]
    async fn test_unconfigured_backend() {
        let mut config = AccessConfig::default();
        config.vendors.openai.api_key = None;
        let service = AccessService::builder(config)
            .with_provider(BackendKind::OpenAiCompatible, Arc::new(MockProvider::default()))
            .build()
            .unwrap();
        let err = service
            .analyze(
                "p",
                "keyword",
                RequestOptions::new().with_backend(BackendKind::QwenCompatible),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert_eq!(err.model.as_deref(), Some("qwen-turbo"));
    }
}
