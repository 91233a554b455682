//! 统一访问门面：缓存、模型分级、批处理、格式约束与重试的组合入口。
//!
//! The access facade.
//!
//! [`AccessService`] is the one entry point agents use. Each analysis flows
//! through cache lookup, A/B variant overrides, model tier selection and then
//! one of three dispatch paths (simulated or native stream, batch window, direct
//! call). Every dispatch path ends in the per-backend pipeline
//! `FormatEnforcer(RetryingProvider(backend provider))`.
//!
//! ```rust,no_run
//! use llm_access::config::AccessConfig;
//! use llm_access::service::AccessService;
//! use llm_access::types::RequestOptions;
//!
//! # async fn run() -> llm_access::Result<()> {
//! let service = AccessService::from_config(AccessConfig::from_env()?)?;
//! match service
//!     .analyze("Keyword: air fryer", "keyword_intent", RequestOptions::json_strict())
//!     .await
//! {
//!     Ok(analysis) => println!("{}", analysis.value),
//!     Err(e) => println!("{}", e.to_value()),
//! }
//! service.close().await;
//! # Ok(())
//! # }
//! ```

mod analyze;
mod outcome;

pub use outcome::{Analysis, AnalysisError, AnalysisSource};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

use crate::batch::BatchProcessor;
use crate::cache::{CacheManager, CacheStats, FingerprintGenerator, InflightRequests};
use crate::config::AccessConfig;
use crate::drivers::{BackendKind, HttpProvider, MockProvider, Provider};
use crate::experiments::{ABTestConfig, Variant, VariantSelector};
use crate::feedback::{EscalationHint, FeedbackLog, FeedbackRecord};
use crate::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::resilience::RetryingProvider;
use crate::routing::ModelSelector;
use crate::streaming::ChunkPlan;
use crate::structured::FormatEnforcer;
use crate::transport::{HttpTransport, TransportSettings};
use crate::{Error, Result};

/// Builder for [`AccessService`].
///
/// Providers injected with [`AccessServiceBuilder::with_provider`] replace the
/// configured backend of that kind and still get the retry and format decorators.
pub struct AccessServiceBuilder {
    config: AccessConfig,
    providers: HashMap<BackendKind, Arc<dyn Provider>>,
    transport: Option<Arc<HttpTransport>>,
    progress_callback: Option<ProgressCallback>,
    seed: Option<u64>,
    progress_retain: usize,
}

impl AccessServiceBuilder {
    pub fn new(config: AccessConfig) -> Self {
        Self {
            config,
            providers: HashMap::new(),
            transport: None,
            progress_callback: None,
            seed: None,
            progress_retain: 1024,
        }
    }

    pub fn with_provider(mut self, kind: BackendKind, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    /// Share one HTTP client across services.
    pub fn with_transport(mut self, transport: Arc<HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Seed for A/B draws and chunk sizes; reproducible runs in tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_progress_retention(mut self, n: usize) -> Self {
        self.progress_retain = n;
        self
    }

    pub fn build(self) -> Result<AccessService> {
        let config = self.config;
        if config.mock_mode || self.providers.contains_key(&config.backend) {
            config.validate_settings()?;
        } else {
            config.validate()?;
        }

        let mut transport = self.transport;
        let mut pipelines: HashMap<BackendKind, Arc<dyn Provider>> = HashMap::new();
        for kind in BackendKind::ALL {
            let vendor = config.vendors.get(kind);
            let model = vendor
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string());

            let base: Arc<dyn Provider> = if let Some(p) = self.providers.get(&kind) {
                p.clone()
            } else if config.mock_mode {
                Arc::new(MockProvider::new(kind.id(), model))
            } else if let Some(api_key) = vendor.api_key.as_deref().filter(|_| vendor.has_api_key()) {
                let shared = match transport.clone() {
                    Some(t) => t,
                    None => {
                        let settings = TransportSettings {
                            timeout: Duration::from_secs(config.http_timeout_secs),
                            ..TransportSettings::from_env()
                        };
                        let t = Arc::new(HttpTransport::new(&settings)?);
                        transport = Some(t.clone());
                        t
                    }
                };
                Arc::new(HttpProvider::new(
                    kind,
                    vendor.base_url.as_deref(),
                    api_key,
                    model,
                    shared,
                )?)
            } else {
                continue;
            };

            let retrying: Arc<dyn Provider> = Arc::new(RetryingProvider::new(base, config.retry));
            pipelines.insert(kind, Arc::new(FormatEnforcer::new(retrying, config.format)));
        }

        let selector = ModelSelector::new(config.model_tiers()).with_default_backend(config.backend);
        let mut progress = ProgressTracker::new(self.progress_retain);
        if let Some(cb) = self.progress_callback {
            progress = progress.with_callback(cb);
        }
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        info!(
            backend = %config.backend,
            mock_mode = config.mock_mode,
            backends = pipelines.len(),
            cache = config.cache.enabled,
            batch = config.batch.enabled,
            "access service ready"
        );

        Ok(AccessService {
            cache: CacheManager::from_config(config.cache.clone()),
            batch: BatchProcessor::new(config.batch.clone()),
            feedback: FeedbackLog::new(config.feedback.capacity),
            chunk_plan: ChunkPlan::default()
                .with_delay(Duration::from_millis(config.stream_chunk_delay_ms)),
            keys: FingerprintGenerator::new(),
            inflight: InflightRequests::new(),
            experiments: VariantSelector::new(),
            rng: Mutex::new(rng),
            closed: AtomicBool::new(false),
            pipelines,
            selector,
            progress,
            config,
        })
    }
}

/// The LLM access facade. Construct once and share behind an `Arc`.
pub struct AccessService {
    config: AccessConfig,
    pipelines: HashMap<BackendKind, Arc<dyn Provider>>,
    selector: ModelSelector,
    cache: CacheManager,
    keys: FingerprintGenerator,
    inflight: InflightRequests,
    batch: BatchProcessor,
    progress: ProgressTracker,
    feedback: FeedbackLog,
    experiments: VariantSelector,
    rng: Mutex<StdRng>,
    chunk_plan: ChunkPlan,
    closed: AtomicBool,
}

impl AccessService {
    pub fn builder(config: AccessConfig) -> AccessServiceBuilder {
        AccessServiceBuilder::new(config)
    }

    pub fn from_config(config: AccessConfig) -> Result<Self> {
        AccessServiceBuilder::new(config).build()
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    /// Backends with a usable pipeline, in declaration order.
    pub fn backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.pipelines.contains_key(k))
            .collect()
    }

    /// Activate an A/B test, replacing any active one.
    pub fn configure_ab_test(&self, test_id: &str, variants: Vec<Variant>) -> Result<()> {
        let test = ABTestConfig::new(test_id, variants)?;
        info!(test_id, variants = test.variants().len(), "A/B test configured");
        self.experiments.configure(test);
        Ok(())
    }

    pub fn clear_ab_test(&self) {
        self.experiments.clear();
    }

    pub fn active_ab_test(&self) -> Option<Arc<ABTestConfig>> {
        self.experiments.active()
    }

    /// Rate a completed analysis from 1 to 5.
    ///
    /// With self-optimization on, a rating below 3 records an advisory
    /// [`EscalationHint`]; model bindings are never changed.
    pub fn submit_feedback(
        &self,
        request_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> Result<()> {
        let record = self.feedback.rate(request_id, rating, comment)?;
        info!(request_id, rating, model = %record.model, "feedback recorded");

        if self.config.feedback.self_optimize {
            if let Some(hint) = EscalationHint::for_record(&record) {
                info!(
                    request_id,
                    analysis_type = %hint.analysis_type,
                    model = %hint.model,
                    suggested_tier = hint.suggested_tier.as_str(),
                    "low rating, stronger model suggested"
                );
                self.feedback.push_hint(hint);
            }
        }
        Ok(())
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    pub fn progress(&self, request_id: &str) -> Option<ProgressUpdate> {
        self.progress.get(request_id)
    }

    pub fn feedback_records(&self) -> Vec<FeedbackRecord> {
        self.feedback.records()
    }

    pub fn escalation_hints(&self) -> Vec<EscalationHint> {
        self.feedback.hints()
    }

    /// Requests waiting in open batch windows.
    pub fn pending_batched(&self) -> usize {
        self.batch.pending()
    }

    /// Flush open batch windows; later analyses fail with `Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.batch.pending();
        self.batch.close().await;
        info!(flushed = pending, "access service closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pipeline(&self, backend: BackendKind) -> Result<Arc<dyn Provider>> {
        self.pipelines.get(&backend).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("backend '{}' is not configured", backend),
                crate::error::ErrorContext::new()
                    .with_field_path(format!("vendors.{}.api_key", backend.id())),
            )
        })
    }

    fn draw<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }

    /// Fresh seed for a task-local generator that lives across awaits.
    fn next_seed(&self) -> u64 {
        self.draw(|rng| rng.random())
    }
}
