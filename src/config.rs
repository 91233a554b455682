//! 配置：环境变量与 YAML 文件加载、校验。
//!
//! Service configuration.
//!
//! [`AccessConfig`] is plain serde data. It is loaded from the environment
//! ([`AccessConfig::from_env`]) or from YAML, and checked once by
//! [`AccessConfig::validate`] before a service is built from it.
//!
//! ```rust
//! use llm_access::config::AccessConfig;
//! use llm_access::drivers::BackendKind;
//!
//! let yaml = r#"
//! backend: qwen
//! vendors:
//!   qwen:
//!     api_key: sk-test
//! models:
//!   complex: qwen-max-latest
//! cache:
//!   max_entries: 200
//!   ttl_secs: 600
//! "#;
//! let config = AccessConfig::from_yaml_str(yaml).unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.backend, BackendKind::QwenCompatible);
//! assert_eq!(config.model_tiers().complex.model, "qwen-max-latest");
//! assert_eq!(config.model_tiers().simple.model, "qwen-turbo");
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::batch::BatchConfig;
use crate::cache::CacheConfig;
use crate::drivers::BackendKind;
use crate::error::ErrorContext;
use crate::feedback::FeedbackConfig;
use crate::resilience::RetryPolicy;
use crate::routing::{ModelTarget, ModelTierConfig};
use crate::structured::FormatPolicy;
use crate::{Error, Result};

/// Credentials and endpoint for one vendor.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub api_key: Option<String>,
    /// Overrides the vendor's default base URL.
    pub base_url: Option<String>,
    /// Model used by the provider when a request does not name one.
    pub model: Option<String>,
}

impl std::fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl VendorConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfigs {
    pub openai: VendorConfig,
    pub anthropic: VendorConfig,
    pub qwen: VendorConfig,
}

impl VendorConfigs {
    pub fn get(&self, kind: BackendKind) -> &VendorConfig {
        match kind {
            BackendKind::OpenAiCompatible => &self.openai,
            BackendKind::AnthropicCompatible => &self.anthropic,
            BackendKind::QwenCompatible => &self.qwen,
        }
    }

    fn get_mut(&mut self, kind: BackendKind) -> &mut VendorConfig {
        match kind {
            BackendKind::OpenAiCompatible => &mut self.openai,
            BackendKind::AnthropicCompatible => &mut self.anthropic,
            BackendKind::QwenCompatible => &mut self.qwen,
        }
    }
}

/// Partial tier ladder applied over the default backend's ladder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierOverrides {
    pub simple: Option<String>,
    pub medium: Option<String>,
    pub complex: Option<String>,
    pub simple_max_chars: Option<usize>,
    pub medium_max_chars: Option<usize>,
    pub json_escalation_chars: Option<usize>,
}

impl TierOverrides {
    pub fn apply(&self, tiers: &mut ModelTierConfig) {
        for (slot, model) in [
            (&mut tiers.simple, &self.simple),
            (&mut tiers.medium, &self.medium),
            (&mut tiers.complex, &self.complex),
        ] {
            if let Some(m) = model {
                *slot = ModelTarget::new(m.clone());
            }
        }
        if let Some(n) = self.simple_max_chars {
            tiers.simple_max_chars = n;
        }
        if let Some(n) = self.medium_max_chars {
            tiers.medium_max_chars = n;
        }
        if let Some(n) = self.json_escalation_chars {
            tiers.json_escalation_chars = n;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub backend: BackendKind,
    /// Serve every call from the offline mock provider.
    pub mock_mode: bool,
    pub vendors: VendorConfigs,
    pub models: TierOverrides,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    pub format: FormatPolicy,
    pub feedback: FeedbackConfig,
    /// Hard cap for one call, all retries included.
    pub call_budget_ms: u64,
    pub http_timeout_secs: u64,
    pub stream_chunk_delay_ms: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            mock_mode: false,
            vendors: VendorConfigs::default(),
            models: TierOverrides::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryPolicy::default(),
            format: FormatPolicy::default(),
            feedback: FeedbackConfig::default(),
            call_budget_ms: 120_000,
            http_timeout_secs: 60,
            stream_chunk_delay_ms: 20,
        }
    }
}

fn env_error(key: &str, value: &str, expected: &str) -> Error {
    Error::configuration_with_context(
        format!("{} must be {}, got '{}'", key, expected, value),
        ErrorContext::new().with_field_path(key).with_source("env"),
    )
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(env_error(key, value, "a boolean")),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| env_error(key, value, "a non-negative integer"))
}

impl AccessConfig {
    /// Mock-mode configuration with no credentials, batching off.
    pub fn mock() -> Self {
        Self {
            mock_mode: true,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset or empty keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let mut c = Self::default();

        if let Some(v) = get("LLM_BACKEND") {
            c.backend = v.parse().map_err(|_| env_error("LLM_BACKEND", &v, "openai, anthropic or qwen"))?;
        }
        if let Some(v) = get("LLM_MOCK_MODE") {
            c.mock_mode = parse_bool("LLM_MOCK_MODE", &v)?;
        }

        for (kind, key_var, url_var, model_var) in [
            (BackendKind::OpenAiCompatible, "OPENAI_API_KEY", "OPENAI_BASE_URL", "OPENAI_MODEL"),
            (BackendKind::AnthropicCompatible, "ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL", "ANTHROPIC_MODEL"),
            (BackendKind::QwenCompatible, "DASHSCOPE_API_KEY", "QWEN_BASE_URL", "QWEN_MODEL"),
        ] {
            let vendor = c.vendors.get_mut(kind);
            vendor.api_key = get(key_var);
            vendor.base_url = get(url_var);
            vendor.model = get(model_var);
        }

        if let Some(m) = get("LLM_MODEL") {
            c.models.simple = Some(m.clone());
            c.models.medium = Some(m.clone());
            c.models.complex = Some(m);
        }
        if let Some(m) = get("LLM_MODEL_SIMPLE") {
            c.models.simple = Some(m);
        }
        if let Some(m) = get("LLM_MODEL_MEDIUM") {
            c.models.medium = Some(m);
        }
        if let Some(m) = get("LLM_MODEL_COMPLEX") {
            c.models.complex = Some(m);
        }

        if let Some(v) = get("LLM_CACHE_ENABLED") {
            c.cache.enabled = parse_bool("LLM_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("LLM_CACHE_MAX_ENTRIES") {
            c.cache.max_entries = parse_num("LLM_CACHE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = get("LLM_CACHE_TTL_SECS") {
            c.cache.default_ttl =
                std::time::Duration::from_secs(parse_num("LLM_CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = get("LLM_BATCH_ENABLED") {
            c.batch.enabled = parse_bool("LLM_BATCH_ENABLED", &v)?;
        }
        if let Some(v) = get("LLM_BATCH_WINDOW_MS") {
            c.batch.window_ms = parse_num("LLM_BATCH_WINDOW_MS", &v)?;
        }
        if let Some(v) = get("LLM_BATCH_MAX_SIZE") {
            c.batch.max_batch_size = parse_num("LLM_BATCH_MAX_SIZE", &v)?;
        }
        if let Some(v) = get("LLM_MAX_RETRIES") {
            c.retry.max_retries = parse_num("LLM_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("LLM_RETRY_BASE_MS") {
            c.retry.base_delay_ms = parse_num("LLM_RETRY_BASE_MS", &v)?;
        }
        if let Some(v) = get("LLM_MAX_JSON_RETRIES") {
            c.format.max_json_retries = parse_num("LLM_MAX_JSON_RETRIES", &v)?;
        }
        if let Some(v) = get("LLM_CALL_BUDGET_MS") {
            c.call_budget_ms = parse_num("LLM_CALL_BUDGET_MS", &v)?;
        }
        if let Some(v) = get("LLM_HTTP_TIMEOUT_SECS") {
            c.http_timeout_secs = parse_num("LLM_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LLM_FEEDBACK_ENABLED") {
            c.feedback.enabled = parse_bool("LLM_FEEDBACK_ENABLED", &v)?;
        }
        if let Some(v) = get("LLM_SELF_OPTIMIZE") {
            c.feedback.self_optimize = parse_bool("LLM_SELF_OPTIMIZE", &v)?;
        }
        Ok(c)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Tier ladder for the default backend with configured overrides applied.
    pub fn model_tiers(&self) -> ModelTierConfig {
        let mut tiers = ModelTierConfig::for_backend(self.backend);
        self.models.apply(&mut tiers);
        tiers
    }

    /// Backends a service built from this config can reach.
    pub fn available_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.mock_mode || self.vendors.get(*k).has_api_key())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.mock_mode && !self.vendors.get(self.backend).has_api_key() {
            return Err(Error::configuration_with_context(
                format!("no API key configured for backend '{}'", self.backend),
                ErrorContext::new()
                    .with_field_path(format!("vendors.{}.api_key", self.backend.id()))
                    .with_details("set the vendor API key or enable mock mode"),
            ));
        }
        self.validate_settings()
    }

    /// Everything [`AccessConfig::validate`] checks except credentials.
    pub(crate) fn validate_settings(&self) -> Result<()> {
        for kind in BackendKind::ALL {
            if let Some(ref raw) = self.vendors.get(kind).base_url {
                url::Url::parse(raw).map_err(|e| {
                    Error::configuration_with_context(
                        format!("invalid base URL '{}': {}", raw, e),
                        ErrorContext::new()
                            .with_field_path(format!("vendors.{}.base_url", kind.id())),
                    )
                })?;
            }
        }
        if self.batch.enabled && self.batch.max_batch_size == 0 {
            return Err(Error::configuration_with_context(
                "batch.max_batch_size must be at least 1",
                ErrorContext::new().with_field_path("batch.max_batch_size"),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(Error::configuration_with_context(
                "cache.max_entries must be at least 1",
                ErrorContext::new().with_field_path("cache.max_entries"),
            ));
        }
        let tiers = self.model_tiers();
        if tiers.simple_max_chars > tiers.medium_max_chars {
            return Err(Error::configuration_with_context(
                "models.simple_max_chars must not exceed models.medium_max_chars",
                ErrorContext::new().with_field_path("models.simple_max_chars"),
            ));
        }
        if self.call_budget_ms == 0 {
            return Err(Error::configuration_with_context(
                "call_budget_ms must be greater than zero",
                ErrorContext::new().with_field_path("call_budget_ms"),
            ));
        }
        Ok(())
    }
}
