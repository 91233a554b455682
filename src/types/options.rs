//! Per-call request options.

use serde::{Deserialize, Serialize};

use crate::drivers::BackendKind;

/// Desired shape of the model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "markdown",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

/// Options for a single call. `None` fields fall back to service configuration.
///
/// Constructed per call and treated as immutable for the call's duration; the
/// facade resolves a copy (A/B overrides, selected model) before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub format: OutputFormat,
    pub strict_format: bool,
    /// Explicit model pin; always wins over tier selection.
    pub model: Option<String>,
    /// Explicit backend pin.
    pub backend: Option<BackendKind>,
    pub system_prompt: Option<String>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub max_json_retries: Option<u32>,
    pub stream: bool,
    pub cache: Option<bool>,
    pub batch: Option<bool>,
    /// Hard cap across all retries of one call.
    pub timeout_ms: Option<u64>,
    /// Vendor passthrough parameters merged into the request body.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict JSON output: parse, repair, and re-issue until valid.
    pub fn json_strict() -> Self {
        Self {
            format: OutputFormat::Json,
            strict_format: true,
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_strict_format(mut self, strict: bool) -> Self {
        self.strict_format = strict;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = Some(ms);
        self
    }

    pub fn with_max_json_retries(mut self, n: u32) -> Self {
        self.max_json_retries = Some(n);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = Some(enabled);
        self
    }

    pub fn with_batch(mut self, enabled: bool) -> Self {
        self.batch = Some(enabled);
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn wants_strict_json(&self) -> bool {
        self.format == OutputFormat::Json && self.strict_format
    }
}

/// Option overrides carried by an A/B variant. Only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionOverrides {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
    pub backend: Option<BackendKind>,
    pub format: Option<OutputFormat>,
    pub system_prompt: Option<String>,
}

impl OptionOverrides {
    pub fn apply(&self, options: &mut RequestOptions) {
        if let Some(t) = self.temperature {
            options.temperature = Some(t);
        }
        if let Some(n) = self.max_tokens {
            options.max_tokens = Some(n);
        }
        if let Some(ref m) = self.model {
            options.model = Some(m.clone());
        }
        if let Some(b) = self.backend {
            options.backend = Some(b);
        }
        if let Some(f) = self.format {
            options.format = f;
        }
        if let Some(ref s) = self.system_prompt {
            options.system_prompt = Some(s.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_overrides_only_touch_set_fields() {
        let mut options = RequestOptions::new()
            .with_temperature(0.2)
            .with_max_tokens(512);
        let overrides = OptionOverrides {
            temperature: Some(0.9),
            ..Default::default()
        };
        overrides.apply(&mut options);
        assert_eq!(options.temperature, Some(0.9));
        assert_eq!(options.max_tokens, Some(512));
        assert!(options.model.is_none());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: RequestOptions =
            serde_json::from_str(r#"{"format": "json", "strict_format": true}"#).unwrap();
        assert!(options.wants_strict_json());
        assert!(options.cache.is_none());
        assert!(options.extra.is_empty());
    }
}
