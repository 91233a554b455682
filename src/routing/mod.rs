//! 模型分级选择：按提示长度与输出格式选择 simple / medium / complex 模型。
//!
//! Model tier selection.
//!
//! This module is **pure logic**: no network calls, no clock, no randomness. The
//! same messages and options always select the same target, and an explicit model
//! pin on the request always wins.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::drivers::BackendKind;
use crate::types::message::total_chars;
use crate::types::{Message, OutputFormat, RequestOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Simple,
    Medium,
    Complex,
}

impl ModelTier {
    /// One tier up, saturating at `Complex`.
    pub fn bump(self) -> Self {
        match self {
            ModelTier::Simple => ModelTier::Medium,
            ModelTier::Medium | ModelTier::Complex => ModelTier::Complex,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Simple => "simple",
            ModelTier::Medium => "medium",
            ModelTier::Complex => "complex",
        }
    }
}

/// Model to call. `backend: None` means the service's default backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
    pub model: String,
}

impl ModelTarget {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            backend: None,
            model: model.into(),
        }
    }

    pub fn on(backend: BackendKind, model: impl Into<String>) -> Self {
        Self {
            backend: Some(backend),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTierConfig {
    pub simple: ModelTarget,
    pub medium: ModelTarget,
    pub complex: ModelTarget,
    pub simple_max_chars: usize,
    pub medium_max_chars: usize,
    /// JSON output requests at or above this size move up one tier.
    pub json_escalation_chars: usize,
}

impl Default for ModelTierConfig {
    fn default() -> Self {
        Self::for_backend(BackendKind::default())
    }
}

impl ModelTierConfig {
    /// Vendor-appropriate tier ladder.
    pub fn for_backend(kind: BackendKind) -> Self {
        let (simple, medium, complex) = match kind {
            BackendKind::OpenAiCompatible => ("gpt-4o-mini", "gpt-4o-mini", "gpt-4o"),
            BackendKind::AnthropicCompatible => (
                "claude-3-5-haiku-latest",
                "claude-3-5-sonnet-latest",
                "claude-3-5-sonnet-latest",
            ),
            BackendKind::QwenCompatible => ("qwen-turbo", "qwen-plus", "qwen-max"),
        };
        Self {
            simple: ModelTarget::new(simple),
            medium: ModelTarget::new(medium),
            complex: ModelTarget::new(complex),
            simple_max_chars: 2000,
            medium_max_chars: 8000,
            json_escalation_chars: 4000,
        }
    }

    pub fn target(&self, tier: ModelTier) -> &ModelTarget {
        match tier {
            ModelTier::Simple => &self.simple,
            ModelTier::Medium => &self.medium,
            ModelTier::Complex => &self.complex,
        }
    }
}

/// Intermediate selection decision, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComplexityEstimate {
    pub chars: usize,
    pub base_tier: ModelTier,
    pub tier: ModelTier,
    pub escalated: bool,
}

/// Picks a [`ModelTarget`] from the configured ladder of the default backend.
///
/// A request pinned to another backend without a model uses that vendor's
/// stock ladder with this selector's thresholds.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    config: ModelTierConfig,
    default_backend: BackendKind,
}

impl ModelSelector {
    pub fn new(config: ModelTierConfig) -> Self {
        Self {
            config,
            default_backend: BackendKind::default(),
        }
    }

    /// Backend whose ladder `config` describes.
    pub fn with_default_backend(mut self, backend: BackendKind) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn config(&self) -> &ModelTierConfig {
        &self.config
    }

    pub fn default_backend(&self) -> BackendKind {
        self.default_backend
    }

    fn ladder_for(&self, backend: Option<BackendKind>) -> Cow<'_, ModelTierConfig> {
        match backend {
            Some(b) if b != self.default_backend => {
                let mut ladder = ModelTierConfig::for_backend(b);
                ladder.simple_max_chars = self.config.simple_max_chars;
                ladder.medium_max_chars = self.config.medium_max_chars;
                ladder.json_escalation_chars = self.config.json_escalation_chars;
                Cow::Owned(ladder)
            }
            _ => Cow::Borrowed(&self.config),
        }
    }

    pub fn estimate(&self, messages: &[Message], options: &RequestOptions) -> ComplexityEstimate {
        let chars = total_chars(messages);
        let base_tier = if chars <= self.config.simple_max_chars {
            ModelTier::Simple
        } else if chars <= self.config.medium_max_chars {
            ModelTier::Medium
        } else {
            ModelTier::Complex
        };
        let escalated =
            options.format == OutputFormat::Json && chars >= self.config.json_escalation_chars;
        let tier = if escalated { base_tier.bump() } else { base_tier };
        ComplexityEstimate {
            chars,
            base_tier,
            tier,
            escalated,
        }
    }

    /// Target for this request; `options.model` is used verbatim when set.
    pub fn select(&self, messages: &[Message], options: &RequestOptions) -> ModelTarget {
        if let Some(ref model) = options.model {
            return ModelTarget {
                backend: options.backend,
                model: model.clone(),
            };
        }
        let tier = self.estimate(messages, options).tier;
        let mut target = self.ladder_for(options.backend).target(tier).clone();
        if options.backend.is_some() {
            target.backend = options.backend;
        }
        target
    }
}
