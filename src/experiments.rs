//! A/B 测试：按权重随机分配请求选项变体。
//!
//! A/B variant selection.
//!
//! One test is active at a time. Each analysis draws a variant with probability
//! proportional to its weight and applies the variant's option overrides before
//! model selection.

use arc_swap::ArcSwapOption;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ErrorContext;
use crate::types::OptionOverrides;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    #[serde(default)]
    pub overrides: OptionOverrides,
    pub weight: f64,
}

impl Variant {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            overrides: OptionOverrides::default(),
            weight,
        }
    }

    pub fn with_overrides(mut self, overrides: OptionOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// A validated test definition. Weights need not sum to one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ABTestConfig {
    test_id: String,
    variants: Vec<Variant>,
    total_weight: f64,
}

impl ABTestConfig {
    pub fn new(test_id: impl Into<String>, variants: Vec<Variant>) -> Result<Self> {
        let test_id = test_id.into();
        let ctx = || ErrorContext::new().with_field_path(format!("ab_test.{}", test_id));
        if variants.is_empty() {
            return Err(Error::validation_with_context(
                "an A/B test needs at least one variant",
                ctx(),
            ));
        }
        let mut seen = HashSet::new();
        for v in &variants {
            if !v.weight.is_finite() || v.weight < 0.0 {
                return Err(Error::validation_with_context(
                    format!("variant '{}' has invalid weight {}", v.id, v.weight),
                    ctx(),
                ));
            }
            if !seen.insert(v.id.as_str()) {
                return Err(Error::validation_with_context(
                    format!("duplicate variant id '{}'", v.id),
                    ctx(),
                ));
            }
        }
        let total_weight: f64 = variants.iter().map(|v| v.weight).sum();
        if total_weight <= 0.0 {
            return Err(Error::validation_with_context(
                "variant weights must sum to more than zero",
                ctx(),
            ));
        }
        if !total_weight.is_finite() {
            return Err(Error::validation_with_context(
                "variant weights overflow when summed",
                ctx(),
            ));
        }
        Ok(Self {
            test_id,
            variants,
            total_weight,
        })
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Weighted draw.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &Variant {
        let mut point = rng.random_range(0.0..self.total_weight);
        let mut last_positive = &self.variants[0];
        for v in &self.variants {
            if v.weight <= 0.0 {
                continue;
            }
            if point < v.weight {
                return v;
            }
            point -= v.weight;
            last_positive = v;
        }
        // float rounding at the upper edge
        last_positive
    }
}

/// Variant chosen for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub test_id: String,
    pub variant_id: String,
    pub overrides: OptionOverrides,
}

/// Holds the active test; reads never block configuration changes.
#[derive(Default)]
pub struct VariantSelector {
    active: ArcSwapOption<ABTestConfig>,
}

impl VariantSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active test.
    pub fn configure(&self, config: ABTestConfig) {
        self.active.store(Some(Arc::new(config)));
    }

    pub fn clear(&self) {
        self.active.store(None);
    }

    pub fn active(&self) -> Option<Arc<ABTestConfig>> {
        self.active.load_full()
    }

    pub fn assign<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Assignment> {
        let test = self.active.load_full()?;
        let v = test.pick(rng);
        Some(Assignment {
            test_id: test.test_id.clone(),
            variant_id: v.id.clone(),
            overrides: v.overrides.clone(),
        })
    }
}
