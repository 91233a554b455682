//! 反馈记录：分析结果的评分与自优化提示（有界环形缓冲）。
//!
//! Feedback records for completed analyses.
//!
//! Every completed analysis may be appended to a bounded [`FeedbackLog`]; callers
//! later rate it with `submit_feedback`. Low ratings with self-optimization on
//! produce an advisory [`EscalationHint`]. Hints are recorded and logged only;
//! they never change model bindings.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::routing::ModelTier;
use crate::{Error, Result};

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Ratings below this trigger an escalation hint.
pub const ESCALATION_THRESHOLD: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub self_optimize: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
            self_optimize: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub request_id: String,
    pub prompt: String,
    pub response: serde_json::Value,
    pub model: String,
    pub analysis_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ModelTier>,
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub timestamp: f64,
}

impl FeedbackRecord {
    pub fn new(
        request_id: impl Into<String>,
        prompt: impl Into<String>,
        response: serde_json::Value,
        model: impl Into<String>,
        analysis_type: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            prompt: prompt.into(),
            response,
            model: model.into(),
            analysis_type: analysis_type.into(),
            tier: None,
            rating: None,
            comment: None,
            timestamp: timestamp(),
        }
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Advisory suggestion to use a stronger model for an analysis type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationHint {
    pub request_id: String,
    pub analysis_type: String,
    pub model: String,
    pub rating: u8,
    pub suggested_tier: ModelTier,
    pub timestamp: f64,
}

impl EscalationHint {
    /// Hint for a rated record, or `None` when the rating is acceptable.
    pub fn for_record(record: &FeedbackRecord) -> Option<Self> {
        let rating = record.rating?;
        if rating >= ESCALATION_THRESHOLD {
            return None;
        }
        Some(Self {
            request_id: record.request_id.clone(),
            analysis_type: record.analysis_type.clone(),
            model: record.model.clone(),
            rating,
            suggested_tier: record.tier.unwrap_or(ModelTier::Medium).bump(),
            timestamp: timestamp(),
        })
    }
}

/// Most recent `capacity` records plus the escalation hints raised from them.
pub struct FeedbackLog {
    capacity: usize,
    records: RwLock<VecDeque<FeedbackRecord>>,
    hints: RwLock<VecDeque<EscalationHint>>,
}

impl FeedbackLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            hints: RwLock::new(VecDeque::new()),
        }
    }

    pub fn record(&self, record: FeedbackRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Attach a 1..=5 rating to a stored record and return the updated record.
    pub fn rate(
        &self,
        request_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> Result<FeedbackRecord> {
        if !(1..=5).contains(&rating) {
            return Err(Error::validation(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .iter_mut()
            .rev()
            .find(|r| r.request_id == request_id)
            .ok_or_else(|| Error::NotFound(format!("no feedback record for request {}", request_id)))?;
        record.rating = Some(rating);
        if comment.is_some() {
            record.comment = comment;
        }
        Ok(record.clone())
    }

    pub fn push_hint(&self, hint: EscalationHint) {
        let mut hints = self.hints.write().unwrap_or_else(PoisonError::into_inner);
        if hints.len() == self.capacity {
            hints.pop_front();
        }
        hints.push_back(hint);
    }

    pub fn get(&self, request_id: &str) -> Option<FeedbackRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    pub fn records(&self) -> Vec<FeedbackRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn hints(&self) -> Vec<EscalationHint> {
        self.hints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
