//! Facade results: [`Analysis`] on success, [`AnalysisError`] on failure.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::drivers::BackendKind;
use crate::error::ErrorKind;
use crate::Error;

/// Where an analysis result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Cache,
    Batch,
    Direct,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub request_id: String,
    pub value: Value,
    pub model: String,
    pub backend: BackendKind,
    pub source: AnalysisSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

impl Analysis {
    pub fn is_cached(&self) -> bool {
        self.source == AnalysisSource::Cache
    }
}

/// Structured failure of one analysis. Never a panic, never a bare string.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisError {
    pub request_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub retries: u32,
}

impl AnalysisError {
    pub fn from_error(
        request_id: impl Into<String>,
        error: &Error,
        model: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        let endpoint = error
            .context()
            .and_then(|c| c.endpoint.clone())
            .or(endpoint);
        Self {
            request_id: request_id.into(),
            kind: error.kind(),
            message: error.to_string(),
            model,
            endpoint,
            retries: error.retries(),
        }
    }

    /// Error object handed back to agents in place of an analysis result.
    pub fn to_value(&self) -> Value {
        json!({
            "error": self.kind.as_str(),
            "message": self.message,
            "modelType": self.model,
            "endpoint": self.endpoint,
            "retries": self.retries,
        })
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if let Some(ref model) = self.model {
            write!(f, " (model: {})", model)?;
        }
        Ok(())
    }
}

impl std::error::Error for AnalysisError {}
