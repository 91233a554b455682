//! 统一错误类型：上游调用、格式校验、配置与运行时错误。
//!
//! Unified error type for the access layer.
//!
//! Upstream failures are split into retryable classes (network, rate limit, server)
//! and terminal ones. [`ErrorKind`] is the flat classification used by retry
//! decisions and by the facade's structured error results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "vendors.openai.base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., upstream request id, response excerpt)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "http_transport", "config")
    pub source: Option<String>,
    /// Upstream endpoint involved, when there was one
    pub endpoint: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Flat error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    Server,
    Client,
    UpstreamShape,
    FormatValidation,
    Timeout,
    Configuration,
    Validation,
    NotFound,
    Closed,
    Internal,
}

impl ErrorKind {
    /// Transient classes that the retry decorator re-issues.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Server)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Server => "server_error",
            ErrorKind::Client => "client_error",
            ErrorKind::UpstreamShape => "upstream_shape_error",
            ErrorKind::FormatValidation => "format_validation_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Closed => "closed",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => ErrorKind::RateLimit,
            500..=599 => ErrorKind::Server,
            408 => ErrorKind::Network,
            _ => ErrorKind::Client,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the access layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {message}{}", format_context(.context))]
    Network {
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limited by upstream (HTTP 429): {message}{}", format_context(.context))]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    #[error("Upstream server error: HTTP {status}: {message}{}", format_context(.context))]
    Server {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream rejected request: HTTP {status}: {message}{}", format_context(.context))]
    Remote {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("Unrecognized response envelope from {provider}: {raw}")]
    UpstreamShape { provider: String, raw: String },

    #[error("Response failed JSON validation after {attempts} attempts; last response: {raw}")]
    FormatValidation { attempts: u32, raw: String },

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Call budget of {budget_ms}ms exceeded")]
    Timeout { budget_ms: u64 },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access service is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if let Some(ref endpoint) = ctx.endpoint {
        parts.push(format!("endpoint: {}", endpoint));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn server(status: u16, msg: impl Into<String>) -> Self {
        Error::Server {
            status,
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn rate_limited(msg: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Error::RateLimited {
            message: msg.into(),
            retry_after_ms,
            context: ErrorContext::new(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new().with_source("config"),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Build the error matching a non-success HTTP status.
    pub fn from_status(
        status: u16,
        body: impl Into<String>,
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    ) -> Self {
        let message = body.into();
        match ErrorKind::from_http_status(status) {
            ErrorKind::RateLimit => Error::RateLimited {
                message,
                retry_after_ms,
                context,
            },
            ErrorKind::Server => Error::Server {
                status,
                message,
                context,
            },
            ErrorKind::Network => Error::Network { message, context },
            _ => Error::Remote {
                status,
                message,
                context,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::Network,
            Error::RateLimited { .. } => ErrorKind::RateLimit,
            Error::Server { .. } => ErrorKind::Server,
            Error::Remote { .. } => ErrorKind::Client,
            Error::UpstreamShape { .. } => ErrorKind::UpstreamShape,
            Error::FormatValidation { .. } => ErrorKind::FormatValidation,
            Error::RetriesExhausted { source, .. } => source.kind(),
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Configuration { .. } | Error::Yaml(_) => ErrorKind::Configuration,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Closed => ErrorKind::Closed,
            Error::Serialization(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // Already retried to exhaustion.
            Error::RetriesExhausted { .. } => false,
            other => other.kind().is_retryable(),
        }
    }

    /// Retries consumed before this error surfaced.
    pub fn retries(&self) -> u32 {
        match self {
            Error::RetriesExhausted { attempts, .. } | Error::FormatValidation { attempts, .. } => {
                attempts.saturating_sub(1)
            }
            _ => 0,
        }
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Network { context, .. }
            | Error::RateLimited { context, .. }
            | Error::Server { context, .. }
            | Error::Remote { context, .. }
            | Error::Configuration { context, .. }
            | Error::Validation { context, .. } => Some(context),
            Error::RetriesExhausted { source, .. } => source.context(),
            _ => None,
        }
    }
}
