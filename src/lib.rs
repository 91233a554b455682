//! # llm-access
//!
//! 市场调研多智能体工具的 LLM 访问层：缓存、批处理、模型分级与严格输出格式。
//!
//! LLM access layer for a multi-agent market and keyword research tool. It turns
//! an application-level `analyze(prompt, analysis_type, options)` request into a
//! reliable call against an OpenAI-, Anthropic- or Qwen-compatible backend.
//!
//! ## Overview
//!
//! Callers never need to know which backend served them, or whether a result
//! came from the cache, a batch window or a live call. Failures come back as a
//! structured [`service::AnalysisError`], never as a panic.
//!
//! ## Key Features
//!
//! - **Unified facade**: [`AccessService`] composes everything below
//! - **Caching**: fingerprint-keyed LRU + TTL store via the [`cache`] module
//! - **Batching**: time/size windows with per-member results via [`batch`]
//! - **Model tiers**: prompt-size based model selection via [`routing`]
//! - **Strict JSON**: repair and re-issue until output parses, via [`structured`]
//! - **Resilience**: exponential backoff for transient errors via [`resilience`]
//! - **Experiments**: weighted A/B option variants via [`experiments`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_access::{AccessConfig, AccessService, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> llm_access::Result<()> {
//!     let service = AccessService::from_config(AccessConfig::from_env()?)?;
//!
//!     let result = service
//!         .analyze(
//!             "Summarize search intent for the keyword 'air fryer'",
//!             "keyword_intent",
//!             RequestOptions::json_strict(),
//!         )
//!         .await;
//!     match result {
//!         Ok(analysis) => println!("{} via {}", analysis.value, analysis.model),
//!         Err(e) => eprintln!("{}", e.to_value()),
//!     }
//!
//!     service.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`service`] | The access facade |
//! | [`drivers`] | Provider trait and vendor adapters |
//! | [`transport`] | Shared reqwest client and status mapping |
//! | [`structured`] | JSON repair and the format-enforcing decorator |
//! | [`resilience`] | Retry decorator with exponential backoff |
//! | [`cache`] | Response cache with pluggable backends |
//! | [`batch`] | Request coalescing windows |
//! | [`routing`] | Model tier selection |
//! | [`config`] | Environment and YAML configuration |
//! | [`types`] | Messages, options, streaming events |

pub mod batch;
pub mod cache;
pub mod config;
pub mod drivers;
pub mod experiments;
pub mod feedback;
pub mod progress;
pub mod resilience;
pub mod routing;
pub mod search;
pub mod service;
pub mod streaming;
pub mod structured;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::AccessConfig;
pub use drivers::{BackendKind, Completion, Provider};
pub use service::{AccessService, AccessServiceBuilder, Analysis, AnalysisError, AnalysisSource};
pub use types::{
    events::StreamingEvent,
    message::{Message, MessageRole},
    options::{OutputFormat, RequestOptions},
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorKind};
