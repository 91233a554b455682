//! 弹性模块：瞬时错误的指数退避重试。
//!
//! # Resilience
//!
//! Transient upstream failures (network errors, HTTP 429, HTTP 5xx) are retried by
//! [`RetryingProvider`], a [`Provider`](crate::drivers::Provider) decorator. The
//! loop is independent of format retries, which live in
//! [`FormatEnforcer`](crate::structured::FormatEnforcer).
//!
//! ```rust
//! use llm_access::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(2, 500);
//! assert_eq!(policy.delay_for(1, None), Duration::from_millis(500));
//! assert_eq!(policy.delay_for(2, None), Duration::from_millis(1000));
//! // Server hints win over the computed backoff.
//! assert_eq!(policy.delay_for(1, Some(2000)), Duration::from_millis(2000));
//! ```

pub mod retry;

pub use retry::{RetryPolicy, RetryingProvider};
