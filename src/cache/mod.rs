//! 响应缓存模块：以请求指纹为键的 LRU + TTL 缓存。
//!
//! # Response Caching Module
//!
//! Parsed analysis results are cached under a [`Fingerprint`] of the request so
//! repeated identical requests never reach the upstream backend twice.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Typed get/set with TTL, trimming and statistics |
//! | [`CacheConfig`] | Capacity, TTL and entry size limits |
//! | [`CacheBackend`] | Trait for storage backends |
//! | [`MemoryCache`] | In-memory LRU store (`lru` crate) with lazy TTL purge |
//! | [`NullCache`] | No-op backend used when caching is disabled |
//! | [`FingerprintGenerator`] | SHA-256 request fingerprints and batch keys |
//! | [`InflightRequests`] | Single-flight tracking of identical requests in progress |
//!
//! ## Example
//!
//! ```rust
//! use llm_access::cache::{CacheConfig, CacheManager, FingerprintGenerator};
//! use llm_access::types::{Message, RequestOptions};
//! use std::time::Duration;
//!
//! # tokio_test_block(async {
//! let cache = CacheManager::from_config(
//!     CacheConfig::new().with_max_entries(500).with_ttl(Duration::from_secs(600)),
//! );
//! let key = FingerprintGenerator::new()
//!     .fingerprint(&[Message::user("analyze 'yoga mat'")], &RequestOptions::json_strict());
//! cache.set(&key, &serde_json::json!({"intent": "commercial"})).await.unwrap();
//! assert!(cache.get::<serde_json::Value>(&key).await.unwrap().is_some());
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f);
//! # }
//! ```
//!
//! ## Fingerprints
//!
//! A fingerprint covers the messages and the content-affecting options (backend,
//! model, temperature to two decimals, max tokens, format, strictness, system
//! prompt, vendor extras). Expired and evicted entries are indistinguishable
//! from a miss.

mod backend;
mod inflight;
mod key;
mod manager;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use inflight::{Flight, FlightGuard, FlightWaiter, InflightRequests};
pub use key::{Fingerprint, FingerprintGenerator};
pub use manager::{CacheConfig, CacheManager, CacheStats};
