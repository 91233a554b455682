//! 请求批处理模块：按时间窗口与批大小合并相同形态的请求。
//!
//! # Request Batching Module
//!
//! Requests whose options share a batch key (backend plus normalized options,
//! messages excluded) are gathered into short windows and dispatched together.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchProcessor`] | Window lifecycle, timers and per-member result routing |
//! | [`BatchCollector`] | Keyed windows closed by size or by their timer |
//! | [`BatchConfig`] | Window length, size limit and dispatch strategy |
//! | [`BatchExecutor`] | Runs a closed window's members |
//! | [`BatchStrategy`] | Sequential (default) or bounded concurrent dispatch |
//!
//! ## Window lifecycle
//!
//! `Idle -> Collecting -> Dispatching -> Idle`, per batch key. The first request
//! opens a window and starts its timer; later requests with the same key join
//! until the timer fires or the size limit is reached. Each member's result is
//! delivered on its own channel, so one failing member never affects the rest.
//!
//! ## Example
//!
//! ```rust
//! use llm_access::batch::{BatchCollector, BatchAddResult};
//!
//! let collector: BatchCollector<&str, u32> = BatchCollector::new(2);
//! assert!(matches!(collector.add("json", 1), BatchAddResult::Opened { .. }));
//! assert!(collector.add("json", 2).window_closed());
//! assert_eq!(collector.pending(), 0);
//! ```

mod collector;
mod executor;
mod processor;

pub use collector::{BatchAddResult, BatchCollector, BatchConfig, BatchItem};
pub use executor::{BatchExecutor, BatchRun, BatchStrategy};
pub use processor::BatchProcessor;
