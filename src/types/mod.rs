//! 类型系统模块：消息、请求选项与流式事件。
//!
//! # Types Module
//!
//! Core request/response primitives shared by every layer.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Conversation turn with role and text content |
//! | [`RequestOptions`] | Per-call options (format, model pin, retries, caching, batching) |
//! | [`OptionOverrides`] | Partial option set applied by A/B variants |
//! | [`StreamingEvent`] | Chunk delivered to streaming callbacks |
//!
//! ```rust
//! use llm_access::types::{Message, OutputFormat, RequestOptions};
//!
//! let messages = vec![
//!     Message::system("You are a market analyst."),
//!     Message::user("Summarize the keyword landscape for 'air fryer'."),
//! ];
//! let options = RequestOptions::json_strict().with_temperature(0.3);
//! assert_eq!(options.format, OutputFormat::Json);
//! # let _ = messages;
//! ```

pub mod events;
pub mod message;
pub mod options;

pub use events::{ChunkCallback, StreamingEvent};
pub use message::{Message, MessageRole};
pub use options::{OptionOverrides, OutputFormat, RequestOptions};
