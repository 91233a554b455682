//! Structured output module for llm-access.
//!
//! Enforces JSON output from free-text model replies:
//! - `parse_lenient`: recover JSON from fenced, chatty or loosely quoted text
//! - `FormatEnforcer`: provider decorator that re-issues calls until the output parses
//! - `EnforcedOutput`: validated value with the number of re-issues it took
//!
//! # Examples
//!
//! ```
//! use llm_access::structured::parse_lenient;
//! use serde_json::json;
//!
//! let reply = "Here is the data:\n```json\n{'keyword': 'air fryer', 'volume': 1200,}\n```";
//! assert_eq!(
//!     parse_lenient(reply),
//!     Some(json!({"keyword": "air fryer", "volume": 1200}))
//! );
//! ```

pub mod enforcer;
pub mod repair;

pub use enforcer::{EnforcedOutput, FormatEnforcer, FormatPolicy, RAW_EXCERPT_CHARS};
pub use repair::{parse_lenient, repair_json, RepairStage};
