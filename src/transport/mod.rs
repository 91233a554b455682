//! 传输层：基于 reqwest 的 JSON POST 与状态码映射
//!
//! HTTP transport shared by every HTTP-backed provider.

pub mod http;

pub use http::{HttpTransport, RawResponse, TransportSettings};
