//! Streaming events delivered to chunk callbacks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unified streaming event enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StreamingEvent {
    /// Partial content delta (text streaming)
    #[serde(rename = "PartialContentDelta")]
    PartialContentDelta {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence_id: Option<u64>,
    },

    /// Stream end
    #[serde(rename = "StreamEnd")]
    StreamEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl StreamingEvent {
    pub fn delta(&self) -> Option<&str> {
        match self {
            StreamingEvent::PartialContentDelta { content, .. } => Some(content),
            StreamingEvent::StreamEnd { .. } => None,
        }
    }
}

/// Callback receiving streamed chunks in order.
pub type ChunkCallback = Arc<dyn Fn(StreamingEvent) + Send + Sync>;
