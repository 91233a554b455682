//! Simulated streaming for providers without a native stream.
//!
//! A finished completion is cut into short chunks of roughly
//! [`BASE_CHUNK_CHARS`] characters (with a little jitter) and delivered in
//! order with a small delay between chunks. Chunks always end on `char`
//! boundaries and concatenate back to the original text.

use rand::Rng;
use std::time::Duration;

use crate::progress::{ProgressStage, ProgressTracker};
use crate::types::{ChunkCallback, StreamingEvent};

pub const BASE_CHUNK_CHARS: usize = 15;
pub const CHUNK_JITTER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub base_chars: usize,
    pub jitter: usize,
    pub delay: Duration,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self {
            base_chars: BASE_CHUNK_CHARS,
            jitter: CHUNK_JITTER,
            delay: Duration::from_millis(20),
        }
    }
}

impl ChunkPlan {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Split `text` into chunks of `base ± jitter` characters.
pub fn split_chunks<R: Rng + ?Sized>(text: &str, plan: &ChunkPlan, rng: &mut R) -> Vec<String> {
    let base = plan.base_chars.max(1);
    let low = base.saturating_sub(plan.jitter).max(1);
    let high = base + plan.jitter;

    let mut chunks = Vec::new();
    let mut chars = text.chars().peekable();
    while chars.peek().is_some() {
        let size = rng.random_range(low..=high);
        let chunk: String = chars.by_ref().take(size).collect();
        chunks.push(chunk);
    }
    chunks
}

/// Deliver `text` chunk by chunk, moving progress from 30% to 90%.
pub async fn deliver<R: Rng + Send>(
    request_id: &str,
    text: &str,
    plan: &ChunkPlan,
    rng: &mut R,
    on_event: &ChunkCallback,
    progress: &ProgressTracker,
) {
    let chunks = split_chunks(text, plan, rng);
    let total = chunks.len().max(1);
    let (start, end) = (
        ProgressStage::Streaming.percent() as usize,
        ProgressStage::Parsing.percent() as usize,
    );

    for (i, content) in chunks.into_iter().enumerate() {
        on_event(StreamingEvent::PartialContentDelta {
            content,
            sequence_id: Some(i as u64),
        });
        let percent = start + (end - start) * (i + 1) / total;
        progress.report(request_id, ProgressStage::Streaming, percent as u8);
        if !plan.delay.is_zero() {
            tokio::time::sleep(plan.delay).await;
        }
    }
    on_event(StreamingEvent::StreamEnd {
        finish_reason: Some("stop".into()),
    });
}
