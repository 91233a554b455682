//! Time/size-windowed request coalescing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::{Fingerprint, FingerprintGenerator};
use crate::drivers::{BackendKind, Completion, Provider};
use crate::types::{Message, RequestOptions};
use crate::{Error, Result};

use super::collector::{BatchAddResult, BatchCollector, BatchConfig, BatchItem};
use super::executor::BatchExecutor;

struct Member {
    provider: Arc<dyn Provider>,
    messages: Vec<Message>,
    options: RequestOptions,
    reply: oneshot::Sender<Result<Completion>>,
}

struct Shared {
    collector: BatchCollector<Fingerprint, Member>,
    executor: BatchExecutor,
}

impl Shared {
    /// Run every member and route each result to its own caller.
    async fn dispatch(&self, items: Vec<BatchItem<Member>>) {
        let size = items.len();
        let run = self
            .executor
            .execute(items, |item| async move {
                let m = item.data;
                // Caller gave up while waiting in the window; skip the upstream call.
                if m.reply.is_closed() {
                    debug!("batch member abandoned before dispatch");
                    return;
                }
                let result = m.provider.call(&m.messages, &m.options).await;
                let _ = m.reply.send(result);
            })
            .await;
        debug!(
            size,
            duration_ms = run.execution_time.as_millis() as u64,
            "batch window dispatched"
        );
    }
}

/// Groups requests with the same batch key into short windows.
///
/// A window opens on the first request for a key and dispatches after
/// `window_ms` or when it holds `max_batch_size` members. Members are still
/// executed one upstream call each; a failing member never affects the others.
pub struct BatchProcessor {
    config: BatchConfig,
    keys: FingerprintGenerator,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        let shared = Arc::new(Shared {
            collector: BatchCollector::new(config.max_batch_size),
            executor: BatchExecutor::new(config.strategy),
        });
        Self {
            config,
            keys: FingerprintGenerator::new(),
            shared,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub async fn submit(
        &self,
        provider: Arc<dyn Provider>,
        backend: BackendKind,
        messages: Vec<Message>,
        options: RequestOptions,
    ) -> Result<Completion> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let key = self.keys.batch_key(backend, &options);
        let (tx, rx) = oneshot::channel();
        let member = Member {
            provider,
            messages,
            options,
            reply: tx,
        };

        match self.shared.collector.add(key.clone(), member) {
            BatchAddResult::Opened { window_id } => {
                debug!(window_id, batch_key = %key, "batch window opened");
                let shared = self.shared.clone();
                let window = self.config.window();
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    if let Some(items) = shared.collector.take(&key, window_id) {
                        shared.dispatch(items).await;
                    }
                });
            }
            BatchAddResult::Added { count } => {
                debug!(count, batch_key = %key, "joined batch window");
            }
            BatchAddResult::Full { window_id, items } => {
                debug!(window_id, size = items.len(), "batch window full");
                let shared = self.shared.clone();
                tokio::spawn(async move { shared.dispatch(items).await });
            }
        }

        // A dropped sender means the dispatch task died before replying.
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Dispatch every open window now and wait for the results to be delivered.
    pub async fn flush_all(&self) {
        for items in self.shared.collector.drain_all() {
            self.shared.dispatch(items).await;
        }
    }

    /// Reject new submissions and flush what is waiting.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.flush_all().await;
    }

    pub fn pending(&self) -> usize {
        self.shared.collector.pending()
    }
}
