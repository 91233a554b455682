//! Batch executor.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchStrategy {
    /// One member at a time, in arrival order.
    #[default]
    Sequential,
    /// Up to `max_concurrency` members in flight.
    Concurrent { max_concurrency: usize },
}

/// Outputs in input order plus timing.
#[derive(Debug, Clone)]
pub struct BatchRun<R> {
    pub outputs: Vec<R>,
    pub execution_time: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    strategy: BatchStrategy,
}

impl BatchExecutor {
    pub fn new(strategy: BatchStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> BatchStrategy {
        self.strategy
    }

    /// Run `f` over every item. Outputs keep input order under every strategy.
    pub async fn execute<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> BatchRun<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let start = Instant::now();
        let outputs = match self.strategy {
            BatchStrategy::Sequential => {
                let mut outputs = Vec::with_capacity(items.len());
                for item in items {
                    outputs.push(f(item).await);
                }
                outputs
            }
            BatchStrategy::Concurrent { max_concurrency } => {
                stream::iter(items.into_iter().map(f))
                    .buffered(max_concurrency.max(1))
                    .collect()
                    .await
            }
        };
        BatchRun {
            outputs,
            execution_time: start.elapsed(),
        }
    }
}
