//! Batch collector: keyed windows that close on size or on a timer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::executor::BatchStrategy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub enabled: bool,
    pub max_batch_size: usize,
    pub window_ms: u64,
    pub strategy: BatchStrategy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 10,
            window_ms: 50,
            strategy: BatchStrategy::Sequential,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_batch_size(mut self, s: usize) -> Self {
        self.max_batch_size = s;
        self
    }
    pub fn with_window_ms(mut self, ms: u64) -> Self {
        self.window_ms = ms;
        self
    }
    pub fn with_strategy(mut self, s: BatchStrategy) -> Self {
        self.strategy = s;
        self
    }
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug)]
pub struct BatchItem<T> {
    pub data: T,
    pub added_at: Instant,
}

impl<T> BatchItem<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            added_at: Instant::now(),
        }
    }
}

struct Window<T> {
    id: u64,
    items: Vec<BatchItem<T>>,
}

/// Outcome of adding an item.
#[derive(Debug)]
pub enum BatchAddResult<T> {
    /// A new window was opened; the caller owns its timer.
    Opened { window_id: u64 },
    /// Joined an open window.
    Added { count: usize },
    /// The window reached its size limit and was closed; dispatch these now.
    Full { window_id: u64, items: Vec<BatchItem<T>> },
}

impl<T> BatchAddResult<T> {
    pub fn window_closed(&self) -> bool {
        matches!(self, BatchAddResult::Full { .. })
    }
}

struct State<K, T> {
    windows: HashMap<K, Window<T>>,
    next_id: u64,
}

/// Open windows keyed by `K`.
///
/// A window leaves the map under the same lock that admits members, so nothing
/// can join a window once it has been handed out for dispatch.
pub struct BatchCollector<K, T> {
    max_batch_size: usize,
    state: Mutex<State<K, T>>,
}

impl<K: Eq + Hash + Clone, T> BatchCollector<K, T> {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            state: Mutex::new(State {
                windows: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K, T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, key: K, data: T) -> BatchAddResult<T> {
        let mut state = self.lock();
        let (window_id, count, opened) = match state.windows.get_mut(&key) {
            Some(window) => {
                window.items.push(BatchItem::new(data));
                (window.id, window.items.len(), false)
            }
            None => {
                state.next_id += 1;
                let id = state.next_id;
                state.windows.insert(
                    key.clone(),
                    Window {
                        id,
                        items: vec![BatchItem::new(data)],
                    },
                );
                (id, 1, true)
            }
        };

        if count >= self.max_batch_size {
            let items = state
                .windows
                .remove(&key)
                .map(|w| w.items)
                .unwrap_or_default();
            return BatchAddResult::Full { window_id, items };
        }
        if opened {
            BatchAddResult::Opened { window_id }
        } else {
            BatchAddResult::Added { count }
        }
    }

    /// Close window `window_id` for `key` if it is still the open one.
    pub fn take(&self, key: &K, window_id: u64) -> Option<Vec<BatchItem<T>>> {
        let mut state = self.lock();
        if state.windows.get(key).map(|w| w.id) != Some(window_id) {
            return None;
        }
        state.windows.remove(key).map(|w| w.items)
    }

    /// Close every open window.
    pub fn drain_all(&self) -> Vec<Vec<BatchItem<T>>> {
        self.lock()
            .windows
            .drain()
            .map(|(_, w)| w.items)
            .collect()
    }

    /// Members waiting in open windows.
    pub fn pending(&self) -> usize {
        self.lock().windows.values().map(|w| w.items.len()).sum()
    }

    pub fn open_windows(&self) -> usize {
        self.lock().windows.len()
    }
}
