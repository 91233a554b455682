//! Per-request progress reporting.
//!
//! Percentages only move forward. The most recent requests are retained so
//! progress can be queried after an analysis has finished.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Started,
    Prepared,
    CacheChecked,
    Dispatching,
    Streaming,
    Parsing,
    Completed,
    Failed,
}

impl ProgressStage {
    /// Nominal percentage for the stage.
    pub fn percent(&self) -> u8 {
        match self {
            ProgressStage::Started => 0,
            ProgressStage::Prepared => 10,
            ProgressStage::CacheChecked => 20,
            ProgressStage::Dispatching => 30,
            ProgressStage::Streaming => 30,
            ProgressStage::Parsing => 90,
            ProgressStage::Completed | ProgressStage::Failed => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub request_id: String,
    pub stage: ProgressStage,
    pub percent: u8,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

struct State {
    latest: HashMap<String, ProgressUpdate>,
    order: VecDeque<String>,
}

pub struct ProgressTracker {
    retain: usize,
    state: RwLock<State>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(retain: usize) -> Self {
        Self {
            retain: retain.max(1),
            state: RwLock::new(State {
                latest: HashMap::new(),
                order: VecDeque::new(),
            }),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn stage(&self, request_id: &str, stage: ProgressStage) {
        self.report(request_id, stage, stage.percent());
    }

    /// Record progress; regressions are ignored.
    pub fn report(&self, request_id: &str, stage: ProgressStage, percent: u8) {
        let percent = percent.min(100);
        let update = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(prev) = state.latest.get(request_id) {
                if percent < prev.percent {
                    return;
                }
            } else {
                state.order.push_back(request_id.to_string());
                while state.order.len() > self.retain {
                    if let Some(old) = state.order.pop_front() {
                        state.latest.remove(&old);
                    }
                }
            }
            let update = ProgressUpdate {
                request_id: request_id.to_string(),
                stage,
                percent,
            };
            state.latest.insert(request_id.to_string(), update.clone());
            update
        };
        if let Some(cb) = &self.callback {
            cb(&update);
        }
    }

    pub fn get(&self, request_id: &str) -> Option<ProgressUpdate> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .get(request_id)
            .cloned()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_monotonic_and_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new(8).with_callback(Arc::new(move |u: &ProgressUpdate| {
            sink.lock().unwrap().push(u.percent)
        }));
        tracker.stage("r1", ProgressStage::Started);
        tracker.stage("r1", ProgressStage::CacheChecked);
        tracker.stage("r1", ProgressStage::Prepared);
        tracker.report("r1", ProgressStage::Streaming, 55);
        tracker.stage("r1", ProgressStage::Completed);

        assert_eq!(*seen.lock().unwrap(), vec![0, 20, 55, 100]);
        assert_eq!(tracker.get("r1").unwrap().stage, ProgressStage::Completed);
    }

    #[test]
    fn test_retention_bound() {
        let tracker = ProgressTracker::new(2);
        for id in ["a", "b", "c"] {
            tracker.stage(id, ProgressStage::Started);
        }
        assert!(tracker.get("a").is_none());
        assert!(tracker.get("c").is_some());
    }
}
