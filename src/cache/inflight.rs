//! Single-flight tracking for identical requests.
//!
//! The first request for a fingerprint becomes the leader and holds a
//! [`FlightGuard`] until its result is cached. Identical requests arriving in the
//! meantime get a [`FlightWaiter`], wait for the guard to drop, then look in the
//! cache again. A leader that fails or is cancelled simply drops its guard; the
//! next waiter takes over.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::Fingerprint;

/// Outcome of [`InflightRequests::join`].
pub enum Flight<'a> {
    Leader(FlightGuard<'a>),
    Follower(FlightWaiter),
}

#[derive(Default)]
pub struct InflightRequests {
    flights: Mutex<HashMap<Fingerprint, watch::Receiver<()>>>,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, watch::Receiver<()>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lead the flight for `key`, or follow the one already in the air.
    pub fn join(&self, key: &Fingerprint) -> Flight<'_> {
        let mut flights = self.lock();
        if let Some(rx) = flights.get(key) {
            return Flight::Follower(FlightWaiter { rx: rx.clone() });
        }
        let (tx, rx) = watch::channel(());
        flights.insert(key.clone(), rx);
        Flight::Leader(FlightGuard {
            owner: self,
            key: key.clone(),
            _tx: tx,
        })
    }

    /// Fingerprints currently led by some request.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held by the leader; dropping it lands the flight.
pub struct FlightGuard<'a> {
    owner: &'a InflightRequests,
    key: Fingerprint,
    // Dropped after `Drop::drop` removes the entry, which wakes the waiters.
    _tx: watch::Sender<()>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.key);
    }
}

pub struct FlightWaiter {
    rx: watch::Receiver<()>,
}

impl FlightWaiter {
    /// Resolve once the leader has finished, successfully or not.
    pub async fn landed(mut self) {
        // No value is ever sent; `changed` errors when the sender drops.
        while self.rx.changed().await.is_ok() {}
    }
}
