//! Per-key coalescing of concurrent work
//!
//! The first caller for a key spawns the work on a detached task and every
//! caller, including the first, awaits the published result through a
//! `watch` channel. The registry entry is removed once the result has been
//! published (or the task died), so later callers start fresh work.
//!
//! Because the work is detached, a caller that goes away (client disconnect,
//! request timeout) never cancels it for the remaining waiters.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::trace;

type Registry<K, T> = Arc<Mutex<HashMap<K, watch::Receiver<Option<T>>>>>;

/// How a caller took part in a flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Started the work
    Leader,
    /// Joined work another caller started
    Follower,
}

pub struct SingleFlight<K, T> {
    in_flight: Registry<K, T>,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Hash + Eq + Clone + std::fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(registry: &Registry<K, T>) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<T>>>> {
        registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` for `key` unless it is already running, then await its result
    ///
    /// `work` is only polled when this caller becomes the leader. Returns
    /// `None` if the worker task died without publishing.
    pub async fn run<F>(&self, key: K, work: F) -> (Option<T>, FlightRole)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (mut receiver, role) = {
            let mut in_flight = Self::lock(&self.in_flight);
            match in_flight.get(&key) {
                Some(receiver) => (receiver.clone(), FlightRole::Follower),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(key.clone(), receiver.clone());
                    self.spawn_leader(key.clone(), sender, work);
                    (receiver, FlightRole::Leader)
                }
            }
        };

        trace!(key = ?key, role = ?role, "Awaiting in-flight result");
        let result = receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| value.clone());
        (result, role)
    }

    fn spawn_leader<F>(&self, key: K, sender: watch::Sender<Option<T>>, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let cleanup = RemoveOnDrop {
            registry: self.in_flight.clone(),
            key,
        };
        tokio::spawn(async move {
            let result = work.await;
            // Receivers may all be gone; the result is still published for late joiners
            sender.send_replace(Some(result));
            drop(cleanup);
        });
    }

    /// Number of keys with work currently running
    pub fn in_flight(&self) -> usize {
        Self::lock(&self.in_flight).len()
    }
}

/// Clears a registry entry after publishing, or when the worker unwinds
struct RemoveOnDrop<K: Hash + Eq, T> {
    registry: Registry<K, T>,
    key: K,
}

impl<K: Hash + Eq, T> Drop for RemoveOnDrop<K, T> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
