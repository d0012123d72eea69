//! Generic single-flight: at most one in-flight computation per key, with all waiters
//! observing the leader's result or error.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

struct Slot<V, E> {
    result: Mutex<Option<Result<V, E>>>,
    done: Notify,
}

pub struct SingleFlight<K, V, E> {
    inflight: Mutex<HashMap<K, Arc<Slot<V, E>>>>,
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }

    /// Runs `f` for `key` unless another caller is already computing it, in which case
    /// this call awaits that leader's outcome instead. A cancelled follower simply stops
    /// waiting; it never cancels the leader.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let (slot, is_leader) = {
            let mut inflight = self.inflight.lock().await;
            if let Some(slot) = inflight.get(&key) {
                (slot.clone(), false)
            } else {
                let slot = Arc::new(Slot { result: Mutex::new(None), done: Notify::new() });
                inflight.insert(key.clone(), slot.clone());
                (slot, true)
            }
        };

        if is_leader {
            let outcome = f().await;
            *slot.result.lock().await = Some(outcome.clone());
            self.inflight.lock().await.remove(&key);
            slot.done.notify_waiters();
            outcome
        } else {
            loop {
                // Register for the wakeup before checking the result: if the leader's
                // `notify_waiters()` lands between the check and the await below, a
                // `Notified` created only at that point would miss it forever, since
                // `notify_waiters()` leaves no permit for later subscribers.
                let notified = slot.done.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(outcome) = slot.result.lock().await.clone() {
                    return outcome;
                }
                notified.await;
            }
        }
    }
}
