use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::Index;

type Callback = Arc<dyn Fn(&Arc<Index>) + Send + Sync>;

/// Handle returned by [`IndexBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process fan-out of "index updated" notifications.
///
/// Callbacks run synchronously on the publishing thread, in registration
/// order. Stream subscribers get the same `Arc<Index>` through a broadcast
/// channel. Nothing is replayed to late subscribers.
pub struct IndexBus {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(SubscriptionId, Callback)>>,
    stream: broadcast::Sender<Arc<Index>>,
}

impl IndexBus {
    pub fn new(capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(capacity.max(1));
        Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
            stream,
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Arc<Index>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback = Arc::new(callback);
        let mut guard = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        guard.push((id, callback));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|(sid, _)| *sid != id);
        guard.len() != before
    }

    pub fn subscribe_stream(&self) -> broadcast::Receiver<Arc<Index>> {
        self.stream.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        callbacks + self.stream.receiver_count()
    }

    pub fn publish(&self, index: Arc<Index>) {
        // Snapshot the list so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<Callback> = {
            let guard = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for cb in callbacks {
            if catch_unwind(AssertUnwindSafe(|| cb(&index))).is_err() {
                warn!("index subscriber panicked");
            }
        }

        let receivers = self.stream.send(index).unwrap_or(0);
        trace!(receivers, "index update published");
    }
}

impl Default for IndexBus {
    fn default() -> Self {
        Self::new(64)
    }
}
