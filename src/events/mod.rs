//! Per-resource progress fan-out.
//!
//! [`ProgressBroadcaster`] keeps one bounded queue per subscriber. Delivery
//! is asymmetric: incremental events are offered without blocking and
//! dropped when a queue is full, while terminal events wait (bounded by a
//! timeout) for room in every queue, since a client that misses `complete`
//! or `error` never stops waiting.

use futures::future::join_all;
use mediastash_common::{ProgressEvent, ResourceId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Identifier of one subscription, unique per broadcaster.
pub type SubscriberId = u64;

type SubscriberMap = HashMap<ResourceId, HashMap<SubscriberId, mpsc::Sender<ProgressEvent>>>;

#[derive(Debug)]
struct Inner {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
    capacity: usize,
    terminal_timeout: Duration,
}

impl Inner {
    fn remove(&self, resource: &ResourceId, id: SubscriberId) -> bool {
        let mut map = self.subscribers.lock();
        let Some(subs) = map.get_mut(resource) else {
            return false;
        };
        let removed = subs.remove(&id).is_some();
        if subs.is_empty() {
            map.remove(resource);
        }
        removed
    }

    fn senders(&self, resource: &ResourceId) -> Vec<(SubscriberId, mpsc::Sender<ProgressEvent>)> {
        self.subscribers
            .lock()
            .get(resource)
            .map(|subs| subs.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default()
    }
}

/// Publish/subscribe hub for download progress, keyed by resource.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    inner: Arc<Inner>,
}

impl ProgressBroadcaster {
    /// `capacity` bounds each subscriber's queue; `terminal_timeout` bounds
    /// how long a terminal event waits on a full queue.
    pub fn new(capacity: usize, terminal_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                terminal_timeout,
            }),
        }
    }

    /// Register a new subscriber for every quality of `resource`.
    pub fn subscribe(&self, resource: &ResourceId) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner
            .subscribers
            .lock()
            .entry(resource.clone())
            .or_default()
            .insert(id, tx);
        debug!(resource_id = %resource, subscriber = id, "Progress subscriber added");
        Subscription {
            id,
            resource: resource.clone(),
            rx,
            inner: self.inner.clone(),
        }
    }

    /// Remove a subscriber. Calling it again, or after the subscription was
    /// dropped, is a no-op.
    pub fn unsubscribe(&self, resource: &ResourceId, id: SubscriberId) {
        if self.inner.remove(resource, id) {
            debug!(resource_id = %resource, subscriber = id, "Progress subscriber removed");
        }
    }

    pub fn subscriber_count(&self, resource: &ResourceId) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(resource)
            .map_or(0, |subs| subs.len())
    }

    /// Offer an event to every subscriber without waiting.
    ///
    /// Full queues drop the event. Returns how many subscribers received it.
    pub fn offer(&self, resource: &ResourceId, event: &ProgressEvent) -> usize {
        let mut delivered = 0;
        for (id, tx) in self.inner.senders(resource) {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(resource_id = %resource, subscriber = id, "Subscriber queue full, dropping progress update");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.inner.remove(resource, id);
                }
            }
        }
        delivered
    }

    /// Deliver an event to every subscriber.
    ///
    /// Terminal events wait up to the terminal timeout per subscriber (all
    /// subscribers concurrently); incremental events go through [`offer`].
    ///
    /// [`offer`]: ProgressBroadcaster::offer
    pub async fn publish(&self, resource: &ResourceId, event: ProgressEvent) -> usize {
        if !event.is_terminal() {
            return self.offer(resource, &event);
        }

        let timeout = self.inner.terminal_timeout;
        let sends = self.inner.senders(resource).into_iter().map(|(id, tx)| {
            let event = event.clone();
            async move {
                let outcome = tokio::time::timeout(timeout, tx.send(event)).await;
                (id, outcome)
            }
        });

        let mut delivered = 0;
        for (id, outcome) in join_all(sends).await {
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => {
                    self.inner.remove(resource, id);
                }
                Err(_) => warn!(
                    resource_id = %resource,
                    subscriber = id,
                    status = %event.status,
                    "Timed out delivering terminal event"
                ),
            }
        }
        delivered
    }
}

/// A live subscription. Unsubscribes when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    resource: ResourceId,
    rx: mpsc::Receiver<ProgressEvent>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.remove(&self.resource, self.id);
    }
}
