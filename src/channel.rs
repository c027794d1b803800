//! Subscribe/unsubscribe-able notification channels
//!
//! Each channel keeps its listeners in a copy-on-write list behind an
//! [`ArcSwap`]. Publishing iterates a snapshot without taking a lock, so the
//! instrumented hot path never contends with subscription changes, and an
//! unsubscription never tears an in-flight publish.

use crate::bottleneck::BottleneckAccessor;
use crate::detector::{AccessStamp, Detector};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-unique identifier of a single access
pub type AccessId = u64;

/// One "entered" or "exited" notification
#[derive(Debug, Clone, Copy)]
pub struct AccessEvent<'a> {
    /// Detector that published the notification
    pub sender: &'a Detector,
    pub access_id: AccessId,
    /// Capacity units the access holds
    pub units: u64,
    pub accessor: &'a BottleneckAccessor,
    /// End cell of the access, for surveyors that snapshot it while open
    pub stamp: &'a Arc<AccessStamp>,
}

/// Receiver of access notifications
///
/// Listeners run synchronously on the publishing thread and may be invoked
/// concurrently from many threads.
pub trait AccessListener: Send + Sync {
    fn on_access(&self, event: &AccessEvent<'_>);
}

impl<F> AccessListener for F
where
    F: Fn(&AccessEvent<'_>) + Send + Sync,
{
    fn on_access(&self, event: &AccessEvent<'_>) {
        self(event)
    }
}

/// Handle returned by [`NotificationChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ListenerList = Vec<(SubscriptionId, Arc<dyn AccessListener>)>;

/// Observer list with lock-free publish
pub struct NotificationChannel {
    name: &'static str,
    next_id: AtomicU64,
    listeners: ArcSwap<ListenerList>,
}

impl NotificationChannel {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self, listener: Arc<dyn AccessListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.rcu(|current| {
            let mut next = ListenerList::clone(current);
            next.push((id, Arc::clone(&listener)));
            next
        });
        tracing::debug!(channel = self.name, subscription = id.0, "listener subscribed");
        id
    }

    /// Remove a listener; returns `false` if it was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let previous = self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|(sid, _)| *sid != id)
                .cloned()
                .collect::<ListenerList>()
        });
        let removed = previous.iter().any(|(sid, _)| *sid == id);
        if removed {
            tracing::debug!(channel = self.name, subscription = id.0, "listener unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every listener subscribed when the publish began
    pub fn publish(&self, event: &AccessEvent<'_>) {
        let listeners = self.listeners.load();
        for (_, listener) in listeners.iter() {
            listener.on_access(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("name", &self.name)
            .field("listeners", &self.len())
            .finish()
    }
}
