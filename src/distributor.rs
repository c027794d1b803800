//! Scope-local re-publishers of "exited" notifications
//!
//! A distributor subscribes once to the detector's "exited" channel and
//! re-publishes only the notifications raised inside its own scope, so any
//! number of surveyors sharing that scope cost the detector one listener.
//!
//! - [`CallContextDistributor`] follows a logical operation. It becomes the
//!   ambient context of a thread while one of its [`ContextGuard`]s is alive,
//!   and the same context can be entered on whichever worker the operation
//!   moves to.
//! - [`ThreadDistributor`] is bound to the OS thread that created it.
//!
//! ```
//! use chokepoint::bottleneck::Bottleneck;
//! use chokepoint::detector::Detector;
//! use chokepoint::distributor::CallContextDistributor;
//! use chokepoint::survey::{CallContextSurveyor, Surveyor};
//! use std::sync::Arc;
//!
//! let detector = Arc::new(Detector::new());
//! let context = Arc::new(CallContextDistributor::new(&detector));
//! let surveyor = CallContextSurveyor::new(&context, None, None, None).unwrap();
//! let db = Arc::new(Bottleneck::new("db", 1));
//!
//! context.scope(|| drop(detector.enter_bottleneck(&db)));
//! drop(detector.enter_bottleneck(&db)); // outside the context: not surveyed
//!
//! assert_eq!(surveyor.most_utilized_bottleneck().unwrap().access_count(), 1);
//! ```

use crate::channel::{AccessEvent, AccessListener, NotificationChannel, SubscriptionId};
use crate::detector::Detector;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Call contexts entered on this thread, innermost last
    static CONTEXT_STACK: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

fn current_context_id() -> Option<u64> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayScope {
    CallContext(u64),
    Thread(ThreadId),
}

impl RelayScope {
    fn is_current(&self) -> bool {
        match self {
            RelayScope::CallContext(id) => current_context_id() == Some(*id),
            RelayScope::Thread(owner) => thread::current().id() == *owner,
        }
    }
}

/// Detector listener that forwards in-scope notifications
struct Relay {
    scope: RelayScope,
    channel: NotificationChannel,
}

impl AccessListener for Relay {
    fn on_access(&self, event: &AccessEvent<'_>) {
        if self.scope.is_current() {
            self.channel.publish(event);
        }
    }
}

/// Upstream subscription shared by both distributor flavors
struct Upstream {
    detector: Arc<Detector>,
    relay: Arc<Relay>,
    subscription: SubscriptionId,
}

impl Upstream {
    fn attach(detector: &Arc<Detector>, scope: RelayScope, channel_name: &'static str) -> Self {
        let relay = Arc::new(Relay {
            scope,
            channel: NotificationChannel::new(channel_name),
        });
        let subscription = detector.exited_channel().subscribe(relay.clone());
        Self {
            detector: Arc::clone(detector),
            relay,
            subscription,
        }
    }
}

impl Drop for Upstream {
    fn drop(&mut self) {
        self.detector.exited_channel().unsubscribe(self.subscription);
    }
}

/// Distributor for one logical call chain
pub struct CallContextDistributor {
    id: u64,
    upstream: Upstream,
}

impl CallContextDistributor {
    pub fn new(detector: &Arc<Detector>) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context = id, "call context created");
        Self {
            id,
            upstream: Upstream::attach(detector, RelayScope::CallContext(id), "call-context"),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.upstream.detector
    }

    /// Channel surveyors in this context subscribe to
    pub fn channel(&self) -> &NotificationChannel {
        &self.upstream.relay.channel
    }

    /// Make this the current thread's ambient context until the guard drops
    pub fn enter(&self) -> ContextGuard {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.id));
        ContextGuard {
            id: self.id,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with this context entered
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// Whether this context is innermost on the current thread
    pub fn is_current(&self) -> bool {
        current_context_id() == Some(self.id)
    }
}

impl fmt::Debug for CallContextDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContextDistributor")
            .field("id", &self.id)
            .field("surveyors", &self.channel().len())
            .finish()
    }
}

/// Keeps a call context entered on the current thread
///
/// Not `Send`: a context is entered per thread.
#[must_use = "the context is left as soon as the guard is dropped"]
pub struct ContextGuard {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard").field("id", &self.id).finish()
    }
}

/// Distributor for the OS thread that created it
pub struct ThreadDistributor {
    thread_id: ThreadId,
    thread_name: Option<String>,
    upstream: Upstream,
}

impl ThreadDistributor {
    pub fn new(detector: &Arc<Detector>) -> Self {
        let current = thread::current();
        tracing::debug!(thread = ?current.id(), "thread distributor created");
        Self {
            thread_id: current.id(),
            thread_name: current.name().map(str::to_string),
            upstream: Upstream::attach(detector, RelayScope::Thread(current.id()), "thread"),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.upstream.detector
    }

    /// Channel surveyors on this thread subscribe to
    pub fn channel(&self) -> &NotificationChannel {
        &self.upstream.relay.channel
    }
}

impl fmt::Debug for ThreadDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadDistributor")
            .field("thread_id", &self.thread_id)
            .field("thread_name", &self.thread_name)
            .field("surveyors", &self.channel().len())
            .finish()
    }
}
