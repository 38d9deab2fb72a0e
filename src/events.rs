//! Multicast handler sets for progress, completion and receive events.
//!
//! Handlers are stored in an [`ArcSwap`] snapshot so that dispatch never
//! takes a lock. This matters for receive events, which arrive on a thread
//! owned by the driver: that thread must not wait on anything held by the
//! caller. Writers (subscribe/unsubscribe) serialize on a short mutex and
//! publish a fresh snapshot.
//!
//! A handler that panics is isolated at dispatch: the panic is caught,
//! logged and dropped, and the remaining handlers still run. The panic
//! payload is not reported anywhere else.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Token returned by a subscribe call, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value, unique within one handler set.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: SubscriptionId,
    handler: Handler<E>,
}

impl<E> Clone for Entry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct Shared<E> {
    entries: ArcSwap<Vec<Entry<E>>>,
    writer: Mutex<()>,
    next_id: AtomicU64,
}

/// A thread-safe multicast set of event handlers.
///
/// Cloning a `Subscribers` yields another reference to the same set.
pub struct Subscribers<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E> Subscribers<E> {
    /// Create an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: ArcSwap::from_pointee(Vec::new()),
                writer: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Add a handler and return its subscription token.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let _writer = self.shared.writer.lock();
        let mut next = Vec::clone(&self.shared.entries.load());
        next.push(Entry {
            id,
            handler: Arc::new(handler),
        });
        self.shared.entries.store(Arc::new(next));
        id
    }

    /// Remove a handler. Returns `false` if the token was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _writer = self.shared.writer.lock();
        let current = self.shared.entries.load_full();
        if !current.iter().any(|entry| entry.id == id) {
            return false;
        }
        let next: Vec<_> = current
            .iter()
            .filter(|entry| entry.id != id)
            .cloned()
            .collect();
        self.shared.entries.store(Arc::new(next));
        true
    }

    /// Number of subscribed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.load().len()
    }

    /// Whether no handler is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every handler.
    pub fn clear(&self) {
        let _writer = self.shared.writer.lock();
        self.shared.entries.store(Arc::new(Vec::new()));
    }

    /// Deliver `event` synchronously to every handler subscribed right now.
    ///
    /// Returns the number of handlers that ran to completion. Panicking
    /// handlers are skipped.
    pub fn dispatch(&self, event: &E) -> usize {
        let snapshot = self.shared.entries.load_full();
        let mut delivered = 0;
        for entry in snapshot.iter() {
            let handler = &entry.handler;
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_ok() {
                delivered += 1;
            } else {
                warn!(subscription = %entry.id, "event handler panicked; panic dropped");
            }
        }
        delivered
    }
}
