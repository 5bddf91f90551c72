//! In-process notification hub with disposable subscriptions.
//!
//! Each [`Period`](crate::period::Period) and each world owns an
//! [`EventHub`] for its own notifications. Handlers are registered with
//! [`EventHub::subscribe`], which returns a [`Subscription`]; dropping the
//! subscription (or calling [`Subscription::unsubscribe`]) removes the
//! handler.
//!
//! Handlers run synchronously on the publishing task, in registration
//! order. The handler list is snapshotted before dispatch, so a handler
//! may subscribe or unsubscribe (on this hub or any other) without
//! deadlocking.
//!
//! Handlers are `Fn(&E) + Send + Sync`: they receive a shared reference
//! to the event and can only mutate state they own through their own
//! interior mutability. That is what makes
//! [`EventHub::publish_parallel`] sound without any extra locking.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// A registered notification handler.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Below this many handlers, [`EventHub::publish_parallel`] dispatches
/// sequentially; spawning threads costs more than the handlers do.
const PARALLEL_THRESHOLD: usize = 32;

/// Registry of handlers for one event type.
struct HubInner<E> {
    /// Monotonic key source for new handlers.
    next_key: AtomicU64,
    /// Registered handlers, keyed in registration order.
    handlers: RwLock<BTreeMap<u64, Handler<E>>>,
}

/// A list of handlers for notifications of type `E`.
///
/// Cloning an `EventHub` yields another handle to the same handler list.
pub struct EventHub<E> {
    inner: Arc<HubInner<E>>,
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> core::fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<E> EventHub<E> {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_key: AtomicU64::new(0),
                handlers: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Return the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Copy the current handler list so dispatch runs without the lock.
    fn snapshot(&self) -> Vec<Handler<E>> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Deliver `event` to every handler, in registration order.
    pub fn publish(&self, event: &E) {
        for handler in self.snapshot() {
            handler(event);
        }
    }
}

impl<E: 'static> EventHub<E> {
    /// Register `handler` and return the handle that keeps it registered.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(handler));

        let hub: Weak<HubInner<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = hub.upgrade() {
                inner
                    .handlers
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            }
        })
    }
}

impl<E: Sync> EventHub<E> {
    /// Deliver `event` to every handler, spreading handlers across threads.
    ///
    /// There is no ordering between handlers. The call returns once every
    /// handler has returned. Small subscriber lists are dispatched on the
    /// calling thread.
    pub fn publish_parallel(&self, event: &E) {
        let handlers = self.snapshot();
        let workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);

        if handlers.len() < PARALLEL_THRESHOLD || workers < 2 {
            for handler in &handlers {
                handler(event);
            }
            return;
        }

        let chunk_size = handlers.len().div_ceil(workers);
        std::thread::scope(|scope| {
            for chunk in handlers.chunks(chunk_size) {
                scope.spawn(move || {
                    for handler in chunk {
                        handler(event);
                    }
                });
            }
        });
    }
}

/// Handle that keeps a handler registered until it is dropped.
///
/// Subscriptions are type-erased so one handle type covers every hub and
/// the message broker.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap the action that removes a registration.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the handler now. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
