//! # void_event - Owner-scoped Event Routing
//!
//! Event plumbing for shared hosts with many independent consumers:
//! - Handlers routed by an arbitrary ordered key (event kind, target, ...)
//! - Every registration carries the [`ConsumerId`] that made it, so one
//!   consumer's handlers can be dropped without touching anyone else's
//! - A FIFO [`EventChannel`] for notifications raised while a dispatch is
//!   already running

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use void_core::ConsumerId;

/// Shared handler function type
///
/// Handlers are reference counted so a dispatcher can clone the matching set
/// out of the bus and call them after releasing any lock around it.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscriber ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

struct Registration<E> {
    id: SubscriberId,
    owner: ConsumerId,
    handler: Handler<E>,
}

/// Handler table keyed by route and scoped by owner
pub struct ScopedBus<K, E> {
    /// Handlers per route, in subscription order
    routes: BTreeMap<K, Vec<Registration<E>>>,
    /// Next subscriber ID
    next_subscriber_id: u64,
}

impl<K: Ord + Clone, E> ScopedBus<K, E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
            next_subscriber_id: 1,
        }
    }

    /// Register `handler` for `key` on behalf of `owner`
    pub fn subscribe<F>(&mut self, key: K, owner: ConsumerId, handler: F) -> SubscriberId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_shared(key, owner, Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn subscribe_shared(
        &mut self,
        key: K,
        owner: ConsumerId,
        handler: Handler<E>,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber_id);
        self.next_subscriber_id += 1;

        self.routes.entry(key).or_default().push(Registration { id, owner, handler });
        id
    }

    /// Remove one registration. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let mut removed = false;
        for registrations in self.routes.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
        }
        self.routes.retain(|_, registrations| !registrations.is_empty());
        removed
    }

    /// Remove every registration made by `owner`, returning how many went
    pub fn unsubscribe_owner(&mut self, owner: ConsumerId) -> usize {
        let mut removed = 0;
        for registrations in self.routes.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| r.owner != owner);
            removed += before - registrations.len();
        }
        self.routes.retain(|_, registrations| !registrations.is_empty());
        removed
    }

    /// Check whether `owner` has a handler on `key`
    pub fn is_subscribed(&self, key: &K, owner: ConsumerId) -> bool {
        self.routes
            .get(key)
            .map(|registrations| registrations.iter().any(|r| r.owner == owner))
            .unwrap_or(false)
    }

    /// Clone out the handlers registered for `key`, in subscription order
    pub fn handlers(&self, key: &K) -> Vec<Handler<E>> {
        self.routes
            .get(key)
            .map(|registrations| registrations.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    /// Call every handler on `key` directly, returning how many ran
    pub fn dispatch(&self, key: &K, event: &E) -> usize {
        let handlers = self.handlers(key);
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of registrations held by `owner`
    pub fn owner_count(&self, owner: ConsumerId) -> usize {
        self.routes
            .values()
            .flat_map(|registrations| registrations.iter())
            .filter(|r| r.owner == owner)
            .count()
    }

    /// Total number of registrations
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Check if there are no registrations
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<K: Ord + Clone, E> Default for ScopedBus<K, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO channel for single-type events
pub struct EventChannel<E> {
    queue: Mutex<VecDeque<E>>,
}

impl<E> EventChannel<E> {
    /// Create a new channel
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Send an event
    pub fn send(&self, event: E) {
        self.queue.lock().push_back(event);
    }

    /// Receive the oldest event
    pub fn receive(&self) -> Option<E> {
        self.queue.lock().pop_front()
    }

    /// Drain all events
    pub fn drain(&self) -> Vec<E> {
        self.queue.lock().drain(..).collect()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Get pending count
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<E> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude
pub mod prelude {
    pub use crate::{EventChannel, Handler, ScopedBus, SubscriberId};
}
