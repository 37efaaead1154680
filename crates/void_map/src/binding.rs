//! Map bindings
//!
//! A [`MapBinding`] is one consumer's attachment to a map. It resolves to
//! the map's [`EngineHandle`] once the map is registered (and, optionally,
//! once a given layer shows up on it), and on teardown removes everything
//! the consumer created there.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use void_core::ConsumerId;
use void_event::SubscriberId;

use crate::handle::{EngineHandle, MapId};
use crate::host::Condition;
use crate::registry::{EngineRegistry, WaiterId};

/// Callback run once a binding resolves
pub type ResolvedCallback = Box<dyn FnOnce(&Arc<EngineHandle>) + Send>;

/// Options for [`MapBinding::new`]
#[derive(Debug, Clone, Default)]
pub struct BindingOptions {
    /// Map to bind to; the default map when None
    pub map_id: Option<MapId>,
    /// Hold off resolving until this layer exists on the map
    pub wait_for_layer: Option<String>,
}

impl BindingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_map(mut self, map_id: impl Into<MapId>) -> Self {
        self.map_id = Some(map_id.into());
        self
    }

    pub fn waiting_for_layer(mut self, layer_id: impl Into<String>) -> Self {
        self.wait_for_layer = Some(layer_id.into());
        self
    }
}

/// Binding lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingStatus {
    Pending,
    Resolved,
    TornDown,
}

enum BindingState {
    Pending {
        waiter: Option<WaiterId>,
        /// Registered map still missing the awaited layer
        candidate: Option<(Arc<EngineHandle>, SubscriberId)>,
        callbacks: Vec<ResolvedCallback>,
    },
    Resolved(Arc<EngineHandle>),
    TornDown,
}

struct BindingInner {
    registry: Arc<EngineRegistry>,
    options: BindingOptions,
    consumer: ConsumerId,
    state: Mutex<BindingState>,
}

impl BindingInner {
    /// The registry found the map
    fn on_handle(self: &Arc<Self>, handle: Arc<EngineHandle>) {
        {
            let mut state = self.state.lock();
            let BindingState::Pending { waiter, candidate, .. } = &mut *state else {
                return;
            };
            *waiter = None;

            if let Some(layer_id) = &self.options.wait_for_layer {
                if !handle.has_known_layer(layer_id) {
                    log::debug!(
                        "{} waiting for layer '{}' on map '{}'",
                        self.consumer,
                        layer_id,
                        handle.map_id()
                    );
                    let weak: Weak<Self> = Arc::downgrade(self);
                    let subscription =
                        handle.subscribe(Condition::LayersChanged, self.consumer, move |_| {
                            if let Some(inner) = weak.upgrade() {
                                inner.recheck();
                            }
                        });
                    *candidate = Some((handle, subscription));
                    return;
                }
            }
        }
        self.resolve(handle);
    }

    /// Layers changed on the candidate map
    fn recheck(&self) {
        let handle = {
            let state = self.state.lock();
            match (&*state, &self.options.wait_for_layer) {
                (BindingState::Pending { candidate: Some((handle, _)), .. }, Some(layer_id))
                    if handle.has_known_layer(layer_id) =>
                {
                    handle.clone()
                }
                _ => return,
            }
        };
        self.resolve(handle);
    }

    fn resolve(&self, handle: Arc<EngineHandle>) {
        let previous = {
            let mut state = self.state.lock();
            if !matches!(*state, BindingState::Pending { .. }) {
                return;
            }
            std::mem::replace(&mut *state, BindingState::Resolved(handle.clone()))
        };
        let BindingState::Pending { candidate, callbacks, .. } = previous else {
            return;
        };

        if let Some((candidate, subscription)) = candidate {
            candidate.unsubscribe(subscription);
        }
        handle.acquire();
        log::debug!("{} bound to map '{}'", self.consumer, handle.map_id());

        for callback in callbacks {
            callback(&handle);
        }
    }
}

/// One consumer's attachment to a map
pub struct MapBinding {
    inner: Arc<BindingInner>,
}

impl MapBinding {
    /// Bind a fresh consumer to a map in `registry`
    pub fn new(registry: &Arc<EngineRegistry>, options: BindingOptions) -> Self {
        Self::with_consumer(registry, options, ConsumerId::new())
    }

    /// Bind as an existing consumer
    pub fn with_consumer(
        registry: &Arc<EngineRegistry>,
        options: BindingOptions,
        consumer: ConsumerId,
    ) -> Self {
        let inner = Arc::new(BindingInner {
            registry: registry.clone(),
            options,
            consumer,
            state: Mutex::new(BindingState::Pending {
                waiter: None,
                candidate: None,
                callbacks: Vec::new(),
            }),
        });

        let weak = Arc::downgrade(&inner);
        let waiter = registry.on_ready(inner.options.map_id.clone(), move |handle| {
            if let Some(inner) = weak.upgrade() {
                inner.on_handle(handle);
            }
        });

        if let Some(id) = waiter {
            if let BindingState::Pending { waiter, .. } = &mut *inner.state.lock() {
                *waiter = Some(id);
            }
        }
        Self { inner }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.inner.consumer
    }

    pub fn options(&self) -> &BindingOptions {
        &self.inner.options
    }

    pub fn status(&self) -> BindingStatus {
        match &*self.inner.state.lock() {
            BindingState::Pending { .. } => BindingStatus::Pending,
            BindingState::Resolved(_) => BindingStatus::Resolved,
            BindingState::TornDown => BindingStatus::TornDown,
        }
    }

    /// Resolved handle, if any
    pub fn handle(&self) -> Option<Arc<EngineHandle>> {
        match &*self.inner.state.lock() {
            BindingState::Resolved(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Run `callback` with the handle once resolved; immediately if it
    /// already is. Dropped without running after teardown.
    pub fn on_resolved<F>(&self, callback: F)
    where
        F: FnOnce(&Arc<EngineHandle>) + Send + 'static,
    {
        let handle = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                BindingState::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                BindingState::Resolved(handle) => handle.clone(),
                BindingState::TornDown => return,
            }
        };
        callback(&handle);
    }

    /// Release the binding and remove what the consumer created on the map
    ///
    /// Safe to call more than once.
    pub fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), BindingState::TornDown);

        match previous {
            BindingState::Pending { waiter, candidate, .. } => {
                if let Some(id) = waiter {
                    self.inner.registry.cancel_waiter(id);
                }
                if let Some((handle, subscription)) = candidate {
                    handle.unsubscribe(subscription);
                }
            }
            BindingState::Resolved(handle) => {
                let report = handle.cleanup(self.inner.consumer);
                handle.release();
                log::debug!(
                    "{} released map '{}' ({} layers removed)",
                    self.inner.consumer,
                    handle.map_id(),
                    report.layers
                );
                handle.process();
            }
            BindingState::TornDown => {}
        }
    }
}

impl Drop for MapBinding {
    fn drop(&mut self) {
        self.teardown();
    }
}
