//! Engine registry
//!
//! Hosts register their map engines here under a [`MapId`]; consumers look
//! them up or wait for them. The first map registered is the default map,
//! used by consumers that do not name one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::handle::{EngineHandle, MapId};
use crate::host::{EngineNotification, HostEngine};

/// Callback run once a map is available
pub type ReadyCallback = Box<dyn FnOnce(Arc<EngineHandle>) + Send>;

/// Pending wait registered with [`EngineRegistry::on_ready`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

struct Waiter {
    id: WaiterId,
    /// None waits for the default map
    target: Option<MapId>,
    callback: ReadyCallback,
}

#[derive(Default)]
struct RegistryTable {
    handles: HashMap<MapId, Arc<EngineHandle>>,
    /// Registration order; the first entry is the default map
    order: Vec<MapId>,
}

impl RegistryTable {
    fn default_map(&self) -> Option<&MapId> {
        self.order.first()
    }

    fn resolve(&self, map_id: Option<&MapId>) -> Option<Arc<EngineHandle>> {
        let map_id = map_id.or_else(|| self.default_map())?;
        self.handles.get(map_id).cloned()
    }
}

/// Registry of host engines
pub struct EngineRegistry {
    table: RwLock<RegistryTable>,
    waiters: Mutex<Vec<Waiter>>,
    next_waiter_id: AtomicU64,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(RegistryTable::default()),
            waiters: Mutex::new(Vec::new()),
            next_waiter_id: AtomicU64::new(1),
        }
    }

    /// Process-wide registry
    pub fn global() -> Arc<EngineRegistry> {
        static GLOBAL: OnceLock<Arc<EngineRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(EngineRegistry::new())).clone()
    }

    /// Register a host engine under `map_id`
    ///
    /// Waiters for this map (and for the default map, if this becomes it)
    /// are run before this returns. Registering an id twice cancels the
    /// previous handle.
    pub fn register<E>(&self, map_id: impl Into<MapId>, engine: E) -> Arc<EngineHandle>
    where
        E: HostEngine + 'static,
    {
        let map_id = map_id.into();
        let handle = Arc::new(EngineHandle::new(map_id.clone(), Box::new(engine)));

        let (replaced, is_default) = {
            let mut table = self.table.write();
            let replaced = table.handles.insert(map_id.clone(), handle.clone());
            if replaced.is_none() {
                table.order.push(map_id.clone());
            }
            (replaced, table.default_map() == Some(&map_id))
        };

        if let Some(previous) = replaced {
            log::warn!("Map '{}' registered again, cancelling previous handle", map_id);
            previous.cancel();
        }
        log::info!("Registered map '{}'{}", map_id, if is_default { " (default)" } else { "" });

        let ready: Vec<Waiter> = {
            let mut waiters = self.waiters.lock();
            let (ready, waiting): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut *waiters)
                .into_iter()
                .partition(|waiter| match &waiter.target {
                    Some(target) => *target == map_id,
                    None => is_default,
                });
            *waiters = waiting;
            ready
        };

        for waiter in ready {
            (waiter.callback)(handle.clone());
        }
        handle.process();
        handle
    }

    /// Remove a map; its handle stops accepting mutations
    pub fn unregister(&self, map_id: &MapId) -> Option<Arc<EngineHandle>> {
        let handle = {
            let mut table = self.table.write();
            let handle = table.handles.remove(map_id)?;
            table.order.retain(|id| id != map_id);
            handle
        };
        handle.cancel();
        log::info!("Unregistered map '{}'", map_id);
        Some(handle)
    }

    pub fn lookup(&self, map_id: &MapId) -> Option<Arc<EngineHandle>> {
        self.table.read().handles.get(map_id).cloned()
    }

    /// Look up `map_id`, or the default map when it is None
    pub fn resolve(&self, map_id: Option<&MapId>) -> Option<Arc<EngineHandle>> {
        self.table.read().resolve(map_id)
    }

    pub fn default_map(&self) -> Option<MapId> {
        self.table.read().default_map().cloned()
    }

    /// Run `callback` once the map is available
    ///
    /// Runs immediately and returns None if the map is already registered;
    /// otherwise returns an id that can cancel the wait.
    pub fn on_ready<F>(&self, map_id: Option<MapId>, callback: F) -> Option<WaiterId>
    where
        F: FnOnce(Arc<EngineHandle>) + Send + 'static,
    {
        let handle = {
            let mut waiters = self.waiters.lock();
            match self.table.read().resolve(map_id.as_ref()) {
                Some(handle) => handle,
                None => {
                    let id = WaiterId(self.next_waiter_id.fetch_add(1, Ordering::Relaxed));
                    waiters.push(Waiter {
                        id,
                        target: map_id,
                        callback: Box::new(callback),
                    });
                    return Some(id);
                }
            }
        };

        callback(handle);
        None
    }

    /// Drop a pending wait. Returns false if it already ran or was cancelled.
    pub fn cancel_waiter(&self, id: WaiterId) -> bool {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|waiter| waiter.id != id);
        waiters.len() != before
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Forward a host notification to a registered map
    pub fn notify(&self, map_id: &MapId, notification: EngineNotification) -> bool {
        match self.lookup(map_id) {
            Some(handle) => {
                handle.notify(notification);
                true
            }
            None => false,
        }
    }

    /// Registered maps in registration order
    pub fn map_ids(&self) -> Vec<MapId> {
        self.table.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.table.read().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().handles.is_empty()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
