//! Engine handles
//!
//! An [`EngineHandle`] wraps one registered host engine and is shared by
//! every consumer bound to that map. It:
//! - Forwards style mutations and records which consumer owns what
//! - Tracks the engine generation, bumped whenever the style is reset
//! - Routes change notifications to per-condition listeners
//! - Routes pointer interactions to per-layer handlers
//!
//! Locks inside the handle are never held while a listener or handler
//! runs, so callbacks are free to call back into the handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use void_core::{ConsumerId, Generation};
use void_event::{EventChannel, ScopedBus, SubscriberId};

use crate::error::{EngineError, EngineOp, MapError, MapResult};
use crate::host::{
    Condition, EngineNotification, HostEngine, InteractionEvent, LayerEventKind, LayerInfo,
    LayerSpec,
};
use crate::ledger::{OwnedResources, OwnershipLedger};

/// Identifier a map is registered under
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(String);

impl MapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MapId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MapId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What [`EngineHandle::cleanup`] removed for a consumer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub layers: usize,
    pub sources: usize,
    pub listeners: usize,
    /// Sources the engine refused to remove yet; retried as layers change
    pub orphaned: usize,
}

type InteractionKey = (LayerEventKind, String);

/// Shared handle to one host engine
pub struct EngineHandle {
    map_id: MapId,
    engine: Mutex<Box<dyn HostEngine>>,
    /// False once the map has been unregistered
    ready: AtomicBool,
    generation: RwLock<Generation>,
    /// Layer list as of the last processed notification
    known_layers: RwLock<Vec<LayerInfo>>,
    ledger: Mutex<OwnershipLedger>,
    listeners: Mutex<ScopedBus<Condition, EngineNotification>>,
    interactions: Mutex<ScopedBus<InteractionKey, InteractionEvent>>,
    pending: EventChannel<EngineNotification>,
    processing: AtomicBool,
    consumers: AtomicUsize,
}

/// Clears the processing flag when a drain finishes
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EngineHandle {
    /// Wrap a host engine
    pub fn new(map_id: MapId, engine: Box<dyn HostEngine>) -> Self {
        let known_layers = engine.layers();
        Self {
            map_id,
            engine: Mutex::new(engine),
            ready: AtomicBool::new(true),
            generation: RwLock::new(Generation::INITIAL),
            known_layers: RwLock::new(known_layers),
            ledger: Mutex::new(OwnershipLedger::new()),
            listeners: Mutex::new(ScopedBus::new()),
            interactions: Mutex::new(ScopedBus::new()),
            pending: EventChannel::new(),
            processing: AtomicBool::new(false),
            consumers: AtomicUsize::new(0),
        }
    }

    pub fn map_id(&self) -> &MapId {
        &self.map_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current engine generation
    pub fn generation(&self) -> Generation {
        *self.generation.read()
    }

    /// Number of bindings currently resolved to this handle
    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) {
        self.consumers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let _ = self
            .consumers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Stop accepting mutations; pending notifications are dropped
    pub(crate) fn cancel(&self) {
        if self.ready.swap(false, Ordering::AcqRel) {
            log::info!("Map '{}' cancelled", self.map_id);
            self.pending.drain();
        }
    }

    // Queries

    pub fn has_layer(&self, id: &str) -> bool {
        self.engine.lock().has_layer(id)
    }

    pub fn has_source(&self, id: &str) -> bool {
        self.engine.lock().has_source(id)
    }

    pub fn layers(&self) -> Vec<LayerInfo> {
        self.engine.lock().layers()
    }

    pub fn first_symbol_layer(&self) -> Option<String> {
        self.engine.lock().first_symbol_layer()
    }

    /// Layer list as of the last processed notification
    pub fn known_layers(&self) -> Vec<LayerInfo> {
        self.known_layers.read().clone()
    }

    /// Check the layer list as of the last processed notification
    pub fn has_known_layer(&self, id: &str) -> bool {
        self.known_layers.read().iter().any(|layer| layer.id == id)
    }

    pub fn layer_owner(&self, id: &str) -> Option<ConsumerId> {
        self.ledger.lock().layer_owner(id)
    }

    pub fn source_owner(&self, id: &str) -> Option<ConsumerId> {
        self.ledger.lock().source_owner(id)
    }

    pub fn owned_by(&self, owner: ConsumerId) -> OwnedResources {
        self.ledger.lock().owned_by(owner)
    }

    /// Sources whose owner is gone but which are still waiting for removal
    pub fn orphaned_sources(&self) -> Vec<String> {
        self.ledger.lock().orphans()
    }

    // Mutations

    fn mutate<F>(&self, op: EngineOp, target: &str, call: F) -> MapResult<()>
    where
        F: FnOnce(&mut dyn HostEngine) -> Result<(), EngineError>,
    {
        if !self.is_ready() {
            return Err(MapError::Cancelled(self.map_id.clone()));
        }

        let result = {
            let mut engine = self.engine.lock();
            call(&mut **engine)
        };

        result.map_err(|source| {
            log::warn!("[{}] {} on '{}' failed: {}", self.map_id, op, target, source);
            MapError::EngineRejection {
                op,
                target: target.to_string(),
                source,
            }
        })
    }

    /// Add a layer (and its inline source) on behalf of `owner`
    pub fn add_layer(
        &self,
        spec: &LayerSpec,
        before: Option<&str>,
        owner: ConsumerId,
    ) -> MapResult<()> {
        self.mutate(EngineOp::AddLayer, &spec.id, |engine| {
            engine.add_layer(spec, before, owner)
        })?;

        let mut ledger = self.ledger.lock();
        ledger.record_layer(&spec.id, owner);
        if spec.inline_source().is_some() {
            ledger.record_source(&spec.id, owner);
        }
        log::debug!(
            "[{}] {} added {} layer '{}'",
            self.map_id,
            owner,
            spec.layer_type,
            spec.id
        );
        Ok(())
    }

    pub fn remove_layer(&self, id: &str) -> MapResult<()> {
        self.mutate(EngineOp::RemoveLayer, id, |engine| engine.remove_layer(id))?;
        self.ledger.lock().forget_layer(id);
        log::debug!("[{}] removed layer '{}'", self.map_id, id);
        Ok(())
    }

    pub fn remove_source(&self, id: &str) -> MapResult<()> {
        self.mutate(EngineOp::RemoveSource, id, |engine| engine.remove_source(id))?;
        self.ledger.lock().forget_source(id);
        log::debug!("[{}] removed source '{}'", self.map_id, id);
        Ok(())
    }

    pub fn set_source_data(&self, id: &str, data: &Value) -> MapResult<()> {
        self.mutate(EngineOp::SetSourceData, id, |engine| {
            engine.set_source_data(id, data)
        })
    }

    pub fn set_paint_property(&self, id: &str, key: &str, value: &Value) -> MapResult<()> {
        self.mutate(EngineOp::SetPaintProperty, id, |engine| {
            engine.set_paint_property(id, key, value)
        })
    }

    pub fn set_layout_property(&self, id: &str, key: &str, value: &Value) -> MapResult<()> {
        self.mutate(EngineOp::SetLayoutProperty, id, |engine| {
            engine.set_layout_property(id, key, value)
        })
    }

    pub fn set_filter(&self, id: &str, filter: Option<&Value>) -> MapResult<()> {
        self.mutate(EngineOp::SetFilter, id, |engine| engine.set_filter(id, filter))
    }

    pub fn set_zoom_range(
        &self,
        id: &str,
        minzoom: Option<f64>,
        maxzoom: Option<f64>,
    ) -> MapResult<()> {
        self.mutate(EngineOp::SetZoomRange, id, |engine| {
            engine.set_zoom_range(id, minzoom, maxzoom)
        })
    }

    pub fn move_layer(&self, id: &str, before: &str) -> MapResult<()> {
        self.mutate(EngineOp::MoveLayer, id, |engine| engine.move_layer(id, before))
    }

    // Notifications

    /// Subscribe `owner` to notifications of one condition
    pub fn subscribe<F>(&self, condition: Condition, owner: ConsumerId, listener: F) -> SubscriberId
    where
        F: Fn(&EngineNotification) + Send + Sync + 'static,
    {
        self.listeners.lock().subscribe(condition, owner, listener)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.listeners.lock().unsubscribe(id)
    }

    pub fn is_subscribed(&self, condition: Condition, owner: ConsumerId) -> bool {
        self.listeners.lock().is_subscribed(&condition, owner)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Queue a notification the host learned about, then deliver the queue
    pub fn notify(&self, notification: EngineNotification) {
        if !self.is_ready() {
            return;
        }
        self.pending.send(notification);
        self.process();
    }

    /// Poll the engine and deliver queued notifications in order
    ///
    /// Notifications raised while listeners run are appended to the queue
    /// and delivered by the same drain. A nested call returns immediately.
    pub fn process(&self) -> usize {
        if self.processing.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut delivered = 0;
        loop {
            if !self.is_ready() {
                break;
            }
            self.poll_engine();
            let Some(notification) = self.pending.receive() else {
                break;
            };

            self.observe(&notification);
            let listeners = self.listeners.lock().handlers(&notification.condition());
            for listener in &listeners {
                listener(&notification);
            }
            delivered += 1;
        }
        delivered
    }

    fn poll_engine(&self) {
        let polled = self.engine.lock().poll_notifications();
        for notification in polled {
            self.pending.send(notification);
        }
    }

    /// Update handle state before listeners see a notification
    fn observe(&self, notification: &EngineNotification) {
        match notification {
            EngineNotification::StyleReset => {
                let generation = {
                    let mut generation = self.generation.write();
                    *generation = generation.next();
                    *generation
                };
                {
                    let engine = self.engine.lock();
                    let pruned = self
                        .ledger
                        .lock()
                        .retain_present(|id| engine.has_layer(id), |id| engine.has_source(id));
                    log::info!(
                        "[{}] style reset, now at {} ({} records pruned)",
                        self.map_id,
                        generation,
                        pruned
                    );
                }
                self.refresh_known_layers();
            }
            EngineNotification::LayersChanged => {
                self.refresh_known_layers();
                self.sweep_orphans();
            }
            EngineNotification::SourceDataChanged { .. } => {}
        }
    }

    /// Retry removing orphaned sources; any still in use stay orphaned
    fn sweep_orphans(&self) {
        let orphans = self.ledger.lock().orphans();
        for id in orphans {
            let result = {
                let mut engine = self.engine.lock();
                if engine.has_source(&id) {
                    engine.remove_source(&id)
                } else {
                    Ok(())
                }
            };
            match result {
                Ok(()) => {
                    self.ledger.lock().forget_orphan(&id);
                    log::debug!("[{}] removed orphaned source '{}'", self.map_id, id);
                }
                Err(error) => {
                    log::trace!("[{}] orphaned source '{}' kept: {}", self.map_id, id, error);
                }
            }
        }
    }

    fn refresh_known_layers(&self) {
        let layers = self.engine.lock().layers();
        *self.known_layers.write() = layers;
    }

    // Interactions

    /// Route pointer events of `kind` on `layer_id` to `handler`
    pub fn on_interaction<F>(
        &self,
        kind: LayerEventKind,
        layer_id: &str,
        owner: ConsumerId,
        handler: F,
    ) -> SubscriberId
    where
        F: Fn(&InteractionEvent) + Send + Sync + 'static,
    {
        self.interactions
            .lock()
            .subscribe((kind, layer_id.to_string()), owner, handler)
    }

    pub fn off_interaction(&self, id: SubscriberId) -> bool {
        self.interactions.lock().unsubscribe(id)
    }

    pub fn has_interaction(&self, kind: LayerEventKind, layer_id: &str, owner: ConsumerId) -> bool {
        self.interactions
            .lock()
            .is_subscribed(&(kind, layer_id.to_string()), owner)
    }

    /// Deliver a pointer event from the host to the layer's handlers
    pub fn dispatch_interaction(&self, event: &InteractionEvent) -> usize {
        if !self.is_ready() {
            return 0;
        }
        let handlers = self
            .interactions
            .lock()
            .handlers(&(event.kind, event.layer_id.clone()));
        for handler in &handlers {
            handler(event);
        }
        self.process();
        handlers.len()
    }

    // Cleanup

    /// Remove everything `owner` created or registered on this engine
    ///
    /// Layers go before sources so no owned source is still in use when it
    /// is removed. Resources someone else now owns are left alone. A source
    /// the engine refuses to remove (another consumer's layer draws from it)
    /// is kept as an orphan and removed once the layers change.
    pub fn cleanup(&self, owner: ConsumerId) -> CleanupReport {
        let listeners = self.listeners.lock().unsubscribe_owner(owner)
            + self.interactions.lock().unsubscribe_owner(owner);
        let owned = self.ledger.lock().owned_by(owner);

        let mut report = CleanupReport {
            listeners,
            ..Default::default()
        };
        if !self.is_ready() {
            self.ledger.lock().release_owner(owner);
            return report;
        }

        for layer in &owned.layers {
            if self.has_layer(layer) && self.remove_layer(layer).is_ok() {
                report.layers += 1;
            }
        }
        for source in &owned.sources {
            if !self.has_source(source) {
                continue;
            }
            match self.remove_source(source) {
                Ok(()) => report.sources += 1,
                Err(_) => {
                    if self.ledger.lock().orphan_source(source) {
                        report.orphaned += 1;
                    }
                }
            }
        }
        self.ledger.lock().release_owner(owner);

        log::debug!(
            "[{}] cleaned up {}: {} layers, {} sources, {} listeners, {} orphaned",
            self.map_id,
            owner,
            report.layers,
            report.sources,
            report.listeners,
            report.orphaned
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::LayerType;
    use crate::headless::{EngineCall, HeadlessEngine};
    use crate::host::{InlineSource, LayerSource};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn geojson_spec(id: &str) -> LayerSpec {
        let mut spec = LayerSpec::new(id, LayerType::Fill);
        spec.source = Some(LayerSource::Inline(InlineSource::geojson(json!({
            "type": "FeatureCollection",
            "features": []
        }))));
        spec
    }

    #[test]
    fn test_add_records_owner() {
        let engine = HeadlessEngine::new();
        let handle = EngineHandle::new(MapId::new("main"), Box::new(engine));
        let owner = ConsumerId::new();

        handle.add_layer(&geojson_spec("a"), None, owner).unwrap();

        assert_eq!(handle.layer_owner("a"), Some(owner));
        assert_eq!(handle.source_owner("a"), Some(owner));
        assert!(handle.has_layer("a"));
    }

    #[test]
    fn test_rejection_maps_to_error() {
        let engine = HeadlessEngine::new();
        let handle = EngineHandle::new(MapId::new("main"), Box::new(engine));

        let err = handle
            .set_paint_property("missing", "fill-color", &json!("red"))
            .unwrap_err();
        assert_eq!(
            err,
            MapError::EngineRejection {
                op: EngineOp::SetPaintProperty,
                target: "missing".to_string(),
                source: EngineError::LayerNotFound("missing".to_string()),
            }
        );
    }

    #[test]
    fn test_cancelled_handle_refuses_mutations() {
        let engine = HeadlessEngine::new();
        let probe = engine.probe();
        let handle = EngineHandle::new(MapId::new("main"), Box::new(engine));

        handle.cancel();
        let err = handle
            .add_layer(&geojson_spec("a"), None, ConsumerId::new())
            .unwrap_err();
        assert_eq!(err, MapError::Cancelled(MapId::new("main")));
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn test_style_reset_bumps_generation() {
        let engine = HeadlessEngine::new();
        let probe = engine.probe();
        let handle = EngineHandle::new(MapId::new("main"), Box::new(engine));
        let owner = ConsumerId::new();
        handle.add_layer(&geojson_spec("a"), None, owner).unwrap();
        handle.process();

        let resets = Arc::new(AtomicU32::new(0));
        let resets_clone = resets.clone();
        handle.subscribe(Condition::StyleReset, owner, move |_| {
            resets_clone.fetch_add(1, Ordering::SeqCst);
        });

        probe.style_reset();
        handle.process();

        assert_eq!(handle.generation(), Generation::INITIAL.next());
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(handle.layer_owner("a"), None);
        assert!(handle.known_layers().is_empty());
    }

    #[test]
    fn test_listener_reentry_is_queued() {
        let engine = HeadlessEngine::new();
        let handle = Arc::new(EngineHandle::new(MapId::new("main"), Box::new(engine)));
        let owner = ConsumerId::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::downgrade(&handle);
        let order_clone = order.clone();
        handle.subscribe(Condition::StyleReset, owner, move |_| {
            order_clone.lock().push("reset");
            if let Some(handle) = inner.upgrade() {
                handle.notify(EngineNotification::LayersChanged);
            }
            order_clone.lock().push("reset-done");
        });
        let order_clone = order.clone();
        handle.subscribe(Condition::LayersChanged, owner, move |_| {
            order_clone.lock().push("layers");
        });

        handle.notify(EngineNotification::StyleReset);

        assert_eq!(*order.lock(), vec!["reset", "reset-done", "layers"]);
    }

    #[test]
    fn test_cleanup_only_touches_owner() {
        let engine = HeadlessEngine::new();
        let probe = engine.probe();
        let handle = EngineHandle::new(MapId::new("main"), Box::new(engine));
        let a = ConsumerId::new();
        let b = ConsumerId::new();

        handle.add_layer(&geojson_spec("a"), None, a).unwrap();
        handle.add_layer(&geojson_spec("b"), None, b).unwrap();
        handle.subscribe(Condition::LayersChanged, a, |_| {});
        handle.on_interaction(LayerEventKind::Click, "a", a, |_| {});
        probe.clear_calls();

        let report = handle.cleanup(a);

        assert_eq!(
            report,
            CleanupReport {
                layers: 1,
                sources: 1,
                listeners: 2,
                orphaned: 0,
            }
        );
        assert_eq!(
            probe.calls(),
            vec![
                EngineCall::RemoveLayer { id: "a".to_string() },
                EngineCall::RemoveSource { id: "a".to_string() },
            ]
        );
        assert!(handle.has_layer("b"));
        assert_eq!(handle.layer_owner("b"), Some(b));
    }

    #[test]
    fn test_dispatch_interaction() {
        let engine = HeadlessEngine::new();
        let handle = EngineHandle::new(MapId::new("main"), Box::new(engine));
        let owner = ConsumerId::new();
        let clicks = Arc::new(AtomicU32::new(0));
        let clicks_clone = clicks.clone();

        handle.on_interaction(LayerEventKind::Click, "a", owner, move |_| {
            clicks_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(
            handle.dispatch_interaction(&InteractionEvent::new(LayerEventKind::Click, "a")),
            1
        );
        assert_eq!(
            handle.dispatch_interaction(&InteractionEvent::new(LayerEventKind::Hover, "a")),
            0
        );
        assert!(handle.has_interaction(LayerEventKind::Click, "a", owner));
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_source_removed_once_unused() {
        let engine = HeadlessEngine::new();
        let probe = engine.probe();
        let handle = EngineHandle::new(MapId::new("main"), Box::new(engine));
        let a = ConsumerId::new();
        let b = ConsumerId::new();
        handle.add_layer(&geojson_spec("a"), None, a).unwrap();
        let mut borrowed = LayerSpec::new("b", LayerType::Line);
        borrowed.source = Some(LayerSource::Named("a".to_string()));
        handle.add_layer(&borrowed, None, b).unwrap();
        handle.process();

        let report = handle.cleanup(a);

        assert_eq!(report.layers, 1);
        assert_eq!(report.sources, 0);
        assert_eq!(report.orphaned, 1);
        assert!(probe.has_source("a"));
        assert_eq!(handle.source_owner("a"), None);
        assert_eq!(handle.orphaned_sources(), vec!["a".to_string()]);

        handle.process();
        assert!(probe.has_source("a"));

        handle.cleanup(b);
        handle.process();

        assert!(!probe.has_source("a"));
        assert!(handle.orphaned_sources().is_empty());
        assert!(probe.layer_ids().is_empty());
    }
}
