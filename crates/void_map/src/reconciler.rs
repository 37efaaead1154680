//! Layer reconciler
//!
//! A [`LayerReconciler`] owns one layer on a shared map on behalf of one
//! consumer. Each [`LayerReconciler::apply`] hands it the full desired
//! state; it compares that with what it last applied and issues only the
//! engine calls needed to close the gap.
//!
//! Lifecycle:
//!
//! ```text
//! Unbound -> WaitingForDependency -> Created <-> Stale
//!                    ^                  |
//!                    +------------------+        (any) -> Removed
//! ```
//!
//! - Creation waits until the map is bound, the descriptor is complete and
//!   any named source or insert-before layer exists. Waits are driven by
//!   engine notifications, never by polling.
//! - A created layer is stale when the engine has moved to a new
//!   generation or no longer lists it. Stale layers are recreated from the
//!   latest descriptor before anything else is applied.
//! - Changing the layer type or the source binding removes and recreates
//!   the layer. Everything else is updated in place, one call per changed
//!   property.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use void_core::{ConsumerId, Generation};
use void_event::SubscriberId;

use crate::binding::{BindingOptions, MapBinding};
use crate::config::{ReconcilerConfig, ReconcilerOptions};
use crate::descriptor::{
    LayerDescriptor, LayerHandler, LayerOrder, LayerType, PropertyMap, ResolvedSource,
    SourceBinding,
};
use crate::diff::diff_properties;
use crate::error::{MapError, Warning};
use crate::handle::EngineHandle;
use crate::host::{
    Condition, EngineNotification, InlineSource, LayerEventKind, LayerSource, LayerSpec,
};
use crate::registry::EngineRegistry;

/// Observable reconciler state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcilerPhase {
    /// No engine yet
    Unbound,
    /// Bound, but something the layer needs is missing
    WaitingForDependency,
    /// Layer exists on the engine
    Created,
    /// Layer was discarded by the engine and could not be recreated yet
    Stale,
    /// Disposed; nothing further happens
    Removed,
}

/// Why a bound reconciler has no layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deferral {
    /// Nothing applied yet
    AwaitingDescriptor,
    /// Named source not on the map yet
    MissingSource(String),
    /// Insert-before layer not on the map yet
    MissingLayer(String),
    /// No data and no source to draw from
    MissingData,
    /// Descriptor cannot be created as given
    InvalidDescriptor,
    /// Engine refused the layer
    Rejected,
}

/// What was last pushed to the engine
#[derive(Debug)]
struct AppliedLayer {
    layer_type: LayerType,
    source: SourceBinding,
    /// Inline data, for owned sources
    data: Option<Value>,
    paint: PropertyMap,
    layout: PropertyMap,
    filter: Option<Value>,
    zoom: (Option<f64>, Option<f64>),
    /// Insert-before target last applied
    before: Option<String>,
    generation: Generation,
}

enum Phase {
    Unbound,
    Waiting(Deferral),
    Created(AppliedLayer),
    Stale,
    Removed,
}

struct ReconcilerCore {
    this: Weak<Mutex<ReconcilerCore>>,
    layer_id: String,
    consumer: ConsumerId,
    config: ReconcilerConfig,
    handle: Option<Arc<EngineHandle>>,
    phase: Phase,
    desired: Option<LayerDescriptor>,
    /// Notification subscriptions the current phase needs
    waits: Vec<(Condition, SubscriberId)>,
    /// Interaction trampolines; they outlive recreation
    interactions: BTreeMap<LayerEventKind, SubscriberId>,
    warnings: VecDeque<Warning>,
    /// Set while a discarded layer is waiting to come back
    recreating: bool,
    recreations: u64,
}

impl ReconcilerCore {
    fn phase(&self) -> ReconcilerPhase {
        match self.phase {
            Phase::Unbound => ReconcilerPhase::Unbound,
            Phase::Waiting(_) => ReconcilerPhase::WaitingForDependency,
            Phase::Created(_) => ReconcilerPhase::Created,
            Phase::Stale => ReconcilerPhase::Stale,
            Phase::Removed => ReconcilerPhase::Removed,
        }
    }

    fn bind(&mut self, handle: &Arc<EngineHandle>) {
        if matches!(self.phase, Phase::Removed) {
            return;
        }
        log::debug!("[{}] bound to map '{}'", self.layer_id, handle.map_id());
        self.handle = Some(handle.clone());
        self.phase = Phase::Waiting(Deferral::AwaitingDescriptor);
        self.reconcile();
    }

    /// Move the engine towards the desired descriptor
    fn reconcile(&mut self) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        if !handle.is_ready() {
            return;
        }

        match self.phase {
            Phase::Unbound | Phase::Removed => {}
            Phase::Waiting(_) | Phase::Stale => self.try_create(&handle),
            Phase::Created(_) => {
                if self.is_stale(&handle) {
                    self.mark_stale();
                    self.try_create(&handle);
                } else {
                    self.update(&handle);
                }
            }
        }
    }

    fn on_notification(&mut self, notification: &EngineNotification) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        if !handle.is_ready() {
            return;
        }
        log::trace!("[{}] {:?}", self.layer_id, notification);

        match self.phase {
            Phase::Created(_) => {
                if self.is_stale(&handle) {
                    self.mark_stale();
                    self.try_create(&handle);
                } else if notification.condition() == Condition::LayersChanged {
                    self.sync_order(&handle);
                }
            }
            Phase::Waiting(_) => self.try_create(&handle),
            _ => {}
        }
    }

    fn is_stale(&self, handle: &EngineHandle) -> bool {
        match &self.phase {
            Phase::Created(applied) => {
                !applied.generation.is_current(handle.generation())
                    || !handle.has_layer(&self.layer_id)
            }
            _ => false,
        }
    }

    fn mark_stale(&mut self) {
        log::info!("[{}] layer discarded by the engine, recreating", self.layer_id);
        self.phase = Phase::Stale;
        self.recreating = true;
    }

    fn try_create(&mut self, handle: &Arc<EngineHandle>) {
        let Some(desc) = self.desired.clone() else {
            self.defer(handle, Deferral::AwaitingDescriptor);
            return;
        };
        let Some(layer_type) = desc.layer_type else {
            self.invalid(handle, "layer type is undefined".to_string());
            return;
        };

        let source = desc.resolve_source();
        match &source {
            ResolvedSource::Named(name) if name.is_empty() => {
                self.invalid(handle, "source name is empty".to_string());
                return;
            }
            ResolvedSource::Named(name) if !handle.has_source(name) => {
                self.defer(handle, Deferral::MissingSource(name.clone()));
                return;
            }
            ResolvedSource::Missing => {
                self.defer(handle, Deferral::MissingData);
                return;
            }
            _ => {}
        }

        let before = match &desc.order {
            LayerOrder::Append => None,
            LayerOrder::Before(target) if handle.has_layer(target) => Some(target.clone()),
            LayerOrder::Before(target) => {
                self.defer(handle, Deferral::MissingLayer(target.clone()));
                return;
            }
            LayerOrder::BeforeFirstSymbol => handle
                .first_symbol_layer()
                .filter(|id| *id != self.layer_id),
        };

        if !self.clear_leftovers(handle, matches!(source, ResolvedSource::Inline(_))) {
            return;
        }

        let (spec_source, data) = match &source {
            ResolvedSource::Named(name) => (Some(LayerSource::Named(name.clone())), None),
            ResolvedSource::Inline(inline) => (
                Some(LayerSource::Inline(inline.clone())),
                inline.data.clone(),
            ),
            ResolvedSource::None | ResolvedSource::Missing => (None, None),
        };
        let spec = LayerSpec {
            id: self.layer_id.clone(),
            layer_type,
            source: spec_source,
            paint: desc.paint.clone(),
            layout: desc.layout.clone(),
            filter: desc.filter.clone(),
            minzoom: desc.minzoom,
            maxzoom: desc.maxzoom,
        };

        match handle.add_layer(&spec, before.as_deref(), self.consumer) {
            Ok(()) => {
                self.phase = Phase::Created(AppliedLayer {
                    layer_type,
                    source: source.binding().unwrap_or(SourceBinding::None),
                    data,
                    paint: spec.paint,
                    layout: spec.layout,
                    filter: spec.filter,
                    zoom: (spec.minzoom, spec.maxzoom),
                    before: match &desc.order {
                        LayerOrder::Before(target) => Some(target.clone()),
                        _ => None,
                    },
                    generation: handle.generation(),
                });
                if std::mem::take(&mut self.recreating) {
                    self.recreations += 1;
                    log::info!("[{}] recreated ({} so far)", self.layer_id, self.recreations);
                }
                self.sync_waits(handle, &[Condition::LayersChanged, Condition::StyleReset]);
                self.sync_interactions(handle, &desc);
            }
            Err(error) => {
                self.warn(error);
                self.sync_waits(handle, &[]);
                self.phase = if self.recreating {
                    Phase::Stale
                } else {
                    Phase::Waiting(Deferral::Rejected)
                };
            }
        }
    }

    /// Remove our own leftovers under the layer id. Returns false when the
    /// id is taken by someone else or the engine refused the removal.
    fn clear_leftovers(&mut self, handle: &Arc<EngineHandle>, inline: bool) -> bool {
        let id = self.layer_id.clone();

        if handle.has_layer(&id) && handle.layer_owner(&id) != Some(self.consumer) {
            self.invalid(handle, format!("layer id '{}' is already in use", id));
            return false;
        }
        if inline && handle.has_source(&id) && handle.source_owner(&id) != Some(self.consumer) {
            self.invalid(handle, format!("source id '{}' is already in use", id));
            return false;
        }

        if let Err(error) = self.remove_own(handle) {
            self.warn(error);
            self.sync_waits(handle, &[]);
            self.phase = Phase::Waiting(Deferral::Rejected);
            return false;
        }
        true
    }

    /// Remove the layer and inline source we created, if still there
    fn remove_own(&self, handle: &EngineHandle) -> Result<(), MapError> {
        let id = &self.layer_id;
        if handle.has_layer(id) && handle.layer_owner(id) == Some(self.consumer) {
            handle.remove_layer(id)?;
        }
        if handle.has_source(id) && handle.source_owner(id) == Some(self.consumer) {
            handle.remove_source(id)?;
        }
        Ok(())
    }

    fn update(&mut self, handle: &Arc<EngineHandle>) {
        let Some(desc) = self.desired.clone() else {
            return;
        };
        let Some(layer_type) = desc.layer_type else {
            self.warn(MapError::InvalidDescriptor("layer type is undefined".to_string()));
            return;
        };
        let source = desc.resolve_source();

        let rebind = match (&self.phase, source.binding()) {
            (Phase::Created(applied), Some(binding)) => {
                applied.layer_type != layer_type || applied.source != binding
            }
            (Phase::Created(applied), None) => applied.layer_type != layer_type,
            _ => return,
        };
        if rebind {
            log::debug!("[{}] type or source changed, recreating", self.layer_id);
            if let Err(error) = self.remove_own(handle) {
                self.warn(error);
                return;
            }
            self.phase = Phase::Waiting(Deferral::AwaitingDescriptor);
            self.try_create(handle);
            return;
        }

        let Phase::Created(mut applied) = std::mem::replace(&mut self.phase, Phase::Stale) else {
            return;
        };
        let id = self.layer_id.clone();
        let reset_removed = self.config.reset_removed_properties;

        for change in diff_properties(&applied.paint, &desc.paint, reset_removed) {
            match handle.set_paint_property(&id, change.key(), change.value()) {
                Ok(()) => change.apply_to(&mut applied.paint),
                Err(error) => self.warn(error),
            }
        }
        for change in diff_properties(&applied.layout, &desc.layout, reset_removed) {
            match handle.set_layout_property(&id, change.key(), change.value()) {
                Ok(()) => change.apply_to(&mut applied.layout),
                Err(error) => self.warn(error),
            }
        }

        if applied.filter != desc.filter {
            match handle.set_filter(&id, desc.filter.as_ref()) {
                Ok(()) => applied.filter = desc.filter.clone(),
                Err(error) => self.warn(error),
            }
        }

        let zoom = (desc.minzoom, desc.maxzoom);
        if applied.zoom != zoom {
            match handle.set_zoom_range(&id, zoom.0, zoom.1) {
                Ok(()) => applied.zoom = zoom,
                Err(error) => self.warn(error),
            }
        }

        if let ResolvedSource::Inline(InlineSource { data: Some(data), .. }) = &source {
            if applied.data.as_ref() != Some(data) {
                match handle.set_source_data(&id, data) {
                    Ok(()) => applied.data = Some(data.clone()),
                    Err(error) => self.warn(error),
                }
            }
        }

        self.phase = Phase::Created(applied);
        self.sync_order(handle);
        self.sync_interactions(handle, &desc);
    }

    /// Apply an insert-before change once the target exists
    fn sync_order(&mut self, handle: &Arc<EngineHandle>) {
        let Some(LayerOrder::Before(target)) = self.desired.as_ref().map(|d| d.order.clone()) else {
            return;
        };
        let Phase::Created(applied) = &self.phase else {
            return;
        };
        if applied.before.as_deref() == Some(target.as_str()) || !handle.has_layer(&target) {
            return;
        }

        let result = handle.move_layer(&self.layer_id, &target);
        if let Phase::Created(applied) = &mut self.phase {
            applied.before = Some(target);
        }
        if let Err(error) = result {
            self.warn(error);
        }
    }

    fn defer(&mut self, handle: &Arc<EngineHandle>, deferral: Deferral) {
        let conditions: &[Condition] = match &deferral {
            Deferral::MissingSource(_) => &[Condition::SourceData],
            Deferral::MissingLayer(_) => &[Condition::LayersChanged],
            _ => &[],
        };
        log::debug!("[{}] waiting: {:?}", self.layer_id, deferral);
        self.sync_waits(handle, conditions);
        self.phase = Phase::Waiting(deferral);
    }

    /// Record a descriptor problem; no retry until the next apply
    fn invalid(&mut self, handle: &Arc<EngineHandle>, message: String) {
        self.warn(MapError::InvalidDescriptor(message));
        self.sync_waits(handle, &[]);
        self.phase = Phase::Waiting(Deferral::InvalidDescriptor);
    }

    /// Hold exactly one subscription per wanted condition
    fn sync_waits(&mut self, handle: &Arc<EngineHandle>, wanted: &[Condition]) {
        let (keep, stale): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waits)
            .into_iter()
            .partition(|(condition, _)| wanted.contains(condition));
        for (_, id) in stale {
            handle.unsubscribe(id);
        }
        self.waits = keep;

        for condition in wanted {
            if self.waits.iter().any(|(c, _)| c == condition) {
                continue;
            }
            let core = self.this.clone();
            let id = handle.subscribe(*condition, self.consumer, move |notification| {
                if let Some(core) = core.upgrade() {
                    core.lock().on_notification(notification);
                }
            });
            self.waits.push((*condition, id));
        }
    }

    /// Register one trampoline per event kind the descriptor handles
    fn sync_interactions(&mut self, handle: &Arc<EngineHandle>, desc: &LayerDescriptor) {
        for kind in desc.handlers.kinds() {
            if self.interactions.contains_key(&kind) {
                continue;
            }
            let core = self.this.clone();
            let id = handle.on_interaction(kind, &self.layer_id, self.consumer, move |event| {
                let Some(core) = core.upgrade() else {
                    return;
                };
                let handler = core.lock().current_handler(kind);
                if let Some(handler) = handler {
                    handler(event);
                }
            });
            self.interactions.insert(kind, id);
        }
    }

    fn current_handler(&self, kind: LayerEventKind) -> Option<LayerHandler> {
        if !matches!(self.phase, Phase::Created(_)) {
            return None;
        }
        self.desired.as_ref()?.handlers.get(kind).cloned()
    }

    fn warn(&mut self, error: MapError) {
        if error.is_rejection() {
            log::debug!("[{}] {}", self.layer_id, error);
        } else {
            log::warn!("[{}] {}", self.layer_id, error);
        }
        while self.warnings.len() >= self.config.max_warnings.max(1) {
            self.warnings.pop_front();
        }
        self.warnings.push_back(Warning {
            layer_id: self.layer_id.clone(),
            error,
        });
    }

    fn dispose(&mut self) -> Option<Arc<EngineHandle>> {
        if matches!(self.phase, Phase::Removed) {
            return None;
        }
        let handle = self.handle.take();
        if let Some(handle) = &handle {
            self.sync_waits(handle, &[]);
            for (_, id) in std::mem::take(&mut self.interactions) {
                handle.off_interaction(id);
            }
            if handle.is_ready() {
                if let Err(error) = self.remove_own(handle) {
                    self.warn(error);
                }
            }
        }
        self.phase = Phase::Removed;
        self.desired = None;
        log::debug!("[{}] disposed", self.layer_id);
        handle
    }
}

/// Keeps one consumer's layer in line with its latest descriptor
pub struct LayerReconciler {
    layer_id: String,
    consumer: ConsumerId,
    core: Arc<Mutex<ReconcilerCore>>,
    binding: MapBinding,
}

impl LayerReconciler {
    /// Reconcile through an existing binding
    pub fn new(binding: MapBinding, options: ReconcilerOptions) -> Self {
        let consumer = binding.consumer();
        let layer_id = options.resolve_layer_id(consumer);

        let core = Arc::new_cyclic(|this| {
            Mutex::new(ReconcilerCore {
                this: this.clone(),
                layer_id: layer_id.clone(),
                consumer,
                config: options.config,
                handle: None,
                phase: Phase::Unbound,
                desired: None,
                waits: Vec::new(),
                interactions: BTreeMap::new(),
                warnings: VecDeque::new(),
                recreating: false,
                recreations: 0,
            })
        });

        let weak = Arc::downgrade(&core);
        binding.on_resolved(move |handle| {
            if let Some(core) = weak.upgrade() {
                core.lock().bind(handle);
            }
        });

        Self {
            layer_id,
            consumer,
            core,
            binding,
        }
    }

    /// Bind a fresh consumer and reconcile through it
    pub fn attach(
        registry: &Arc<EngineRegistry>,
        binding: BindingOptions,
        options: ReconcilerOptions,
    ) -> Self {
        Self::new(MapBinding::new(registry, binding), options)
    }

    /// Make the layer match `descriptor`
    ///
    /// Before the map is bound this only records the descriptor. Problems
    /// are collected as warnings rather than returned.
    pub fn apply(&self, descriptor: LayerDescriptor) {
        let handle = {
            let mut core = self.core.lock();
            if matches!(core.phase, Phase::Removed) {
                return;
            }
            core.desired = Some(descriptor);
            core.reconcile();
            core.handle.clone()
        };
        if let Some(handle) = handle {
            handle.process();
        }
    }

    /// Remove the layer and everything registered for it, then release the
    /// binding. Safe to call more than once.
    pub fn dispose(&self) {
        let handle = self.core.lock().dispose();
        self.binding.teardown();
        if let Some(handle) = handle {
            handle.process();
        }
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub fn phase(&self) -> ReconcilerPhase {
        self.core.lock().phase()
    }

    /// What the reconciler is waiting on, while it waits
    pub fn deferral(&self) -> Option<Deferral> {
        match &self.core.lock().phase {
            Phase::Waiting(deferral) => Some(deferral.clone()),
            _ => None,
        }
    }

    /// Engine generation the current layer was created in
    pub fn generation(&self) -> Option<Generation> {
        match &self.core.lock().phase {
            Phase::Created(applied) => Some(applied.generation),
            _ => None,
        }
    }

    /// Times the layer was recreated after the engine discarded it
    pub fn recreations(&self) -> u64 {
        self.core.lock().recreations
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.core.lock().warnings.iter().cloned().collect()
    }

    pub fn take_warnings(&self) -> Vec<Warning> {
        self.core.lock().warnings.drain(..).collect()
    }

    pub fn binding(&self) -> &MapBinding {
        &self.binding
    }

    pub fn handle(&self) -> Option<Arc<EngineHandle>> {
        self.core.lock().handle.clone()
    }
}

impl Drop for LayerReconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessEngine;
    use serde_json::json;

    #[test]
    fn test_unbound_until_registered() {
        let registry = Arc::new(EngineRegistry::new());
        let reconciler = LayerReconciler::attach(
            &registry,
            BindingOptions::new(),
            ReconcilerOptions::new(),
        );
        reconciler.apply(
            LayerDescriptor::new(LayerType::Fill).with_geojson(json!({"features": []})),
        );
        assert_eq!(reconciler.phase(), ReconcilerPhase::Unbound);

        let engine = HeadlessEngine::new();
        let probe = engine.probe();
        registry.register("main", engine);

        assert_eq!(reconciler.phase(), ReconcilerPhase::Created);
        assert_eq!(probe.layer_ids(), vec![reconciler.layer_id().to_string()]);
    }

    #[test]
    fn test_generated_layer_id() {
        let registry = Arc::new(EngineRegistry::new());
        let reconciler = LayerReconciler::attach(
            &registry,
            BindingOptions::new(),
            ReconcilerOptions::new(),
        );

        assert_eq!(
            reconciler.layer_id(),
            format!("Layer-{}", reconciler.consumer().raw())
        );
    }

    #[test]
    fn test_disposed_ignores_apply() {
        let registry = Arc::new(EngineRegistry::new());
        let engine = HeadlessEngine::new();
        let probe = engine.probe();
        registry.register("main", engine);

        let reconciler = LayerReconciler::attach(
            &registry,
            BindingOptions::new(),
            ReconcilerOptions::new(),
        );
        reconciler.dispose();
        reconciler.apply(
            LayerDescriptor::new(LayerType::Fill).with_geojson(json!({"features": []})),
        );

        assert_eq!(reconciler.phase(), ReconcilerPhase::Removed);
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn test_warning_cap() {
        let registry = Arc::new(EngineRegistry::new());
        registry.register("main", HeadlessEngine::new());
        let config = ReconcilerConfig {
            max_warnings: 2,
            ..Default::default()
        };
        let reconciler = LayerReconciler::attach(
            &registry,
            BindingOptions::new(),
            ReconcilerOptions::new().with_config(config),
        );

        for _ in 0..5 {
            reconciler.apply(LayerDescriptor::default());
        }

        assert_eq!(reconciler.warnings().len(), 2);
        assert_eq!(reconciler.take_warnings().len(), 2);
        assert!(reconciler.warnings().is_empty());
    }
}
