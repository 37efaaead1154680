//! Headless map engine
//!
//! An in-memory [`HostEngine`] for tests and tooling. It keeps an ordered
//! layer list and a source table, records every call made to it, and can
//! simulate what a host does on its own: adding style layers and sources,
//! resetting the style, and refusing a call.
//!
//! The engine moves into the registry; a [`HeadlessProbe`] taken beforehand
//! keeps access to the same state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use void_core::ConsumerId;

use crate::descriptor::{LayerType, PropertyMap};
use crate::error::{EngineError, EngineOp};
use crate::host::{
    EngineNotification, HostEngine, InlineSource, LayerInfo, LayerSource, LayerSpec,
};

/// A call received by the headless engine, successful or not
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    AddLayer {
        id: String,
        layer_type: LayerType,
        source: Option<String>,
        before: Option<String>,
        owner: ConsumerId,
    },
    RemoveLayer {
        id: String,
    },
    RemoveSource {
        id: String,
    },
    SetSourceData {
        id: String,
    },
    SetPaintProperty {
        id: String,
        key: String,
        value: Value,
    },
    SetLayoutProperty {
        id: String,
        key: String,
        value: Value,
    },
    SetFilter {
        id: String,
        filter: Option<Value>,
    },
    SetZoomRange {
        id: String,
        minzoom: Option<f64>,
        maxzoom: Option<f64>,
    },
    MoveLayer {
        id: String,
        before: String,
    },
}

impl EngineCall {
    pub fn op(&self) -> EngineOp {
        match self {
            EngineCall::AddLayer { .. } => EngineOp::AddLayer,
            EngineCall::RemoveLayer { .. } => EngineOp::RemoveLayer,
            EngineCall::RemoveSource { .. } => EngineOp::RemoveSource,
            EngineCall::SetSourceData { .. } => EngineOp::SetSourceData,
            EngineCall::SetPaintProperty { .. } => EngineOp::SetPaintProperty,
            EngineCall::SetLayoutProperty { .. } => EngineOp::SetLayoutProperty,
            EngineCall::SetFilter { .. } => EngineOp::SetFilter,
            EngineCall::SetZoomRange { .. } => EngineOp::SetZoomRange,
            EngineCall::MoveLayer { .. } => EngineOp::MoveLayer,
        }
    }
}

#[derive(Debug, Clone)]
struct HeadlessLayer {
    spec: LayerSpec,
    /// None for layers that came with the host's style
    owner: Option<ConsumerId>,
}

#[derive(Debug, Clone)]
struct HeadlessSource {
    kind: String,
    data: Option<Value>,
    attribution: Option<String>,
    options: Map<String, Value>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    /// Draw order, bottom first
    layers: Vec<HeadlessLayer>,
    sources: BTreeMap<String, HeadlessSource>,
    calls: Vec<EngineCall>,
    notifications: Vec<EngineNotification>,
    /// Ops to refuse the next time they are called
    reject: Vec<EngineOp>,
}

impl HeadlessState {
    fn position(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.spec.id == id)
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut HeadlessLayer, EngineError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.spec.id == id)
            .ok_or_else(|| EngineError::LayerNotFound(id.to_string()))
    }

    /// Record the call and consume a pending rejection for its op
    fn begin(&mut self, call: EngineCall) -> Result<(), EngineError> {
        let op = call.op();
        self.calls.push(call);
        match self.reject.iter().position(|r| *r == op) {
            Some(index) => {
                self.reject.remove(index);
                Err(EngineError::Rejected(format!("{op} refused")))
            }
            None => Ok(()),
        }
    }

    fn emit(&mut self, notification: EngineNotification) {
        self.notifications.push(notification);
    }
}

/// In-memory map engine
#[derive(Default)]
pub struct HeadlessEngine {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto this engine's state that stays usable after the engine
    /// has been handed to a registry
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: self.state.clone(),
        }
    }
}

impl HostEngine for HeadlessEngine {
    fn has_layer(&self, id: &str) -> bool {
        self.state.lock().position(id).is_some()
    }

    fn has_source(&self, id: &str) -> bool {
        self.state.lock().sources.contains_key(id)
    }

    fn layers(&self) -> Vec<LayerInfo> {
        self.state
            .lock()
            .layers
            .iter()
            .map(|layer| LayerInfo::new(layer.spec.id.clone(), layer.spec.layer_type))
            .collect()
    }

    fn add_layer(
        &mut self,
        spec: &LayerSpec,
        before: Option<&str>,
        owner: ConsumerId,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::AddLayer {
            id: spec.id.clone(),
            layer_type: spec.layer_type,
            source: spec.source_id().map(str::to_string),
            before: before.map(str::to_string),
            owner,
        })?;

        if state.position(&spec.id).is_some() {
            return Err(EngineError::LayerExists(spec.id.clone()));
        }
        let index = match before {
            Some(before) => state
                .position(before)
                .ok_or_else(|| EngineError::LayerNotFound(before.to_string()))?,
            None => state.layers.len(),
        };
        match &spec.source {
            Some(LayerSource::Named(name)) if !state.sources.contains_key(name) => {
                return Err(EngineError::SourceNotFound(name.clone()));
            }
            Some(LayerSource::Inline(_)) if state.sources.contains_key(&spec.id) => {
                return Err(EngineError::SourceExists(spec.id.clone()));
            }
            None if spec.layer_type.requires_source() => {
                return Err(EngineError::InvalidSpec(format!(
                    "{} layer '{}' needs a source",
                    spec.layer_type, spec.id
                )));
            }
            _ => {}
        }

        if let Some(inline) = spec.inline_source() {
            state.sources.insert(
                spec.id.clone(),
                HeadlessSource {
                    kind: inline.kind.clone(),
                    data: inline.data.clone(),
                    attribution: inline.attribution.clone(),
                    options: inline.options.clone(),
                },
            );
            state.emit(EngineNotification::SourceDataChanged {
                source_id: spec.id.clone(),
            });
        }
        state.layers.insert(
            index,
            HeadlessLayer {
                spec: spec.clone(),
                owner: Some(owner),
            },
        );
        state.emit(EngineNotification::LayersChanged);
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::RemoveLayer { id: id.to_string() })?;

        let index = state
            .position(id)
            .ok_or_else(|| EngineError::LayerNotFound(id.to_string()))?;
        state.layers.remove(index);
        state.emit(EngineNotification::LayersChanged);
        Ok(())
    }

    fn remove_source(&mut self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::RemoveSource { id: id.to_string() })?;

        if !state.sources.contains_key(id) {
            return Err(EngineError::SourceNotFound(id.to_string()));
        }
        if let Some(user) = state
            .layers
            .iter()
            .find(|layer| layer.spec.source_id() == Some(id))
        {
            return Err(EngineError::Rejected(format!(
                "source '{}' is still used by layer '{}'",
                id, user.spec.id
            )));
        }
        state.sources.remove(id);
        Ok(())
    }

    fn set_source_data(&mut self, id: &str, data: &Value) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::SetSourceData { id: id.to_string() })?;

        let source = state
            .sources
            .get_mut(id)
            .ok_or_else(|| EngineError::SourceNotFound(id.to_string()))?;
        source.data = Some(data.clone());
        state.emit(EngineNotification::SourceDataChanged {
            source_id: id.to_string(),
        });
        Ok(())
    }

    fn set_paint_property(
        &mut self,
        id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::SetPaintProperty {
            id: id.to_string(),
            key: key.to_string(),
            value: value.clone(),
        })?;

        let layer = state.layer_mut(id)?;
        set_property(&mut layer.spec.paint, key, value);
        Ok(())
    }

    fn set_layout_property(
        &mut self,
        id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::SetLayoutProperty {
            id: id.to_string(),
            key: key.to_string(),
            value: value.clone(),
        })?;

        let layer = state.layer_mut(id)?;
        set_property(&mut layer.spec.layout, key, value);
        Ok(())
    }

    fn set_filter(&mut self, id: &str, filter: Option<&Value>) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::SetFilter {
            id: id.to_string(),
            filter: filter.cloned(),
        })?;

        state.layer_mut(id)?.spec.filter = filter.cloned();
        Ok(())
    }

    fn set_zoom_range(
        &mut self,
        id: &str,
        minzoom: Option<f64>,
        maxzoom: Option<f64>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::SetZoomRange {
            id: id.to_string(),
            minzoom,
            maxzoom,
        })?;

        let layer = state.layer_mut(id)?;
        layer.spec.minzoom = minzoom;
        layer.spec.maxzoom = maxzoom;
        Ok(())
    }

    fn move_layer(&mut self, id: &str, before: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.begin(EngineCall::MoveLayer {
            id: id.to_string(),
            before: before.to_string(),
        })?;

        let from = state
            .position(id)
            .ok_or_else(|| EngineError::LayerNotFound(id.to_string()))?;
        if state.position(before).is_none() {
            return Err(EngineError::LayerNotFound(before.to_string()));
        }
        let layer = state.layers.remove(from);
        let to = state.position(before).unwrap_or(state.layers.len());
        state.layers.insert(to, layer);
        state.emit(EngineNotification::LayersChanged);
        Ok(())
    }

    fn poll_notifications(&mut self) -> Vec<EngineNotification> {
        std::mem::take(&mut self.state.lock().notifications)
    }
}

fn set_property(properties: &mut PropertyMap, key: &str, value: &Value) {
    if value.is_null() {
        properties.remove(key);
    } else {
        properties.insert(key.to_string(), value.clone());
    }
}

/// Inspection and simulation access to a [`HeadlessEngine`]
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessProbe {
    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of recorded calls of one op
    pub fn count(&self, op: EngineOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Layer ids in draw order, bottom first
    pub fn layer_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .layers
            .iter()
            .map(|layer| layer.spec.id.clone())
            .collect()
    }

    pub fn layer(&self, id: &str) -> Option<LayerSpec> {
        let state = self.state.lock();
        state.position(id).map(|index| state.layers[index].spec.clone())
    }

    pub fn layer_owner(&self, id: &str) -> Option<ConsumerId> {
        let state = self.state.lock();
        state.position(id).and_then(|index| state.layers[index].owner)
    }

    pub fn has_source(&self, id: &str) -> bool {
        self.state.lock().sources.contains_key(id)
    }

    pub fn source_data(&self, id: &str) -> Option<Value> {
        self.state
            .lock()
            .sources
            .get(id)
            .and_then(|source| source.data.clone())
    }

    pub fn source_kind(&self, id: &str) -> Option<String> {
        self.state.lock().sources.get(id).map(|source| source.kind.clone())
    }

    /// One of the extra options a source was added with
    pub fn source_option(&self, id: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .sources
            .get(id)
            .and_then(|source| source.options.get(key).cloned())
    }

    pub fn source_attribution(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .sources
            .get(id)
            .and_then(|source| source.attribution.clone())
    }

    /// Add a layer as part of the host's own style
    pub fn add_host_layer(&self, id: &str, layer_type: LayerType) {
        let mut state = self.state.lock();
        let mut spec = LayerSpec::new(id, layer_type);
        if layer_type.requires_source() {
            spec.source = Some(LayerSource::Named("host".to_string()));
        }
        state.layers.push(HeadlessLayer { spec, owner: None });
        state.emit(EngineNotification::LayersChanged);
    }

    pub fn remove_host_layer(&self, id: &str) {
        let mut state = self.state.lock();
        if let Some(index) = state.position(id) {
            state.layers.remove(index);
            state.emit(EngineNotification::LayersChanged);
        }
    }

    /// Add a source as part of the host's own style
    pub fn add_host_source(&self, id: &str, data: Value) {
        let mut state = self.state.lock();
        state.sources.insert(
            id.to_string(),
            HeadlessSource {
                kind: InlineSource::GEOJSON.to_string(),
                data: Some(data),
                attribution: None,
                options: Map::new(),
            },
        );
        state.emit(EngineNotification::SourceDataChanged {
            source_id: id.to_string(),
        });
    }

    /// Replace the style: every layer and source is discarded
    pub fn style_reset(&self) {
        let mut state = self.state.lock();
        state.layers.clear();
        state.sources.clear();
        state.emit(EngineNotification::StyleReset);
    }

    /// Refuse the next call of `op`
    pub fn reject_next(&self, op: EngineOp) {
        self.state.lock().reject.push(op);
    }

    pub fn pending_notifications(&self) -> usize {
        self.state.lock().notifications.len()
    }
}
