//! Host engine boundary
//!
//! The map engine is owned by the host application. This crate only ever
//! talks to it through [`HostEngine`]: a small set of queries, one call per
//! style mutation, and a queue of change notifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use void_core::ConsumerId;

use crate::descriptor::{LayerType, PropertyMap};
use crate::error::EngineError;

/// Layer as listed by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
}

impl LayerInfo {
    pub fn new(id: impl Into<String>, layer_type: LayerType) -> Self {
        Self {
            id: id.into(),
            layer_type,
        }
    }
}

/// Source created together with a layer and keyed by the layer's id
///
/// Source options the host understands beyond `type`, `data` and
/// `attribution` (`cluster`, `tiles`, `promoteId`, ...) travel in `options`
/// and serialize alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineSource {
    #[serde(rename = "type")]
    pub kind: String,
    /// Absent for sources that load from `url` or `tiles`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl InlineSource {
    pub const GEOJSON: &'static str = "geojson";

    pub fn geojson(data: Value) -> Self {
        Self {
            kind: Self::GEOJSON.to_string(),
            data: Some(data),
            attribution: None,
            options: Map::new(),
        }
    }

    pub fn is_geojson(&self) -> bool {
        self.kind == Self::GEOJSON
    }
}

/// Source reference inside a [`LayerSpec`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerSource {
    Named(String),
    Inline(InlineSource),
}

/// Full layer definition passed to [`HostEngine::add_layer`]
///
/// Serializes to the usual style-document layer shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<LayerSource>,
    #[serde(default, skip_serializing_if = "PropertyMap::is_empty")]
    pub paint: PropertyMap,
    #[serde(default, skip_serializing_if = "PropertyMap::is_empty")]
    pub layout: PropertyMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<f64>,
}

impl LayerSpec {
    pub fn new(id: impl Into<String>, layer_type: LayerType) -> Self {
        Self {
            id: id.into(),
            layer_type,
            source: None,
            paint: PropertyMap::new(),
            layout: PropertyMap::new(),
            filter: None,
            minzoom: None,
            maxzoom: None,
        }
    }

    /// Inline source the layer brings with it
    pub fn inline_source(&self) -> Option<&InlineSource> {
        match &self.source {
            Some(LayerSource::Inline(source)) => Some(source),
            _ => None,
        }
    }

    /// Id of the source the layer draws from
    pub fn source_id(&self) -> Option<&str> {
        match &self.source {
            Some(LayerSource::Named(name)) => Some(name),
            Some(LayerSource::Inline(_)) => Some(&self.id),
            None => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Change notification raised by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineNotification {
    /// Layers were added, removed or reordered
    LayersChanged,
    /// A source was added or its data changed
    SourceDataChanged { source_id: String },
    /// The whole style was replaced; every layer and source is gone
    StyleReset,
}

impl EngineNotification {
    pub fn condition(&self) -> Condition {
        match self {
            EngineNotification::LayersChanged => Condition::LayersChanged,
            EngineNotification::SourceDataChanged { .. } => Condition::SourceData,
            EngineNotification::StyleReset => Condition::StyleReset,
        }
    }
}

/// Notification class a listener can wait on
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Condition {
    LayersChanged,
    SourceData,
    StyleReset,
}

/// Pointer interaction on a layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerEventKind {
    Hover,
    Click,
    Leave,
}

impl LayerEventKind {
    pub const ALL: [LayerEventKind; 3] = [
        LayerEventKind::Hover,
        LayerEventKind::Click,
        LayerEventKind::Leave,
    ];

    /// Pointer event name the host fires for this kind
    pub fn host_event_name(&self) -> &'static str {
        match self {
            LayerEventKind::Hover => "mousemove",
            LayerEventKind::Click => "click",
            LayerEventKind::Leave => "mouseleave",
        }
    }
}

/// Pointer event delivered to layer handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub kind: LayerEventKind,
    pub layer_id: String,
    /// Features under the pointer, as GeoJSON
    #[serde(default)]
    pub features: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng_lat: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<[f64; 2]>,
}

impl InteractionEvent {
    pub fn new(kind: LayerEventKind, layer_id: impl Into<String>) -> Self {
        Self {
            kind,
            layer_id: layer_id.into(),
            features: Vec::new(),
            lng_lat: None,
            point: None,
        }
    }

    pub fn with_features(mut self, features: Vec<Value>) -> Self {
        self.features = features;
        self
    }

    pub fn at(mut self, lng_lat: [f64; 2], point: [f64; 2]) -> Self {
        self.lng_lat = Some(lng_lat);
        self.point = Some(point);
        self
    }
}

/// Map engine owned by the host application
///
/// Every mutation is a single call that either succeeds or reports an
/// [`EngineError`]. Implementations queue notifications for changes they
/// make and hand them out from [`HostEngine::poll_notifications`]; hosts
/// that learn about changes elsewhere can push them through
/// `EngineHandle::notify` instead.
pub trait HostEngine: Send {
    fn has_layer(&self, id: &str) -> bool;

    fn has_source(&self, id: &str) -> bool;

    /// Layers in draw order, bottom first
    fn layers(&self) -> Vec<LayerInfo>;

    /// Add a layer, and its inline source if it has one
    ///
    /// `owner` tags the new layer with the consumer that created it.
    fn add_layer(
        &mut self,
        spec: &LayerSpec,
        before: Option<&str>,
        owner: ConsumerId,
    ) -> Result<(), EngineError>;

    fn remove_layer(&mut self, id: &str) -> Result<(), EngineError>;

    fn remove_source(&mut self, id: &str) -> Result<(), EngineError>;

    fn set_source_data(&mut self, id: &str, data: &Value) -> Result<(), EngineError>;

    /// Set one paint property; `Value::Null` resets it to the style default
    fn set_paint_property(&mut self, id: &str, key: &str, value: &Value)
        -> Result<(), EngineError>;

    /// Set one layout property; `Value::Null` resets it to the style default
    fn set_layout_property(
        &mut self,
        id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), EngineError>;

    fn set_filter(&mut self, id: &str, filter: Option<&Value>) -> Result<(), EngineError>;

    fn set_zoom_range(
        &mut self,
        id: &str,
        minzoom: Option<f64>,
        maxzoom: Option<f64>,
    ) -> Result<(), EngineError>;

    /// Move a layer directly below `before`
    fn move_layer(&mut self, id: &str, before: &str) -> Result<(), EngineError>;

    /// Take notifications raised since the last poll
    fn poll_notifications(&mut self) -> Vec<EngineNotification> {
        Vec::new()
    }

    /// First symbol layer in draw order
    fn first_symbol_layer(&self) -> Option<String> {
        self.layers()
            .into_iter()
            .find(|layer| layer.layer_type == LayerType::Symbol)
            .map(|layer| layer.id)
    }
}
