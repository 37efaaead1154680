//! Layer descriptors - the desired state a consumer declares
//!
//! A [`LayerDescriptor`] is a plain value. Consumers build a new one whenever
//! their inputs change and hand it to a reconciler, which works out the
//! engine calls needed to get from what was applied to what is wanted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MapError;
use crate::host::{InlineSource, InteractionEvent, LayerEventKind};

/// Style properties keyed by property name
pub type PropertyMap = BTreeMap<String, Value>;

/// Kind of layer understood by the host engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerType {
    Fill,
    Line,
    Symbol,
    Circle,
    Heatmap,
    FillExtrusion,
    Raster,
    Hillshade,
    Background,
}

impl LayerType {
    pub const ALL: [LayerType; 9] = [
        LayerType::Fill,
        LayerType::Line,
        LayerType::Symbol,
        LayerType::Circle,
        LayerType::Heatmap,
        LayerType::FillExtrusion,
        LayerType::Raster,
        LayerType::Hillshade,
        LayerType::Background,
    ];

    /// Style name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Fill => "fill",
            LayerType::Line => "line",
            LayerType::Symbol => "symbol",
            LayerType::Circle => "circle",
            LayerType::Heatmap => "heatmap",
            LayerType::FillExtrusion => "fill-extrusion",
            LayerType::Raster => "raster",
            LayerType::Hillshade => "hillshade",
            LayerType::Background => "background",
        }
    }

    /// Background layers draw without a source
    pub fn requires_source(&self) -> bool {
        !matches!(self, LayerType::Background)
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MapError::InvalidDescriptor(format!("unknown layer type: {s}")))
    }
}

/// Partially specified source object
///
/// Without a `type` this only decorates the descriptor's `geojson`. With one
/// it is a complete source definition and is handed to the host as given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceObject {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    /// Any other source option, passed through untouched
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl SourceObject {
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Where a layer's features come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceOption {
    /// A source already present on the host
    Named(String),
    /// Source settings, optionally carrying the data itself
    Object(SourceObject),
}

/// Position of a new layer in the host's draw order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LayerOrder {
    /// On top of everything
    #[default]
    Append,
    /// Directly below the named layer, which must exist first
    Before(String),
    /// Below the host's first symbol layer, or on top if there is none
    BeforeFirstSymbol,
}

/// Interaction callback
pub type LayerHandler = Arc<dyn Fn(&InteractionEvent) + Send + Sync>;

/// Optional interaction callbacks for a layer
#[derive(Clone, Default)]
pub struct LayerHandlers {
    pub on_hover: Option<LayerHandler>,
    pub on_click: Option<LayerHandler>,
    pub on_leave: Option<LayerHandler>,
}

impl LayerHandlers {
    pub fn get(&self, kind: LayerEventKind) -> Option<&LayerHandler> {
        match kind {
            LayerEventKind::Hover => self.on_hover.as_ref(),
            LayerEventKind::Click => self.on_click.as_ref(),
            LayerEventKind::Leave => self.on_leave.as_ref(),
        }
    }

    /// Kinds that have a callback set
    pub fn kinds(&self) -> Vec<LayerEventKind> {
        LayerEventKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }
}

impl fmt::Debug for LayerHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerHandlers")
            .field("on_hover", &self.on_hover.is_some())
            .field("on_click", &self.on_click.is_some())
            .field("on_leave", &self.on_leave.is_some())
            .finish()
    }
}

/// Source a descriptor resolves to at creation time
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResolvedSource {
    /// Reference to a host source
    Named(String),
    /// Inline source owned by the layer, keyed by the layer id
    Inline(InlineSource),
    /// Sourceless layer
    None,
    /// Nothing to draw from yet
    Missing,
}

impl ResolvedSource {
    pub(crate) fn binding(&self) -> Option<SourceBinding> {
        match self {
            ResolvedSource::Named(name) => Some(SourceBinding::Named(name.clone())),
            ResolvedSource::Inline(_) => Some(SourceBinding::Owned),
            ResolvedSource::None => Some(SourceBinding::None),
            ResolvedSource::Missing => None,
        }
    }
}

/// How a created layer is tied to its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SourceBinding {
    Named(String),
    Owned,
    None,
}

/// Desired state of one layer
#[derive(Clone, Debug, Default)]
pub struct LayerDescriptor {
    /// Required before anything is created
    pub layer_type: Option<LayerType>,
    pub paint: PropertyMap,
    pub layout: PropertyMap,
    /// Inline data, used when no source object carries its own
    pub geojson: Option<Value>,
    pub source: Option<SourceOption>,
    pub filter: Option<Value>,
    pub minzoom: Option<f64>,
    pub maxzoom: Option<f64>,
    pub order: LayerOrder,
    pub handlers: LayerHandlers,
}

impl LayerDescriptor {
    /// Descriptor for a layer of the given type
    pub fn new(layer_type: LayerType) -> Self {
        Self {
            layer_type: Some(layer_type),
            ..Default::default()
        }
    }

    pub fn with_paint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.paint.insert(key.into(), value.into());
        self
    }

    pub fn with_paint_map(mut self, paint: PropertyMap) -> Self {
        self.paint = paint;
        self
    }

    pub fn with_layout(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.layout.insert(key.into(), value.into());
        self
    }

    pub fn with_layout_map(mut self, layout: PropertyMap) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_geojson(mut self, data: Value) -> Self {
        self.geojson = Some(data);
        self
    }

    /// Draw from a source the host already has
    pub fn with_source(mut self, name: impl Into<String>) -> Self {
        self.source = Some(SourceOption::Named(name.into()));
        self
    }

    pub fn with_source_object(mut self, source: SourceObject) -> Self {
        self.source = Some(SourceOption::Object(source));
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_zoom_range(mut self, minzoom: Option<f64>, maxzoom: Option<f64>) -> Self {
        self.minzoom = minzoom;
        self.maxzoom = maxzoom;
        self
    }

    pub fn insert_before(mut self, layer_id: impl Into<String>) -> Self {
        self.order = LayerOrder::Before(layer_id.into());
        self
    }

    pub fn insert_before_first_symbol(mut self) -> Self {
        self.order = LayerOrder::BeforeFirstSymbol;
        self
    }

    pub fn on_hover<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InteractionEvent) + Send + Sync + 'static,
    {
        self.handlers.on_hover = Some(Arc::new(handler));
        self
    }

    pub fn on_click<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InteractionEvent) + Send + Sync + 'static,
    {
        self.handlers.on_click = Some(Arc::new(handler));
        self
    }

    pub fn on_leave<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InteractionEvent) + Send + Sync + 'static,
    {
        self.handlers.on_leave = Some(Arc::new(handler));
        self
    }

    /// Work out which source this descriptor draws from
    ///
    /// `geojson` only ever feeds a geojson source: an untyped object (or no
    /// object) becomes one, with an empty attribution if unset, and a typed
    /// geojson object without its own `data` falls back to it. Objects of any
    /// other type pass through unchanged and never pick up `geojson`.
    pub(crate) fn resolve_source(&self) -> ResolvedSource {
        let object = match &self.source {
            Some(SourceOption::Named(name)) => return ResolvedSource::Named(name.clone()),
            Some(SourceOption::Object(object)) => Some(object),
            None => None,
        };

        if let Some(object) = object {
            if let Some(kind) = object.kind.as_deref().filter(|k| *k != InlineSource::GEOJSON) {
                return ResolvedSource::Inline(InlineSource {
                    kind: kind.to_string(),
                    data: object.data.clone(),
                    attribution: object.attribution.clone(),
                    options: object.options.clone(),
                });
            }
        }

        let data = object
            .and_then(|o| o.data.as_ref())
            .or(self.geojson.as_ref());
        match data {
            Some(data) => ResolvedSource::Inline(InlineSource {
                kind: InlineSource::GEOJSON.to_string(),
                data: Some(data.clone()),
                attribution: match object {
                    Some(o) if o.kind.is_some() => o.attribution.clone(),
                    Some(o) => Some(o.attribution.clone().unwrap_or_default()),
                    None => Some(String::new()),
                },
                options: object.map(|o| o.options.clone()).unwrap_or_default(),
            }),
            None if self.layer_type.map_or(false, |t| !t.requires_source()) => {
                ResolvedSource::None
            }
            None => ResolvedSource::Missing,
        }
    }
}
