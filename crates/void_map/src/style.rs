//! Default paint styles
//!
//! Every layer type has a built-in paint style so a descriptor carrying
//! only data still draws something visible. Overrides replace defaults
//! key by key.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::descriptor::{LayerDescriptor, LayerType, PropertyMap};

fn builtin_paint(layer_type: LayerType) -> Value {
    match layer_type {
        LayerType::Fill => json!({
            "fill-color": "rgba(10,240,256,0.6)",
            "fill-outline-color": "rgba(20,230,256,0.8)"
        }),
        LayerType::Line => json!({
            "line-color": "rgb(203,211,2)",
            "line-width": 5,
            "line-blur": 0
        }),
        LayerType::Circle => json!({
            "circle-color": "rgba(10,240,256,0.6)",
            "circle-stroke-color": "#fff",
            "circle-stroke-width": 2
        }),
        LayerType::Symbol => json!({
            "text-color": "#000",
            "text-halo-color": "#fff",
            "text-halo-width": 1
        }),
        LayerType::Heatmap => json!({
            "heatmap-intensity": 1,
            "heatmap-radius": 30,
            "heatmap-opacity": 0.8
        }),
        LayerType::FillExtrusion => json!({
            "fill-extrusion-color": "rgba(10,240,256,0.6)",
            "fill-extrusion-opacity": 0.8
        }),
        LayerType::Raster => json!({
            "raster-opacity": 1
        }),
        LayerType::Hillshade => json!({
            "hillshade-exaggeration": 0.5
        }),
        LayerType::Background => json!({
            "background-color": "rgba(255,255,255,0)"
        }),
    }
}

/// Built-in paint for `layer_type`, with `overrides` applied per key
pub fn default_paint(layer_type: LayerType, overrides: Option<&PropertyMap>) -> PropertyMap {
    let mut paint = match builtin_paint(layer_type) {
        Value::Object(map) => map.into_iter().collect(),
        _ => PropertyMap::new(),
    };
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            paint.insert(key.clone(), value.clone());
        }
    }
    paint
}

/// Per-type paint overrides, typically shared across an application
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaintOverrides {
    by_type: BTreeMap<LayerType, PropertyMap>,
}

impl PaintOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override one paint key for one layer type
    pub fn with(
        mut self,
        layer_type: LayerType,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.by_type
            .entry(layer_type)
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, layer_type: LayerType, paint: PropertyMap) {
        self.by_type.insert(layer_type, paint);
    }

    pub fn get(&self, layer_type: LayerType) -> Option<&PropertyMap> {
        self.by_type.get(&layer_type)
    }

    /// Effective paint for `layer_type`
    pub fn resolve(&self, layer_type: LayerType) -> PropertyMap {
        default_paint(layer_type, self.get(layer_type))
    }
}

impl LayerDescriptor {
    /// Inline GeoJSON layer drawn with the default paint for its type
    pub fn geojson(layer_type: LayerType, data: Value, overrides: &PaintOverrides) -> Self {
        LayerDescriptor::new(layer_type)
            .with_geojson(data)
            .with_paint_map(overrides.resolve(layer_type))
    }
}
