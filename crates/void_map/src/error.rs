//! Error types for map bindings and layer reconciliation

use std::fmt;

use thiserror::Error;

use crate::handle::MapId;

/// Errors reported by a host engine for a single call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Layer already exists: {0}")]
    LayerExists(String),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Source already exists: {0}")]
    SourceExists(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid layer spec: {0}")]
    InvalidSpec(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Engine mutation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    AddLayer,
    RemoveLayer,
    RemoveSource,
    SetSourceData,
    SetPaintProperty,
    SetLayoutProperty,
    SetFilter,
    SetZoomRange,
    MoveLayer,
}

impl EngineOp {
    /// Name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineOp::AddLayer => "add_layer",
            EngineOp::RemoveLayer => "remove_layer",
            EngineOp::RemoveSource => "remove_source",
            EngineOp::SetSourceData => "set_source_data",
            EngineOp::SetPaintProperty => "set_paint_property",
            EngineOp::SetLayoutProperty => "set_layout_property",
            EngineOp::SetFilter => "set_filter",
            EngineOp::SetZoomRange => "set_zoom_range",
            EngineOp::MoveLayer => "move_layer",
        }
    }
}

impl fmt::Display for EngineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from map handles, bindings and reconcilers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("Engine rejected {op} on '{target}': {source}")]
    EngineRejection {
        op: EngineOp,
        target: String,
        #[source]
        source: EngineError,
    },

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Map '{0}' is no longer available")]
    Cancelled(MapId),
}

impl MapError {
    /// Check if this came from the engine refusing a call
    pub fn is_rejection(&self) -> bool {
        matches!(self, MapError::EngineRejection { .. })
    }
}

/// Result type for map operations
pub type MapResult<T> = Result<T, MapError>;

/// Non-fatal problem recorded by a reconciler
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// Layer the problem concerns
    pub layer_id: String,
    /// What went wrong
    pub error: MapError,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.layer_id, self.error)
    }
}
