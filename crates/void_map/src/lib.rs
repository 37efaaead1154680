//! # void_map - Declarative Layers on Shared Map Engines
//!
//! Lets independent consumers each keep one layer on a map engine that
//! belongs to the host application, without stepping on each other or on
//! the host's own style.
//!
//! ## Pieces
//!
//! - **Host boundary**: [`HostEngine`] is everything this crate needs from
//!   a map engine. [`HeadlessEngine`] is an in-memory implementation.
//! - **Registry**: hosts [`EngineRegistry::register`] engines by [`MapId`];
//!   the first one registered is the default map.
//! - **Bindings**: a [`MapBinding`] attaches one consumer to one map, waits
//!   for it if needed, and on teardown removes what the consumer created.
//! - **Reconciler**: a [`LayerReconciler`] takes successive
//!   [`LayerDescriptor`]s and issues the minimal engine calls to match them,
//!   recreating the layer when the engine discards it.
//!
//! ## Example
//!
//! ```ignore
//! let registry = Arc::new(EngineRegistry::new());
//! registry.register("main", HeadlessEngine::new());
//!
//! let layer = LayerReconciler::attach(&registry, BindingOptions::new(), ReconcilerOptions::new());
//! layer.apply(LayerDescriptor::geojson(LayerType::Fill, data, &PaintOverrides::new()));
//! ```

pub mod binding;
pub mod config;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod handle;
pub mod headless;
pub mod host;
pub mod ledger;
pub mod reconciler;
pub mod registry;
pub mod style;

pub use binding::{BindingOptions, BindingStatus, MapBinding};
pub use config::{ConfigError, ConfigResult, ReconcilerConfig, ReconcilerOptions};
pub use descriptor::{
    LayerDescriptor, LayerHandler, LayerHandlers, LayerOrder, LayerType, PropertyMap,
    SourceObject, SourceOption,
};
pub use error::{EngineError, EngineOp, MapError, MapResult, Warning};
pub use handle::{CleanupReport, EngineHandle, MapId};
pub use headless::{EngineCall, HeadlessEngine, HeadlessProbe};
pub use host::{
    Condition, EngineNotification, HostEngine, InlineSource, InteractionEvent, LayerEventKind,
    LayerInfo, LayerSource, LayerSpec,
};
pub use reconciler::{Deferral, LayerReconciler, ReconcilerPhase};
pub use registry::{EngineRegistry, WaiterId};
pub use style::{default_paint, PaintOverrides};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::binding::{BindingOptions, MapBinding};
    pub use crate::config::{ReconcilerConfig, ReconcilerOptions};
    pub use crate::descriptor::{LayerDescriptor, LayerOrder, LayerType, SourceObject};
    pub use crate::error::{MapError, MapResult};
    pub use crate::handle::{EngineHandle, MapId};
    pub use crate::host::{EngineNotification, HostEngine, InteractionEvent, LayerEventKind};
    pub use crate::reconciler::{LayerReconciler, ReconcilerPhase};
    pub use crate::registry::EngineRegistry;
    pub use crate::style::PaintOverrides;
    pub use void_core::ConsumerId;
}
