//! Invariant tests for void_map
//!
//! Properties that must hold however consumers and the host interleave

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use void_core::ConsumerId;
use void_map::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup() -> (Arc<EngineRegistry>, Arc<EngineHandle>, HeadlessProbe) {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let engine = HeadlessEngine::new();
    let probe = engine.probe();
    let handle = registry.register("main", engine);
    (registry, handle, probe)
}

fn reconciler(registry: &Arc<EngineRegistry>) -> LayerReconciler {
    LayerReconciler::attach(registry, BindingOptions::new(), ReconcilerOptions::new())
}

fn points(count: usize) -> Value {
    let features: Vec<Value> = (0..count)
        .map(|i| json!({"type": "Feature", "geometry": {"type": "Point", "coordinates": [i, i]}}))
        .collect();
    json!({"type": "FeatureCollection", "features": features})
}

/// INVARIANT: A consumer only ever removes what it created
#[test]
fn invariant_consumers_isolated() {
    let (registry, handle, probe) = setup();
    probe.add_host_layer("labels", LayerType::Symbol);
    handle.process();

    let first = reconciler(&registry);
    let second = reconciler(&registry);
    first.apply(LayerDescriptor::new(LayerType::Fill).with_geojson(points(2)));
    second.apply(LayerDescriptor::new(LayerType::Circle).with_geojson(points(3)));

    first.dispose();

    assert_eq!(
        probe.layer_ids(),
        vec!["labels".to_string(), second.layer_id().to_string()]
    );
    assert!(probe.has_source(second.layer_id()));
    assert_eq!(second.phase(), ReconcilerPhase::Created);
    assert!(handle.owned_by(first.consumer()).is_empty());
}

/// INVARIANT: Host style layers are never removed or moved
#[test]
fn invariant_host_layers_untouched() {
    let (registry, handle, probe) = setup();
    probe.add_host_source("streets", points(1));
    probe.add_host_layer("water", LayerType::Fill);
    probe.add_host_layer("labels", LayerType::Symbol);
    handle.process();

    let layer = reconciler(&registry);
    layer.apply(
        LayerDescriptor::new(LayerType::Line)
            .with_source("streets")
            .insert_before("labels"),
    );
    layer.apply(LayerDescriptor::new(LayerType::Fill).with_geojson(points(1)));
    layer.apply(
        LayerDescriptor::new(LayerType::Fill)
            .with_geojson(points(2))
            .insert_before_first_symbol(),
    );
    layer.dispose();

    let touched_host = probe.calls().into_iter().any(|call| match call {
        EngineCall::RemoveLayer { id } | EngineCall::MoveLayer { id, .. } => id != layer.layer_id(),
        EngineCall::RemoveSource { id } => id == "streets",
        _ => false,
    });
    assert!(!touched_host);
    assert_eq!(probe.layer_ids(), vec!["water".to_string(), "labels".to_string()]);
    assert!(probe.has_source("streets"));
}

/// INVARIANT: Repeated apply/dispose cycles leave nothing behind
#[test]
fn invariant_no_leaks_across_cycles() {
    let (registry, handle, probe) = setup();

    for i in 0..20 {
        let layer = reconciler(&registry);
        layer.apply(
            LayerDescriptor::new(LayerType::Circle)
                .with_geojson(points(i))
                .on_click(|_| {})
                .on_hover(|_| {}),
        );
        if i % 3 == 0 {
            probe.style_reset();
            handle.process();
        }
        layer.dispose();
        assert_eq!(handle.listener_count(), 0);
        assert!(handle.owned_by(layer.consumer()).is_empty());
    }

    assert!(probe.layer_ids().is_empty());
    assert_eq!(handle.consumer_count(), 0);
}

/// INVARIANT: The layer id survives any number of resets
#[test]
fn invariant_layer_id_stable_across_resets() {
    let (registry, handle, probe) = setup();
    let layer = reconciler(&registry);
    layer.apply(LayerDescriptor::new(LayerType::Fill).with_geojson(points(1)));
    let layer_id = layer.layer_id().to_string();

    for round in 1..=5u64 {
        probe.style_reset();
        handle.process();

        assert_eq!(layer.phase(), ReconcilerPhase::Created);
        assert_eq!(layer.recreations(), round);
        assert_eq!(probe.layer_ids(), vec![layer_id.clone()]);
        assert_eq!(layer.generation(), Some(handle.generation()));
    }
    assert_eq!(probe.count(EngineOp::AddLayer), 6);
}

/// INVARIANT: Notifications raised by listeners are delivered in order by
/// the outer drain, never re-entrantly
#[test]
fn invariant_no_reentrant_processing() {
    let (_registry, handle, _probe) = setup();
    let nested = Arc::new(AtomicUsize::new(usize::MAX));
    let delivered = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&handle);
    let nested_clone = nested.clone();
    handle.subscribe(Condition::StyleReset, ConsumerId::HOST, move |_| {
        if let Some(handle) = weak.upgrade() {
            handle.notify(EngineNotification::LayersChanged);
            nested_clone.store(handle.process(), Ordering::SeqCst);
        }
    });
    let delivered_clone = delivered.clone();
    handle.subscribe(Condition::LayersChanged, ConsumerId::HOST, move |_| {
        delivered_clone.fetch_add(1, Ordering::SeqCst);
    });

    handle.notify(EngineNotification::StyleReset);

    assert_eq!(nested.load(Ordering::SeqCst), 0);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

/// INVARIANT: Nothing reaches a map after it is unregistered
#[test]
fn invariant_cancelled_map_is_quiet() {
    let (registry, _handle, probe) = setup();
    let layer = reconciler(&registry);
    layer.apply(LayerDescriptor::new(LayerType::Fill).with_geojson(points(1)));
    probe.clear_calls();

    registry.unregister(&MapId::from("main"));
    layer.apply(
        LayerDescriptor::new(LayerType::Fill)
            .with_geojson(points(5))
            .with_paint("fill-color", "#000"),
    );
    layer.dispose();

    assert!(probe.calls().is_empty());
    assert_eq!(layer.phase(), ReconcilerPhase::Removed);
}

/// INVARIANT: A disposed reconciler never acts on late notifications
#[test]
fn invariant_disposed_ignores_notifications() {
    let (registry, handle, probe) = setup();
    let layer = reconciler(&registry);
    layer.apply(
        LayerDescriptor::new(LayerType::Fill)
            .with_geojson(points(1))
            .insert_before("later"),
    );
    layer.dispose();

    probe.add_host_layer("later", LayerType::Symbol);
    probe.style_reset();
    handle.process();

    assert_eq!(probe.count(EngineOp::AddLayer), 0);
    assert_eq!(layer.phase(), ReconcilerPhase::Removed);
}
