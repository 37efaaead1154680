//! Registry and binding tests for void_map

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::json;
use void_core::ConsumerId;
use void_map::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn inline_spec(id: &str) -> LayerSpec {
    let mut spec = LayerSpec::new(id, LayerType::Fill);
    spec.source = Some(LayerSource::Inline(InlineSource::geojson(
        json!({"type": "FeatureCollection", "features": []}),
    )));
    spec
}

// Registry

#[test]
fn test_default_map_is_first_registered() {
    init_logging();
    let registry = EngineRegistry::new();
    assert_eq!(registry.default_map(), None);

    registry.register("main", HeadlessEngine::new());
    registry.register("inset", HeadlessEngine::new());

    assert_eq!(registry.default_map(), Some(MapId::from("main")));
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.resolve(None).map(|handle| handle.map_id().clone()),
        Some(MapId::from("main"))
    );
}

#[test]
fn test_unregister_promotes_next_map() {
    init_logging();
    let registry = EngineRegistry::new();
    let main = registry.register("main", HeadlessEngine::new());
    registry.register("inset", HeadlessEngine::new());

    let removed = registry.unregister(&MapId::from("main")).unwrap();

    assert!(Arc::ptr_eq(&removed, &main));
    assert!(!main.is_ready());
    assert_eq!(registry.default_map(), Some(MapId::from("inset")));
    assert!(registry.unregister(&MapId::from("main")).is_none());
}

#[test]
fn test_register_again_cancels_previous() {
    init_logging();
    let registry = EngineRegistry::new();
    let old = registry.register("main", HeadlessEngine::new());
    let new = registry.register("main", HeadlessEngine::new());

    assert!(!old.is_ready());
    assert!(new.is_ready());
    assert_eq!(registry.map_ids(), vec![MapId::from("main")]);
    assert!(matches!(
        old.add_layer(&inline_spec("a"), None, ConsumerId::new()),
        Err(MapError::Cancelled(_))
    ));
}

#[test]
fn test_notify_forwards_to_map() {
    init_logging();
    let registry = EngineRegistry::new();
    let handle = registry.register("main", HeadlessEngine::new());
    let initial = handle.generation();

    assert!(registry.notify(&MapId::from("main"), EngineNotification::StyleReset));
    assert!(!registry.notify(&MapId::from("nowhere"), EngineNotification::StyleReset));
    assert_eq!(handle.generation(), initial.next());
}

#[test]
fn test_global_registry_is_shared() {
    assert!(Arc::ptr_eq(&EngineRegistry::global(), &EngineRegistry::global()));
}

#[test]
fn test_on_ready_waits_then_fires() {
    init_logging();
    let registry = EngineRegistry::new();
    let fired = Arc::new(AtomicU32::new(0));

    let fired_clone = fired.clone();
    let waiter = registry.on_ready(Some(MapId::from("main")), move |_| {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert!(waiter.is_some());
    assert_eq!(registry.waiter_count(), 1);

    registry.register("main", HeadlessEngine::new());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(registry.waiter_count(), 0);

    let fired_clone = fired.clone();
    let waiter = registry.on_ready(None, move |_| {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert!(waiter.is_none());
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

// Bindings

#[test]
fn test_binding_resolves_on_registration() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let binding = MapBinding::new(&registry, BindingOptions::new());
    assert_eq!(binding.status(), BindingStatus::Pending);
    assert!(binding.handle().is_none());

    let handle = registry.register("main", HeadlessEngine::new());

    assert_eq!(binding.status(), BindingStatus::Resolved);
    assert!(Arc::ptr_eq(&binding.handle().unwrap(), &handle));
    assert_eq!(handle.consumer_count(), 1);
}

#[test]
fn test_binding_to_named_map() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    registry.register("main", HeadlessEngine::new());
    let binding = MapBinding::new(&registry, BindingOptions::new().for_map("inset"));

    assert_eq!(binding.status(), BindingStatus::Pending);

    let inset = registry.register("inset", HeadlessEngine::new());
    assert!(Arc::ptr_eq(&binding.handle().unwrap(), &inset));
}

#[test]
fn test_binding_waits_for_layer() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let engine = HeadlessEngine::new();
    let probe = engine.probe();
    let handle = registry.register("main", engine);

    let binding = MapBinding::new(&registry, BindingOptions::new().waiting_for_layer("roads"));
    assert_eq!(binding.status(), BindingStatus::Pending);
    assert_eq!(handle.listener_count(), 1);

    probe.add_host_layer("water", LayerType::Fill);
    handle.process();
    assert_eq!(binding.status(), BindingStatus::Pending);

    probe.add_host_layer("roads", LayerType::Line);
    handle.process();
    assert_eq!(binding.status(), BindingStatus::Resolved);
    assert_eq!(handle.listener_count(), 0);
    assert_eq!(handle.consumer_count(), 1);
}

#[test]
fn test_layer_already_present_resolves_at_once() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let engine = HeadlessEngine::new();
    engine.probe().add_host_layer("roads", LayerType::Line);
    registry.register("main", engine);

    let binding = MapBinding::new(&registry, BindingOptions::new().waiting_for_layer("roads"));
    assert_eq!(binding.status(), BindingStatus::Resolved);
}

#[test]
fn test_on_resolved_order() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let binding = MapBinding::new(&registry, BindingOptions::new());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    binding.on_resolved(move |_| seen_clone.lock().push(1));
    let seen_clone = seen.clone();
    binding.on_resolved(move |_| seen_clone.lock().push(2));
    assert!(seen.lock().is_empty());

    registry.register("main", HeadlessEngine::new());
    assert_eq!(*seen.lock(), vec![1, 2]);

    let seen_clone = seen.clone();
    binding.on_resolved(move |_| seen_clone.lock().push(3));
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
}

#[test]
fn test_teardown_while_pending() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let binding = MapBinding::new(&registry, BindingOptions::new());
    let fired = Arc::new(AtomicBool::new(false));

    let fired_clone = fired.clone();
    binding.on_resolved(move |_| fired_clone.store(true, Ordering::SeqCst));
    binding.teardown();
    assert_eq!(registry.waiter_count(), 0);

    let handle = registry.register("main", HeadlessEngine::new());

    assert_eq!(binding.status(), BindingStatus::TornDown);
    assert!(!fired.load(Ordering::SeqCst));
    assert_eq!(handle.consumer_count(), 0);
}

#[test]
fn test_teardown_while_waiting_for_layer() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let engine = HeadlessEngine::new();
    let probe = engine.probe();
    let handle = registry.register("main", engine);
    let binding = MapBinding::new(&registry, BindingOptions::new().waiting_for_layer("roads"));

    binding.teardown();
    probe.add_host_layer("roads", LayerType::Line);
    handle.process();

    assert_eq!(binding.status(), BindingStatus::TornDown);
    assert_eq!(handle.listener_count(), 0);
    assert_eq!(handle.consumer_count(), 0);
}

#[test]
fn test_teardown_removes_owned_resources() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let engine = HeadlessEngine::new();
    let probe = engine.probe();
    let handle = registry.register("main", engine);
    probe.add_host_layer("roads", LayerType::Line);

    let binding = MapBinding::new(&registry, BindingOptions::new());
    let consumer = binding.consumer();
    handle.add_layer(&inline_spec("mine"), None, consumer).unwrap();
    handle.subscribe(Condition::LayersChanged, consumer, |_| {});
    handle.on_interaction(LayerEventKind::Click, "mine", consumer, |_| {});

    binding.teardown();
    binding.teardown();

    assert_eq!(probe.layer_ids(), vec!["roads".to_string()]);
    assert!(!probe.has_source("mine"));
    assert_eq!(handle.listener_count(), 0);
    assert!(!handle.has_interaction(LayerEventKind::Click, "mine", consumer));
    assert!(handle.owned_by(consumer).is_empty());
    assert_eq!(handle.consumer_count(), 0);
    assert_eq!(probe.count(EngineOp::RemoveLayer), 1);
}

#[test]
fn test_cleanup_leaves_other_consumers() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let engine = HeadlessEngine::new();
    let probe = engine.probe();
    let handle = registry.register("main", engine);

    let first = MapBinding::new(&registry, BindingOptions::new());
    let second = MapBinding::new(&registry, BindingOptions::new());
    handle.add_layer(&inline_spec("a"), None, first.consumer()).unwrap();
    handle.add_layer(&inline_spec("b"), None, second.consumer()).unwrap();
    handle.subscribe(Condition::StyleReset, second.consumer(), |_| {});

    drop(first);

    assert_eq!(probe.layer_ids(), vec!["b".to_string()]);
    assert!(probe.has_source("b"));
    assert!(handle.is_subscribed(Condition::StyleReset, second.consumer()));
    assert_eq!(handle.consumer_count(), 1);
}

#[test]
fn test_teardown_after_unregister() {
    init_logging();
    let registry = Arc::new(EngineRegistry::new());
    let engine = HeadlessEngine::new();
    let probe = engine.probe();
    let handle = registry.register("main", engine);
    let binding = MapBinding::new(&registry, BindingOptions::new());
    handle.add_layer(&inline_spec("mine"), None, binding.consumer()).unwrap();
    probe.clear_calls();

    registry.unregister(&MapId::from("main"));
    binding.teardown();

    assert!(probe.calls().is_empty());
    assert_eq!(binding.status(), BindingStatus::TornDown);
    assert!(handle.owned_by(binding.consumer()).is_empty());
}
