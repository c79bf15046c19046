//! Integration tests for void_ir crate
//!
//! Tests the full submit, apply, publish and snapshot pipeline

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use void_ir::*;

fn position(x: f64, y: f64, z: f64) -> Value {
    [("position", Value::Vec3([x, y, z]))].into_iter().collect()
}

fn merge_only() -> OptimizerOptions {
    OptimizerOptions {
        merge_consecutive: true,
        ..OptimizerOptions::none()
    }
}

#[test]
fn test_add_then_set_field_scenario() {
    let system = IrSystem::new(IrConfig {
        optimize_on_submit: true,
        optimizer: merge_only(),
        ..Default::default()
    });
    let game = system.create_namespace("game");
    let e0 = system.allocate_entity(game).unwrap();

    let patches = vec![
        Patch::add_component(e0, "Transform", position(0.0, 0.0, 0.0)),
        Patch::set_field(e0, "Transform", "position", Value::Vec3([1.0, 2.0, 3.0])),
    ];

    // The optimizer alone folds the pair into one Add
    let optimized = BatchOptimizer::new(merge_only()).optimize(&PatchBatch::from_patches(patches.clone()));
    assert_eq!(optimized.len(), 1);
    match &optimized.patches()[0] {
        Patch::Component(cp) => {
            assert_eq!(cp.op, ComponentOp::Add);
            assert_eq!(cp.value.get_path("position"), Some(&Value::Vec3([1.0, 2.0, 3.0])));
        }
        other => panic!("unexpected patch {other:?}"),
    }

    let id = system.submit(system.begin(game).patches(patches).build()).unwrap();
    assert!(system.conflicts().is_tracked(id));

    let results = system.apply_all();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].applied_count, 1);

    let usage = system.namespace(game).unwrap().usage;
    assert_eq!(usage.component_count, 1);
    assert_eq!(
        system.read_state(game, |s| s.component(e0.entity_id, "Transform").cloned()),
        Some(Some(position(1.0, 2.0, 3.0)))
    );

    system.conflicts().clear();
    assert!(system.conflicts().footprint(id).is_empty());
}

#[test]
fn test_permission_rejection_ignores_schema() {
    let validator = PatchValidator::new();
    validator.register_schema(
        ComponentSchema::new("Health").with_field(FieldDescriptor::new("hp", FieldType::Int)),
    );
    let permissions = NamespacePermissions {
        can_modify_components: false,
        ..Default::default()
    };
    let entity = EntityRef::new(NamespaceId::from_raw(0), 1);

    let schema_valid = [
        Patch::add_component(entity, "Health", [("hp", 10i64)].into_iter().collect()),
        Patch::set_field(entity, "Health", "hp", Value::Int(5)),
        Patch::remove_component(entity, "Health"),
    ];
    for patch in &schema_valid {
        let result = validator.validate(patch, &permissions);
        assert!(!result.valid, "{patch:?} passed");
        assert!(result.has_kind(ValidationErrorKind::PermissionDenied));
    }
    assert!(validator.validate(&schema_valid[1], &NamespacePermissions::default()).valid);
}

#[test]
fn test_patch_bus_ordering() {
    let bus = PatchBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(PatchFilter::all(), move |event| {
        sink.lock().push((event.patch.clone(), event.sequence_number));
    })
    .unwrap();

    let ns = NamespaceId::from_raw(0);
    let e = EntityRef::new(ns, 1);
    let published = vec![
        Patch::create_entity(e, "p1"),
        Patch::rename_entity(e, "p2"),
        Patch::destroy_entity(e),
    ];
    for patch in &published {
        bus.publish(patch, ns, TransactionId::from_raw(1)).unwrap();
    }

    let seen = seen.lock();
    let patches: Vec<Patch> = seen.iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(patches, published);
    assert!(seen.windows(2).all(|w| w[0].1 < w[1].1));
}

#[test]
fn test_namespaces_are_isolated() {
    let system = IrSystem::default();
    let game = system.create_namespace("game");
    let editor = system.create_namespace("editor");
    assert_eq!(system.find_namespace("editor"), Some(editor));

    let owned = system.allocate_entity(game).unwrap();
    system.submit_patch(game, Patch::create_entity(owned, "hero")).unwrap();
    system.apply_all();

    // Touching another namespace's entity needs cross-namespace access
    let err = system
        .submit_patch(editor, Patch::rename_entity(owned, "villain"))
        .unwrap_err();
    match err {
        TransactionError::ValidationFailed { errors, .. } => {
            assert!(errors.iter().any(|e| e.kind == ValidationErrorKind::PermissionDenied));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Entity ids are scoped per namespace
    assert_eq!(system.allocate_entity(editor).unwrap().entity_id, 1);
    assert_eq!(system.state(editor).unwrap().entity_count(), 0);
}

#[test]
fn test_concurrent_producers_single_applier() {
    let system = Arc::new(IrSystem::default());
    let namespaces: Vec<NamespaceId> = (0..4)
        .map(|i| system.create_namespace(format!("producer-{i}")))
        .collect();

    let handles: Vec<_> = namespaces
        .iter()
        .map(|&ns| {
            let system = Arc::clone(&system);
            thread::spawn(move || {
                for _ in 0..25 {
                    let entity = system.allocate_entity(ns).unwrap();
                    let tx = system
                        .begin(ns)
                        .patch(Patch::create_entity(entity, "spawned"))
                        .patch(Patch::add_component(entity, "Health", Value::Int(100)))
                        .build();
                    system.submit(tx).unwrap();
                }
            })
        })
        .collect();

    let mut results = Vec::new();
    while results.len() < 100 {
        results.extend(system.apply_pending(10));
        thread::yield_now();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    results.extend(system.apply_all());

    assert_eq!(results.len(), 100);
    assert!(results.iter().all(TransactionResult::is_success));
    for ns in namespaces {
        let usage = system.namespace(ns).unwrap().usage;
        assert_eq!(usage.entity_count, 25);
        assert_eq!(usage.pending_transactions, 0);
    }
    assert_eq!(system.async_bus().consume_all().len(), 200);
}

#[test]
fn test_snapshot_delta_between_checkpoints() {
    let system = IrSystem::default();
    let game = system.create_namespace("game");
    let root = system.allocate_entity(game).unwrap();
    let child = system.allocate_entity(game).unwrap();
    system
        .submit(
            system
                .begin(game)
                .patch(Patch::create_entity(root, "root"))
                .patch(Patch::create_entity(child, "child"))
                .patch(Patch::create_layer(1, "world", 0))
                .build(),
        )
        .unwrap();
    system.apply_all();
    let first = system.snapshot(game, "empty scene").unwrap();

    system
        .submit(
            system
                .begin(game)
                .patch(Patch::set_parent(child, root))
                .patch(Patch::assign_layer(1, child))
                .patch(Patch::transform(child, TransformProperty::Position, Value::Vec3([1.0, 0.0, 0.0])))
                .build(),
        )
        .unwrap();
    system.apply_all();
    let second = system.snapshot(game, "arranged").unwrap();

    let (a, b) = (system.get_snapshot(first).unwrap(), system.get_snapshot(second).unwrap());
    let delta = SnapshotDelta::compute(&a, &b).unwrap();
    assert_eq!(delta.from(), Some(first));
    assert_eq!(delta.to(), Some(second));

    let mut replay = a.to_state();
    replay.apply_all(&delta.to_patches()).unwrap();
    assert_eq!(replay, b.to_state());

    // Rolling back publishes the inverse and restores the checkpoint
    system.async_bus().consume_all();
    let undo = system.rollback_to(first).unwrap();
    assert_eq!(undo.len(), delta.len());
    assert_eq!(system.state(game).unwrap(), a.to_state());
    assert_eq!(system.async_bus().len(), undo.len());
}

#[test]
fn test_hot_reload_registry_with_system() {
    // Retained snapshots are not carried across a reload
    let source = IrSystem::new(IrConfig {
        snapshot_before_apply: false,
        ..Default::default()
    });
    let game = source.create_namespace("game");
    let entity = source.allocate_entity(game).unwrap();
    source.submit_patch(game, Patch::create_entity(entity, "kept")).unwrap();
    source.apply_all();

    let mut registry = HotReloadRegistry::new();
    registry.register("ir", Box::new(source));
    registry.register("schemas", Box::new(HotReload::new(SchemaRegistry::new())));
    let saved = registry.snapshot_all();

    let mut target = HotReloadRegistry::new();
    target.register("ir", Box::new(IrSystem::default()));
    target.register("schemas", Box::new(HotReload::new(SchemaRegistry::new())));
    assert!(target.restore_all(&saved).is_empty());
    assert_eq!(target.get("ir").map(|ir| ir.snapshot()).as_ref(), saved.get("ir"));
}

#[test]
fn test_config_from_json_drives_system() {
    let config = IrConfig::from_json(r#"{ "reject_conflicting": true, "max_patches_per_transaction": 2 }"#).unwrap();
    let system = IrSystem::new(config);
    let game = system.create_namespace("game");
    let e = system.allocate_entity(game).unwrap();

    let tx = system
        .begin(game)
        .patches([
            Patch::create_entity(e, "a"),
            Patch::rename_entity(e, "b"),
            Patch::rename_entity(e, "c"),
        ])
        .build();
    assert!(matches!(system.submit(tx), Err(TransactionError::ResourceLimit { .. })));

    system.submit_patch(game, Patch::create_entity(e, "a")).unwrap();
    assert!(matches!(
        system.submit_patch(game, Patch::rename_entity(e, "b")),
        Err(TransactionError::Conflicting(_))
    ));
}
