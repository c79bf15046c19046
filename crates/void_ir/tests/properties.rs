//! Property tests for the invariants the IR store guarantees

use proptest::prelude::*;
use void_ir::*;

fn ns() -> NamespaceId {
    NamespaceId::from_raw(0)
}

fn entity() -> impl Strategy<Value = EntityRef> {
    (1u64..5).prop_map(|id| EntityRef::new(ns(), id))
}

fn name() -> impl Strategy<Value = String> {
    "[a-z]{0,6}"
}

fn value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        "[a-z ]{0,8}".prop_map(Value::String),
        prop::array::uniform3(-100.0f64..100.0).prop_map(Value::Vec3),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
        entity().prop_map(Value::EntityRef),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

/// Component values with a shape that field writes can land on
fn component_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        (0i64..5).prop_map(Value::Int),
        prop::collection::btree_map(prop_oneof![Just("a"), Just("b")], 0i64..5, 0..3).prop_map(|fields| {
            fields.into_iter().map(|(k, v)| (k, Value::Int(v))).collect::<Value>()
        }),
    ]
}

fn component() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("Health"), Just("Tag")]
}

fn field_path() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(""), Just("a"), Just("b"), Just("a.b")]
}

fn transform_property() -> impl Strategy<Value = TransformProperty> {
    prop_oneof![Just(TransformProperty::Position), Just(TransformProperty::Scale)]
}

/// Entity, component, transform and custom patches on one namespace
fn entity_patch() -> impl Strategy<Value = Patch> {
    prop_oneof![
        (entity(), name()).prop_map(|(e, n)| Patch::create_entity(e, n)),
        entity().prop_map(Patch::destroy_entity),
        (entity(), name()).prop_map(|(e, n)| Patch::rename_entity(e, n)),
        (entity(), component(), component_value()).prop_map(|(e, c, v)| Patch::add_component(e, c, v)),
        (entity(), component()).prop_map(|(e, c)| Patch::remove_component(e, c)),
        (entity(), component(), field_path(), component_value())
            .prop_map(|(e, c, f, v)| Patch::set_field(e, c, f, v)),
        (entity(), transform_property(), -10i64..10)
            .prop_map(|(e, p, x)| Patch::transform(e, p, Value::Int(x))),
        (entity(), component_value()).prop_map(|(e, v)| Patch::custom("Script", e, v)),
    ]
}

/// Every patch family, including hierarchy and layers
fn any_patch() -> impl Strategy<Value = Patch> {
    prop_oneof![
        4 => entity_patch(),
        1 => (entity(), entity()).prop_map(|(e, p)| Patch::set_parent(e, p)),
        1 => entity().prop_map(Patch::detach),
        1 => (entity(), 0u32..3).prop_map(|(e, i)| Patch::reorder(e, i)),
        1 => (1u32..3, name(), -2i32..2).prop_map(|(id, n, o)| Patch::create_layer(id, n, o)),
        1 => (1u32..3, name(), -2i32..2, any::<bool>())
            .prop_map(|(id, n, o, v)| Patch::update_layer(id, n, o, v)),
        1 => (1u32..3).prop_map(Patch::destroy_layer),
        1 => (1u32..3, entity()).prop_map(|(id, e)| Patch::assign_layer(id, e)),
        1 => (1u32..3, entity()).prop_map(|(id, e)| Patch::unassign_layer(id, e)),
        1 => (1u32..3, entity(), any::<bool>()).prop_map(|(id, e, destroy)| {
            let mut patch = if destroy {
                Patch::destroy_layer(id)
            } else {
                Patch::update_layer(id, "tagged", 0, true)
            };
            if let Patch::Layer(layer) = &mut patch {
                layer.entity = Some(e);
            }
            patch
        }),
    ]
}

fn options() -> impl Strategy<Value = OptimizerOptions> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(merge, eliminate, coalesce, redundant, sort)| OptimizerOptions {
            merge_consecutive: merge,
            eliminate_contradictions: eliminate,
            coalesce_field_patches: coalesce,
            remove_redundant: redundant,
            sort_for_efficiency: sort,
        },
    )
}

/// State reached by applying every patch that applies, skipping the rest
fn build_state(patches: &[Patch]) -> NamespaceState {
    let mut state = NamespaceState::new(ns());
    for patch in patches {
        let _ = state.apply(patch);
    }
    state
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn entity_ids_strictly_increase_across_restore(before in 1usize..20, after in 1usize..20) {
        let mut registry = NamespaceRegistry::new();
        let id = registry.create("game");
        let mut seen = Vec::new();
        for _ in 0..before {
            seen.push(registry.get_mut(id).map(Namespace::allocate_entity).unwrap_or(0));
        }

        let mut restored = NamespaceRegistry::from_bytes(&registry.to_bytes())
            .unwrap_or_else(|| panic!("registry did not round-trip"));
        for _ in 0..after {
            seen.push(restored.get_mut(id).map(Namespace::allocate_entity).unwrap_or(0));
        }

        prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(seen[0], 1);
    }

    #[test]
    fn failed_transaction_has_no_side_effects(
        setup in prop::collection::vec(any_patch(), 0..12),
        batch in prop::collection::vec(any_patch(), 1..12),
        fail_at in any::<prop::sample::Index>(),
    ) {
        let live = build_state(&setup);
        let fail_at = fail_at.index(batch.len());

        let mut tx = TransactionBuilder::new(TransactionId::from_raw(1), ns()).patches(batch).build();
        let mut staged = live.clone();
        let result = apply_transaction(&mut tx, |index, patch| {
            if index == fail_at {
                return Err(StateError::Rejected("injected".into()));
            }
            staged.apply(patch)
        });

        prop_assert_eq!(result.state, TransactionState::RolledBack);
        prop_assert_eq!(tx.state(), TransactionState::RolledBack);
        prop_assert_eq!(result.failed_count, 1);
        prop_assert!(result.applied_count <= fail_at);

        // The applier only swaps in a committed stage
        let mut store = StateStore::new();
        store.insert(live.clone());
        if result.is_success() {
            store.insert(staged);
        }
        prop_assert_eq!(store.get(ns()), Some(&live));
    }

    #[test]
    fn value_round_trips(value in value()) {
        prop_assert_eq!(Value::from_bytes(&value.to_bytes()), Some(value));
    }

    #[test]
    fn patch_and_batch_round_trip(patches in prop::collection::vec(any_patch(), 0..16)) {
        for patch in &patches {
            let decoded = Patch::from_bytes(&patch.to_bytes());
            prop_assert_eq!(decoded.as_ref(), Some(patch));
        }
        let batch = PatchBatch::from_patches(patches);
        prop_assert_eq!(PatchBatch::from_bytes(&batch.to_bytes()), Some(batch));
    }

    #[test]
    fn transaction_round_trips(
        id in 1u64..1_000,
        patches in prop::collection::vec(any_patch(), 0..8),
        dependencies in prop::collection::btree_set(1u64..1_000, 0..4),
        description in name(),
        priority in -5i32..5,
    ) {
        let mut builder = TransactionBuilder::new(TransactionId::from_raw(id), ns())
            .description(description)
            .priority(priority)
            .patches(patches);
        for dependency in dependencies {
            builder = builder.depends_on(TransactionId::from_raw(dependency));
        }
        let tx = builder.build();
        prop_assert_eq!(Transaction::from_bytes(&tx.to_bytes()), Some(tx));
    }

    #[test]
    fn schema_registry_round_trips(names in prop::collection::btree_set("[A-Z][a-z]{1,6}", 0..5), tag in 0usize..14) {
        let types = [
            FieldType::Bool, FieldType::Int, FieldType::Float, FieldType::String,
            FieldType::Vec2, FieldType::Vec3, FieldType::Vec4, FieldType::Mat4,
            FieldType::Array, FieldType::Object, FieldType::Bytes, FieldType::EntityRef,
            FieldType::AssetRef, FieldType::Any,
        ];
        let mut registry = SchemaRegistry::new();
        for name in &names {
            let schema = ComponentSchema::new(name.clone())
                .with_field(FieldDescriptor::new("value", types[tag]).required());
            let decoded = ComponentSchema::from_bytes(&schema.to_bytes());
            prop_assert_eq!(decoded.as_ref(), Some(&schema));
            registry.register(schema);
        }
        prop_assert_eq!(SchemaRegistry::from_bytes(&registry.to_bytes()), Some(registry));
    }

    #[test]
    fn optimize_is_idempotent(options in options(), patches in prop::collection::vec(any_patch(), 0..16)) {
        let optimizer = BatchOptimizer::new(options);
        let once = optimizer.optimize(&PatchBatch::from_patches(patches));
        prop_assert_eq!(optimizer.optimize(&once), once);
    }

    #[test]
    fn deduplicate_keeps_one_copy(
        patch in any_patch(),
        copies in 1usize..6,
        others in prop::collection::vec(any_patch(), 0..6),
    ) {
        let others: Vec<Patch> = others.into_iter().filter(|p| *p != patch).collect();
        let mut distinct: Vec<Patch> = Vec::new();
        for other in others {
            if !distinct.contains(&other) {
                distinct.push(other);
            }
        }

        let mut patches = distinct.clone();
        for i in 0..copies {
            patches.insert((i * 2).min(patches.len()), patch.clone());
        }

        let mut dedup = PatchDeduplicator::new();
        let out = dedup.deduplicate(&PatchBatch::from_patches(patches));
        prop_assert_eq!(dedup.removed_count(), copies - 1);
        prop_assert_eq!(out.iter().filter(|p| **p == patch).count(), 1);
        prop_assert_eq!(out.len(), distinct.len() + 1);
    }

    #[test]
    fn conflicts_are_symmetric(
        a in prop::collection::vec(any_patch(), 1..6),
        b in prop::collection::vec(any_patch(), 1..6),
    ) {
        let tx_a = TransactionBuilder::new(TransactionId::from_raw(1), ns()).patches(a).build();
        let tx_b = TransactionBuilder::new(TransactionId::from_raw(2), ns()).patches(b).build();
        let detector = ConflictDetector::new();
        detector.track(&tx_a);
        detector.track(&tx_b);

        let from_a = detector.check(&tx_a);
        let from_b = detector.check(&tx_b);
        prop_assert_eq!(from_a.is_some(), from_b.is_some());
        if let (Some(x), Some(y)) = (from_a, from_b) {
            prop_assert!(x.involves(tx_b.id()));
            prop_assert!(y.involves(tx_a.id()));
            prop_assert_eq!(x.conflict_type, y.conflict_type);
        }
        prop_assert_eq!(detector.detect().len(), usize::from(detector.check(&tx_a).is_some()));
    }

    #[test]
    fn snapshot_delta_replays_and_inverts(
        first in prop::collection::vec(any_patch(), 0..20),
        second in prop::collection::vec(any_patch(), 0..20),
    ) {
        let s1 = build_state(&first);
        let mut s2 = s1.clone();
        for patch in &second {
            let _ = s2.apply(patch);
        }

        let mut manager = SnapshotManager::new(4);
        let before = manager.create(&s1, "before");
        let after = manager.create(&s2, "after");
        let (Some(before), Some(after)) = (manager.get(before), manager.get(after)) else {
            panic!("snapshots were evicted");
        };

        let forward = SnapshotDelta::compute(before, after).unwrap_or_else(|| panic!("namespaces differ"));
        let mut replayed = before.to_state();
        prop_assert!(replayed.apply_all(&forward.to_patches()).is_ok());
        prop_assert_eq!(&replayed, &s2);

        let inverse = SnapshotDelta::compute(after, before).unwrap_or_else(|| panic!("namespaces differ"));
        prop_assert!(replayed.apply_all(&inverse.to_patches()).is_ok());
        prop_assert_eq!(&replayed, &s1);
    }
}

proptest! {
    // Most random batches do not apply cleanly, so allow plenty of rejects
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_global_rejects: 1 << 16,
        .. ProptestConfig::default()
    })]

    #[test]
    fn optimize_preserves_final_state(
        options in options(),
        setup in prop::collection::vec(any_patch(), 0..12),
        patches in prop::collection::vec(any_patch(), 0..10),
    ) {
        let initial = build_state(&setup);
        let batch = PatchBatch::from_patches(patches);

        let mut expected = initial.clone();
        prop_assume!(expected.apply_all(&batch).is_ok());

        let optimized = BatchOptimizer::new(options).optimize(&batch);
        let mut actual = initial;
        prop_assert!(actual.apply_all(&optimized).is_ok());
        prop_assert_eq!(actual, expected);
    }
}
