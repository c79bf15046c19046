//! Complete IR System Example
//!
//! This example demonstrates the full IR system with:
//! - Namespaces with permissions and limits
//! - Schema validation on submit
//! - Transaction application, publishing and conflict detection
//! - Snapshot-based rollback
//! - Hot-reload state transfer
//!
//! Run with `RUST_LOG=debug` to see the system's own logging.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use void_ir::{
    ComponentSchema, FieldDescriptor, FieldType, HotReloadable, IrConfig, IrSystem,
    NamespacePermissions, Patch, PatchFilter, PatchKind, ResourceLimits, TransactionError,
    TransformProperty, Value,
};

fn main() {
    env_logger::init();
    println!("=== Complete IR System Demo ===\n");

    // 1. Setup
    println!("1. Setting up the IR system...");
    let system = IrSystem::new(IrConfig::default());
    let physics = system.create_namespace("physics_app");
    let viewer = system.create_namespace_with(
        "viewer_app",
        NamespacePermissions::read_only(),
        ResourceLimits::default(),
    );
    println!("   - Created namespaces {} and {}\n", physics, viewer);

    // 2. Validation Setup
    println!("2. Registering schemas...");
    system.register_schema(
        ComponentSchema::new("Health")
            .with_field(FieldDescriptor::new("hp", FieldType::Int).required().with_range(Some(0.0), Some(1000.0))),
    );
    println!("   - Registered Health component schema\n");

    // 3. Subscribers
    let committed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&committed);
    system
        .bus()
        .subscribe(PatchFilter::for_kinds([PatchKind::Component]), move |event| {
            counter.fetch_add(1, Ordering::Relaxed);
            println!("   [bus] #{} {:?}", event.sequence_number, event.patch.kind());
        })
        .expect("bus is running");

    // 4. Create and Submit Transactions
    println!("3. Submitting transactions...");
    let hero = system.allocate_entity(physics).expect("namespace exists");
    let spawn = system
        .begin(physics)
        .description("spawn hero")
        .patch(Patch::create_entity(hero, "hero"))
        .patch(Patch::add_component(hero, "Health", [("hp", 100i64)].into_iter().collect()))
        .patch(Patch::transform(hero, TransformProperty::Position, Value::Vec3([0.0, 1.0, 0.0])))
        .build();
    let spawn_id = system.submit(spawn).expect("valid transaction");
    println!("   - Queued {}", spawn_id);

    let bad = system.submit_patch(physics, Patch::set_field(hero, "Health", "hp", Value::Int(5000)));
    if let Err(TransactionError::ValidationFailed { errors, .. }) = bad {
        println!("   - Rejected out-of-range write: {}", errors[0]);
    }
    let denied = system.submit_patch(viewer, Patch::rename_entity(hero, "intruder"));
    if let Err(err) = denied {
        println!("   - Rejected viewer write: {}", err);
    }

    let damage = system
        .begin(physics)
        .depends_on(spawn_id)
        .patch(Patch::set_field(hero, "Health", "hp", Value::Int(75)))
        .build();
    system.submit(damage).expect("valid transaction");
    println!("   - Conflicts among queued transactions: {}\n", system.check_conflicts().len());

    // 5. Apply
    println!("4. Applying...");
    for result in system.apply_all() {
        println!("   - {} -> {:?} ({} patches)", result.id, result.state, result.applied_count);
    }
    let usage = system.namespace(physics).map(|ns| ns.usage).unwrap_or_default();
    println!(
        "   - {} entities, {} components, {} component patches observed\n",
        usage.entity_count,
        usage.component_count,
        committed.load(Ordering::Relaxed)
    );

    // 6. Snapshot and rollback
    println!("5. Snapshot and rollback...");
    let checkpoint = system.snapshot(physics, "after spawn").expect("snapshots allowed");
    system
        .submit_patch(physics, Patch::destroy_entity(hero))
        .expect("valid transaction");
    system.apply_all();
    println!("   - Entities after destroy: {}", usage_entities(&system, physics));
    let undo = system.rollback_to(checkpoint).expect("snapshot retained");
    println!("   - Rolled back with {} patches", undo.len());
    println!("   - Entities after rollback: {}\n", usage_entities(&system, physics));

    // 7. Hot reload
    println!("6. Hot reload...");
    let saved = HotReloadable::snapshot(&system);
    let mut reloaded = IrSystem::new(IrConfig::default());
    match reloaded.restore(&saved) {
        Ok(()) => println!(
            "   - Restored {} bytes, {} entities carried over",
            saved.len(),
            usage_entities(&reloaded, physics)
        ),
        Err(err) => println!("   - Restore failed: {}", err),
    }

    println!("\n=== Demo Complete ===");
}

fn usage_entities(system: &IrSystem, namespace: void_ir::NamespaceId) -> usize {
    system.read_state(namespace, |state| state.entity_count()).unwrap_or(0)
}
