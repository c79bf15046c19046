//! State snapshots for rollback support
//!
//! A [`Snapshot`] is an immutable deep copy of one namespace's entities,
//! components and layers. The [`SnapshotManager`] keeps a bounded ring of
//! them, evicting the oldest first. A [`SnapshotDelta`] turns the difference
//! between two captures into a patch batch that replays it.

use crate::batch::PatchBatch;
use crate::codec::{ByteReader, ByteWriter, WireFormat};
use crate::namespace::NamespaceId;
use crate::patch::{EntityRef, LayerOp, LayerPatch, Patch};
use crate::state::{EntityRecord, LayerRecord, NamespaceState};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Get the raw ID
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Create from a raw value (deserialization only)
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap{}", self.0)
    }
}

/// Immutable capture of a namespace's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub(crate) id: SnapshotId,
    pub(crate) namespace: NamespaceId,
    pub(crate) description: String,
    pub(crate) timestamp_ms: u64,
    pub(crate) entities: BTreeMap<u64, EntityRecord>,
    pub(crate) layers: BTreeMap<u32, LayerRecord>,
}

impl Snapshot {
    /// Deep-copy the current state
    pub fn capture(id: SnapshotId, state: &NamespaceState, description: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id,
            namespace: state.namespace(),
            description: description.into(),
            timestamp_ms,
            entities: state.entity_map().clone(),
            layers: state.layer_map().clone(),
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Capture time in milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn entity(&self, entity_id: u64) -> Option<&EntityRecord> {
        self.entities.get(&entity_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&u64, &EntityRecord)> {
        self.entities.iter()
    }

    pub fn layers(&self) -> impl Iterator<Item = (&u32, &LayerRecord)> {
        self.layers.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The captured state as a live, mutable copy
    pub fn to_state(&self) -> NamespaceState {
        NamespaceState::from_snapshot(self)
    }
}

impl WireFormat for Snapshot {
    const MAGIC: [u8; 4] = *b"SNAP";

    fn encode_payload(&self, w: &mut ByteWriter) {
        w.write_u64(self.id.0);
        w.write_u32(self.namespace.raw());
        w.write_str(&self.description);
        w.write_u64(self.timestamp_ms);
        w.write_u32(self.entities.len() as u32);
        for (id, record) in &self.entities {
            w.write_u64(*id);
            record.encode(w);
        }
        w.write_u32(self.layers.len() as u32);
        for (id, layer) in &self.layers {
            w.write_u32(*id);
            layer.encode(w);
        }
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        Some(Self {
            id: SnapshotId(r.read_u64()?),
            namespace: NamespaceId::from_raw(r.read_u32()?),
            description: r.read_string()?,
            timestamp_ms: r.read_u64()?,
            entities: r
                .read_seq(|r| Some((r.read_u64()?, EntityRecord::decode(r)?)))?
                .into_iter()
                .collect(),
            layers: r
                .read_seq(|r| Some((r.read_u32()?, LayerRecord::decode(r)?)))?
                .into_iter()
                .collect(),
        })
    }
}

/// Bounded store of snapshots, oldest evicted first
#[derive(Debug)]
pub struct SnapshotManager {
    snapshots: VecDeque<Snapshot>,
    max_snapshots: usize,
    next_id: u64,
}

impl SnapshotManager {
    /// Create a manager retaining at most `max_snapshots` (at least one)
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            max_snapshots: max_snapshots.max(1),
            next_id: 1,
        }
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Capture `state`
    pub fn create(&mut self, state: &NamespaceState, description: impl Into<String>) -> SnapshotId {
        self.create_capped(state, description, None)
    }

    /// Capture `state`, additionally keeping at most `namespace_cap`
    /// snapshots for its namespace
    pub fn create_capped(
        &mut self,
        state: &NamespaceState,
        description: impl Into<String>,
        namespace_cap: Option<u32>,
    ) -> SnapshotId {
        let id = SnapshotId(self.next_id);
        self.next_id += 1;
        let namespace = state.namespace();
        self.snapshots.push_back(Snapshot::capture(id, state, description));

        if let Some(cap) = namespace_cap {
            let cap = (cap as usize).max(1);
            while self.count_for(namespace) > cap {
                let Some(index) = self.snapshots.iter().position(|s| s.namespace == namespace) else {
                    break;
                };
                if let Some(evicted) = self.snapshots.remove(index) {
                    log::debug!("evicted {} ({} over its snapshot cap)", evicted.id, namespace);
                }
            }
        }
        while self.snapshots.len() > self.max_snapshots {
            if let Some(evicted) = self.snapshots.pop_front() {
                log::debug!("evicted {} (manager holds {})", evicted.id, self.max_snapshots);
            }
        }
        id
    }

    /// Get a snapshot by ID
    pub fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    /// Remove a snapshot
    pub fn remove(&mut self, id: SnapshotId) -> Option<Snapshot> {
        let index = self.snapshots.iter().position(|s| s.id == id)?;
        self.snapshots.remove(index)
    }

    /// Most recent snapshot of a namespace
    pub fn latest_for(&self, namespace: NamespaceId) -> Option<&Snapshot> {
        self.snapshots.iter().rev().find(|s| s.namespace == namespace)
    }

    pub fn count_for(&self, namespace: NamespaceId) -> usize {
        self.snapshots.iter().filter(|s| s.namespace == namespace).count()
    }

    /// Snapshot ids, oldest first
    pub fn ids(&self) -> impl Iterator<Item = SnapshotId> + '_ {
        self.snapshots.iter().map(|s| s.id)
    }

    /// Get the number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Clear all snapshots
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Patches turning one capture of a namespace into another
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDelta {
    namespace: NamespaceId,
    from: Option<SnapshotId>,
    to: Option<SnapshotId>,
    patches: PatchBatch,
}

impl SnapshotDelta {
    /// Diff two snapshots of the same namespace
    pub fn compute(before: &Snapshot, after: &Snapshot) -> Option<Self> {
        if before.namespace != after.namespace {
            return None;
        }
        let mut delta = Self::diff(
            before.namespace,
            (&before.entities, &before.layers),
            (&after.entities, &after.layers),
        );
        delta.from = Some(before.id);
        delta.to = Some(after.id);
        Some(delta)
    }

    /// Diff two live states of the same namespace
    pub fn between(before: &NamespaceState, after: &NamespaceState) -> Option<Self> {
        if before.namespace() != after.namespace() {
            return None;
        }
        Some(Self::diff(
            before.namespace(),
            (before.entity_map(), before.layer_map()),
            (after.entity_map(), after.layer_map()),
        ))
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn from(&self) -> Option<SnapshotId> {
        self.from
    }

    pub fn to(&self) -> Option<SnapshotId> {
        self.to
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Batch that reproduces the later state when applied to the earlier one
    pub fn to_patches(&self) -> PatchBatch {
        self.patches.clone()
    }

    // ========================================================================
    // Diffing
    // ========================================================================

    // Emission order keeps every patch applicable to the intermediate state:
    // layers appear before anything is assigned to them, entities exist
    // before their components and parents, all re-parented entities are
    // detached before any is attached (no transient cycles), and layers go
    // away last.
    fn diff(
        namespace: NamespaceId,
        (before, before_layers): (&BTreeMap<u64, EntityRecord>, &BTreeMap<u32, LayerRecord>),
        (after, after_layers): (&BTreeMap<u64, EntityRecord>, &BTreeMap<u32, LayerRecord>),
    ) -> Self {
        let entity = |id: u64| EntityRef::new(namespace, id);
        let mut patches = PatchBatch::new();

        for (id, layer) in after_layers {
            match before_layers.get(id) {
                None => patches.push(layer_patch(*id, LayerOp::Create, layer)),
                Some(old) if old != layer => patches.push(layer_patch(*id, LayerOp::Update, layer)),
                Some(_) => {}
            }
        }

        for id in before.keys().filter(|id| !after.contains_key(id)) {
            patches.push(Patch::destroy_entity(entity(*id)));
        }
        for (id, record) in after.iter().filter(|(id, _)| !before.contains_key(id)) {
            patches.push(Patch::create_entity(entity(*id), record.name.clone()));
        }
        for (id, record) in after {
            if let Some(old) = before.get(id) {
                if old.name != record.name {
                    patches.push(Patch::rename_entity(entity(*id), record.name.clone()));
                }
            }
        }

        let mut removals = Vec::new();
        let mut writes = Vec::new();
        for (id, record) in after {
            let old_components = before.get(id).map(|r| &r.components);
            for (name, value) in &record.components {
                match old_components.and_then(|c| c.get(name)) {
                    None => writes.push(Patch::add_component(entity(*id), name.clone(), value.clone())),
                    Some(old) if old == value => {}
                    Some(old) => match component_update(old, value) {
                        ComponentUpdate::Fields(fields) => {
                            writes.extend(fields.into_iter().map(|(field, v)| {
                                Patch::set_field(entity(*id), name.clone(), field, v)
                            }));
                        }
                        ComponentUpdate::Whole => {
                            writes.push(Patch::set_field(entity(*id), name.clone(), "", value.clone()))
                        }
                        ComponentUpdate::Replace => {
                            removals.push(Patch::remove_component(entity(*id), name.clone()));
                            writes.push(Patch::add_component(entity(*id), name.clone(), value.clone()));
                        }
                    },
                }
            }
            if let Some(old_components) = old_components {
                for name in old_components.keys().filter(|n| !record.components.contains_key(*n)) {
                    removals.push(Patch::remove_component(entity(*id), name.clone()));
                }
            }
        }
        patches.extend(removals);
        patches.extend(writes);

        let mut attach = Vec::new();
        for (id, record) in after {
            let old = before.get(id);
            let old_parent = old.and_then(|r| r.parent);
            if old_parent != record.parent {
                if old_parent.is_some() {
                    patches.push(Patch::detach(entity(*id)));
                }
                if let Some(parent) = record.parent {
                    attach.push(Patch::set_parent(entity(*id), parent));
                }
            }
            if old.map_or(0, |r| r.sibling_index) != record.sibling_index {
                attach.push(Patch::reorder(entity(*id), record.sibling_index));
            }
        }
        patches.extend(attach);

        for (id, record) in after {
            let old_layer = before.get(id).and_then(|r| r.layer);
            match (old_layer, record.layer) {
                (old, Some(layer)) if old != Some(layer) => {
                    patches.push(Patch::assign_layer(layer, entity(*id)))
                }
                (Some(layer), None) => patches.push(Patch::unassign_layer(layer, entity(*id))),
                _ => {}
            }
        }

        for id in before_layers.keys().filter(|id| !after_layers.contains_key(id)) {
            patches.push(Patch::destroy_layer(*id));
        }

        Self {
            namespace,
            from: None,
            to: None,
            patches,
        }
    }
}

fn layer_patch(layer_id: u32, op: LayerOp, layer: &LayerRecord) -> Patch {
    Patch::Layer(LayerPatch {
        layer_id,
        op,
        name: layer.name.clone(),
        order: layer.order,
        visible: layer.visible,
        entity: None,
    })
}

enum ComponentUpdate {
    /// Per-key writes of changed or added top-level fields
    Fields(Vec<(String, Value)>),
    /// One empty-path write replacing the value
    Whole,
    /// Remove then re-add
    Replace,
}

fn component_update(old: &Value, new: &Value) -> ComponentUpdate {
    match (old.as_object(), new.as_object()) {
        (Some(old), Some(new)) => {
            // A dropped key cannot be expressed as a field write, and dotted
            // keys would be read as paths
            let expressible = old.keys().all(|k| new.contains_key(k))
                && new.keys().all(|k| !k.is_empty() && !k.contains('.'));
            if !expressible {
                return ComponentUpdate::Replace;
            }
            ComponentUpdate::Fields(
                new.iter()
                    .filter(|(k, v)| old.get(*k) != Some(*v))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        }
        _ => ComponentUpdate::Whole,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::TransformProperty;

    fn ns() -> NamespaceId {
        NamespaceId::from_raw(0)
    }

    fn entity(id: u64) -> EntityRef {
        EntityRef::new(ns(), id)
    }

    fn apply(state: &mut NamespaceState, patches: &[Patch]) {
        for patch in patches {
            state.apply(patch).unwrap();
        }
    }

    fn populated() -> NamespaceState {
        let mut state = NamespaceState::new(ns());
        apply(
            &mut state,
            &[
                Patch::create_layer(1, "world", 0),
                Patch::create_entity(entity(1), "root"),
                Patch::create_entity(entity(2), "child"),
                Patch::set_parent(entity(2), entity(1)),
                Patch::add_component(
                    entity(2),
                    "Health",
                    [("hp", Value::from(10)), ("max", Value::from(10))].into_iter().collect(),
                ),
                Patch::assign_layer(1, entity(2)),
            ],
        );
        state
    }

    #[test]
    fn test_capture_is_deep_copy() {
        let mut state = populated();
        let mut manager = SnapshotManager::new(4);
        let id = manager.create(&state, "before");

        state.apply(&Patch::destroy_entity(entity(2))).unwrap();
        let snapshot = manager.get(id).unwrap();
        assert_eq!(snapshot.entity_count(), 2);
        assert_eq!(snapshot.description(), "before");
        assert!(snapshot.entity(2).is_some());
    }

    #[test]
    fn test_manager_evicts_oldest() {
        let state = NamespaceState::new(ns());
        let mut manager = SnapshotManager::new(2);
        let id1 = manager.create(&state, "1");
        let id2 = manager.create(&state, "2");
        let id3 = manager.create(&state, "3");

        assert_eq!(manager.len(), 2);
        assert!(manager.get(id1).is_none());
        assert!(manager.get(id2).is_some());
        assert_eq!(manager.latest_for(ns()).map(Snapshot::id), Some(id3));
    }

    #[test]
    fn test_namespace_cap() {
        let a = NamespaceState::new(ns());
        let b = NamespaceState::new(NamespaceId::from_raw(1));
        let mut manager = SnapshotManager::new(10);
        let b1 = manager.create(&b, "b");
        manager.create_capped(&a, "a1", Some(1));
        let a2 = manager.create_capped(&a, "a2", Some(1));

        assert_eq!(manager.count_for(ns()), 1);
        assert_eq!(manager.latest_for(ns()).map(Snapshot::id), Some(a2));
        assert!(manager.get(b1).is_some());
    }

    #[test]
    fn test_delta_reproduces_and_inverts() {
        let mut manager = SnapshotManager::new(4);
        let mut state = populated();
        let s1 = manager.create(&state, "s1");

        apply(
            &mut state,
            &[
                Patch::set_field(entity(2), "Health", "hp", Value::from(4)),
                Patch::create_entity(entity(3), "new root"),
                Patch::detach(entity(2)),
                Patch::set_parent(entity(1), entity(3)),
                Patch::transform(entity(3), TransformProperty::Position, Value::Vec3([1.0, 0.0, 0.0])),
                Patch::unassign_layer(1, entity(2)),
                Patch::create_layer(2, "ui", 5),
                Patch::assign_layer(2, entity(3)),
                Patch::rename_entity(entity(1), "renamed"),
            ],
        );
        let s2 = manager.create(&state, "s2");

        let before = manager.get(s1).unwrap();
        let after = manager.get(s2).unwrap();

        let forward = SnapshotDelta::compute(before, after).unwrap();
        let mut replay = before.to_state();
        apply(&mut replay, forward.to_patches().patches());
        assert_eq!(replay, after.to_state());

        let inverse = SnapshotDelta::compute(after, before).unwrap();
        apply(&mut replay, inverse.to_patches().patches());
        assert_eq!(replay, before.to_state());
    }

    #[test]
    fn test_delta_swapping_parents() {
        let mut before = NamespaceState::new(ns());
        apply(
            &mut before,
            &[
                Patch::create_entity(entity(1), "a"),
                Patch::create_entity(entity(2), "b"),
                Patch::set_parent(entity(2), entity(1)),
            ],
        );
        let mut after = before.clone();
        apply(&mut after, &[Patch::detach(entity(2)), Patch::set_parent(entity(1), entity(2))]);

        let delta = SnapshotDelta::between(&before, &after).unwrap();
        let mut replay = before.clone();
        apply(&mut replay, delta.to_patches().patches());
        assert_eq!(replay, after);
    }

    #[test]
    fn test_delta_dropped_field_replaces_component() {
        let mut before = NamespaceState::new(ns());
        let full: Value = [("a", 1), ("b", 2)].into_iter().collect();
        apply(&mut before, &[Patch::add_component(entity(1), "C", full)]);
        let mut after = NamespaceState::new(ns());
        let reduced: Value = [("a", 1)].into_iter().collect();
        apply(&mut after, &[Patch::add_component(entity(1), "C", reduced)]);

        let delta = SnapshotDelta::between(&before, &after).unwrap();
        assert_eq!(delta.len(), 2);
        let mut replay = before.clone();
        apply(&mut replay, delta.to_patches().patches());
        assert_eq!(replay, after);
    }

    #[test]
    fn test_delta_rejects_other_namespace() {
        let a = NamespaceState::new(ns());
        let b = NamespaceState::new(NamespaceId::from_raw(1));
        assert!(SnapshotDelta::between(&a, &b).is_none());
        assert!(SnapshotDelta::between(&a, &a).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let state = populated();
        let mut manager = SnapshotManager::default();
        let id = manager.create(&state, "wire");
        let snapshot = manager.get(id).unwrap();
        assert_eq!(Snapshot::from_bytes(&snapshot.to_bytes()).as_ref(), Some(snapshot));
    }
}
