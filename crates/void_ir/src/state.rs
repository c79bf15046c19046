//! In-memory namespace state
//!
//! The reference store that committed patches are applied to. Each
//! namespace owns a [`NamespaceState`]: entity records with their
//! components, parent link, sibling index and layer, plus layer records.
//! Snapshots capture and restore exactly this state.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::StateError;
use crate::namespace::{NamespaceId, ResourceUsage};
use crate::patch::{
    AssetOp, ComponentOp, EntityOp, EntityRef, HierarchyOp, LayerOp, Patch, CAMERA_COMPONENT,
    TRANSFORM_COMPONENT,
};
use crate::snapshot::Snapshot;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed per-entity bookkeeping counted towards memory usage
const ENTITY_OVERHEAD_BYTES: u64 = 64;

/// One entity and its components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub components: BTreeMap<String, Value>,
    pub parent: Option<EntityRef>,
    pub sibling_index: u32,
    pub layer: Option<u32>,
}

impl EntityRecord {
    fn memory_bytes(&self) -> u64 {
        let components: usize = self
            .components
            .iter()
            .map(|(name, value)| name.len() + value.estimated_size())
            .sum();
        ENTITY_OVERHEAD_BYTES + (self.name.len() + components) as u64
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_str(&self.name);
        w.write_u32(self.components.len() as u32);
        for (name, value) in &self.components {
            w.write_str(name);
            value.encode(w);
        }
        w.write_option(self.parent.as_ref(), |w, p| p.encode(w));
        w.write_u32(self.sibling_index);
        w.write_option(self.layer.as_ref(), |w, l| w.write_u32(*l));
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            name: r.read_string()?,
            components: r
                .read_seq(|r| Some((r.read_string()?, Value::decode(r)?)))?
                .into_iter()
                .collect(),
            parent: r.read_option(EntityRef::decode)?,
            sibling_index: r.read_u32()?,
            layer: r.read_option(ByteReader::read_u32)?,
        })
    }
}

/// A composition layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub name: String,
    pub order: i32,
    pub visible: bool,
}

impl LayerRecord {
    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_str(&self.name);
        w.write_i32(self.order);
        w.write_bool(self.visible);
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            name: r.read_string()?,
            order: r.read_i32()?,
            visible: r.read_bool()?,
        })
    }
}

/// Observable state of one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceState {
    namespace: NamespaceId,
    entities: BTreeMap<u64, EntityRecord>,
    layers: BTreeMap<u32, LayerRecord>,
}

impl NamespaceState {
    /// Empty state for a namespace
    pub fn new(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            entities: BTreeMap::new(),
            layers: BTreeMap::new(),
        }
    }

    /// Rebuild the state a snapshot captured
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            namespace: snapshot.namespace,
            entities: snapshot.entities.clone(),
            layers: snapshot.layers.clone(),
        }
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn entity(&self, entity_id: u64) -> Option<&EntityRecord> {
        self.entities.get(&entity_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&u64, &EntityRecord)> {
        self.entities.iter()
    }

    pub fn layer(&self, layer_id: u32) -> Option<&LayerRecord> {
        self.layers.get(&layer_id)
    }

    pub fn layers(&self) -> impl Iterator<Item = (&u32, &LayerRecord)> {
        self.layers.iter()
    }

    /// Value of a component, if attached
    pub fn component(&self, entity_id: u64, component: &str) -> Option<&Value> {
        self.entities.get(&entity_id)?.components.get(component)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn component_count(&self) -> usize {
        self.entities.values().map(|e| e.components.len()).sum()
    }

    /// Component count of the fullest entity
    pub fn max_components_per_entity(&self) -> usize {
        self.entities.values().map(|e| e.components.len()).max().unwrap_or(0)
    }

    /// Estimated memory held by this state
    pub fn memory_bytes(&self) -> u64 {
        self.entities.values().map(EntityRecord::memory_bytes).sum()
    }

    /// Usage counters derived from the state; transaction and snapshot
    /// counts are carried over from `previous`
    pub fn usage(&self, previous: &ResourceUsage) -> ResourceUsage {
        ResourceUsage {
            entity_count: self.entity_count() as u32,
            component_count: self.component_count() as u32,
            memory_bytes: self.memory_bytes(),
            ..*previous
        }
    }

    pub(crate) fn entity_map(&self) -> &BTreeMap<u64, EntityRecord> {
        &self.entities
    }

    pub(crate) fn layer_map(&self) -> &BTreeMap<u32, LayerRecord> {
        &self.layers
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.namespace.raw());
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

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            namespace: NamespaceId::from_raw(r.read_u32()?),
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

    /// Replace the whole state with a snapshot's capture
    pub fn restore(&mut self, snapshot: &Snapshot) {
        *self = Self::from_snapshot(snapshot);
    }

    fn local_id(&self, entity: EntityRef) -> Result<u64, StateError> {
        if entity.namespace != self.namespace {
            return Err(StateError::ForeignEntity {
                entity,
                expected: self.namespace,
            });
        }
        Ok(entity.entity_id)
    }

    fn existing(&mut self, entity: EntityRef) -> Result<&mut EntityRecord, StateError> {
        let id = self.local_id(entity)?;
        self.entities.get_mut(&id).ok_or(StateError::EntityNotFound(entity))
    }

    /// Write `value` at `path` inside a component, creating the entity and
    /// an empty object component when missing
    fn write_field(
        &mut self,
        entity: EntityRef,
        component: &str,
        path: &str,
        value: Value,
    ) -> Result<(), StateError> {
        let id = self.local_id(entity)?;
        let mut target = self
            .component(id, component)
            .cloned()
            .unwrap_or_else(Value::object);
        if !target.set_path(path, value) {
            return Err(StateError::InvalidFieldPath {
                entity,
                component: component.to_string(),
                path: path.to_string(),
            });
        }
        self.entities
            .entry(id)
            .or_default()
            .components
            .insert(component.to_string(), target);
        Ok(())
    }

    /// Apply one patch. On error the state is unchanged.
    pub fn apply(&mut self, patch: &Patch) -> Result<(), StateError> {
        match patch {
            Patch::Entity(p) => {
                let id = self.local_id(p.entity)?;
                match p.op {
                    EntityOp::Create => {
                        if self.entities.contains_key(&id) {
                            return Err(StateError::EntityExists(p.entity));
                        }
                        self.entities.insert(
                            id,
                            EntityRecord {
                                name: p.name.clone(),
                                ..Default::default()
                            },
                        );
                    }
                    EntityOp::Destroy => {
                        if self.entities.remove(&id).is_none() {
                            return Err(StateError::EntityNotFound(p.entity));
                        }
                        for child in self.entities.values_mut() {
                            if child.parent == Some(p.entity) {
                                child.parent = None;
                            }
                        }
                    }
                    EntityOp::Rename => self.existing(p.entity)?.name = p.name.clone(),
                }
            }

            Patch::Component(p) => {
                let id = self.local_id(p.entity)?;
                match p.op {
                    ComponentOp::Add => {
                        let record = self.entities.entry(id).or_default();
                        if record.components.contains_key(&p.component) {
                            return Err(StateError::ComponentExists {
                                entity: p.entity,
                                component: p.component.clone(),
                            });
                        }
                        record.components.insert(p.component.clone(), p.value.clone());
                    }
                    ComponentOp::Remove => {
                        let record = self.existing(p.entity)?;
                        if record.components.remove(&p.component).is_none() {
                            return Err(StateError::ComponentNotFound {
                                entity: p.entity,
                                component: p.component.clone(),
                            });
                        }
                    }
                    ComponentOp::SetField => {
                        let record = self.existing(p.entity)?;
                        let target = record.components.get_mut(&p.component).ok_or_else(|| {
                            StateError::ComponentNotFound {
                                entity: p.entity,
                                component: p.component.clone(),
                            }
                        })?;
                        if !target.apply_field(&p.field_path, p.value.clone()) {
                            return Err(StateError::InvalidFieldPath {
                                entity: p.entity,
                                component: p.component.clone(),
                                path: p.field_path.clone(),
                            });
                        }
                    }
                }
            }

            Patch::Transform(p) => {
                self.write_field(p.entity, TRANSFORM_COMPONENT, p.property.field_name(), p.value.clone())?
            }
            Patch::Camera(p) => {
                self.write_field(p.entity, CAMERA_COMPONENT, p.property.field_name(), p.value.clone())?
            }

            Patch::Asset(p) => match p.op {
                AssetOp::Load => {
                    self.write_field(p.entity, &p.component, &p.field, Value::AssetRef(p.asset.clone()))?
                }
                AssetOp::Unload => self.write_field(p.entity, &p.component, &p.field, Value::Null)?,
                AssetOp::Reload => {
                    self.local_id(p.entity)?;
                }
            },

            Patch::Custom(p) => {
                let id = self.local_id(p.entity)?;
                self.entities
                    .entry(id)
                    .or_default()
                    .components
                    .insert(p.type_name.clone(), p.data.clone());
            }

            Patch::Hierarchy(p) => {
                self.local_id(p.entity)?;
                match p.op {
                    HierarchyOp::SetParent => {
                        let parent = p.parent.ok_or(StateError::MissingOperand("parent"))?;
                        self.check_parent(p.entity, parent)?;
                        self.existing(p.entity)?.parent = Some(parent);
                    }
                    HierarchyOp::Detach => self.existing(p.entity)?.parent = None,
                    HierarchyOp::Reorder => self.existing(p.entity)?.sibling_index = p.sibling_index,
                }
            }

            Patch::Layer(p) => match p.op {
                LayerOp::Create => {
                    if self.layers.contains_key(&p.layer_id) {
                        return Err(StateError::LayerExists(p.layer_id));
                    }
                    self.layers.insert(
                        p.layer_id,
                        LayerRecord {
                            name: p.name.clone(),
                            order: p.order,
                            visible: p.visible,
                        },
                    );
                }
                LayerOp::Update => {
                    let layer = self
                        .layers
                        .get_mut(&p.layer_id)
                        .ok_or(StateError::LayerNotFound(p.layer_id))?;
                    layer.name = p.name.clone();
                    layer.order = p.order;
                    layer.visible = p.visible;
                }
                LayerOp::Destroy => {
                    if self.layers.remove(&p.layer_id).is_none() {
                        return Err(StateError::LayerNotFound(p.layer_id));
                    }
                    for record in self.entities.values_mut() {
                        if record.layer == Some(p.layer_id) {
                            record.layer = None;
                        }
                    }
                }
                LayerOp::AssignEntity | LayerOp::UnassignEntity => {
                    let entity = p.entity.ok_or(StateError::MissingOperand("entity"))?;
                    if !self.layers.contains_key(&p.layer_id) {
                        return Err(StateError::LayerNotFound(p.layer_id));
                    }
                    let record = self.existing(entity)?;
                    if p.op == LayerOp::AssignEntity {
                        record.layer = Some(p.layer_id);
                    } else if record.layer == Some(p.layer_id) {
                        record.layer = None;
                    }
                }
            },
        }
        Ok(())
    }

    /// A local parent must exist and must not be the entity or one of its
    /// descendants. Foreign parents are plain references.
    fn check_parent(&self, entity: EntityRef, parent: EntityRef) -> Result<(), StateError> {
        if parent.namespace != self.namespace {
            return Ok(());
        }
        if !self.entities.contains_key(&parent.entity_id) {
            return Err(StateError::EntityNotFound(parent));
        }
        let mut cursor = Some(parent);
        // Bounded walk; a well-formed forest is at most `len` deep
        for _ in 0..=self.entities.len() {
            let Some(current) = cursor else {
                return Ok(());
            };
            if current == entity {
                return Err(StateError::HierarchyCycle { entity, parent });
            }
            if current.namespace != self.namespace {
                return Ok(());
            }
            cursor = self.entities.get(&current.entity_id).and_then(|r| r.parent);
        }
        Err(StateError::HierarchyCycle { entity, parent })
    }

    /// Apply patches in order, stopping at the first failure. Returns the
    /// index of the failing patch with its error.
    pub fn apply_all<'a, I>(&mut self, patches: I) -> Result<usize, (usize, StateError)>
    where
        I: IntoIterator<Item = &'a Patch>,
    {
        let mut applied = 0;
        for (index, patch) in patches.into_iter().enumerate() {
            self.apply(patch).map_err(|err| (index, err))?;
            applied += 1;
        }
        Ok(applied)
    }
}

/// State of every namespace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateStore {
    namespaces: BTreeMap<NamespaceId, NamespaceState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: NamespaceId) -> Option<&NamespaceState> {
        self.namespaces.get(&namespace)
    }

    /// State of a namespace, created empty on first use
    pub fn namespace_mut(&mut self, namespace: NamespaceId) -> &mut NamespaceState {
        self.namespaces
            .entry(namespace)
            .or_insert_with(|| NamespaceState::new(namespace))
    }

    /// Replace a namespace's state
    pub fn insert(&mut self, state: NamespaceState) -> Option<NamespaceState> {
        self.namespaces.insert(state.namespace(), state)
    }

    /// Apply a patch within a namespace
    pub fn apply(&mut self, namespace: NamespaceId, patch: &Patch) -> Result<(), StateError> {
        self.namespace_mut(namespace).apply(patch)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamespaceState> {
        self.namespaces.values()
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

    #[test]
    fn test_entity_lifecycle() {
        let mut state = NamespaceState::new(ns());
        state.apply(&Patch::create_entity(entity(1), "player")).unwrap();
        assert_eq!(
            state.apply(&Patch::create_entity(entity(1), "again")),
            Err(StateError::EntityExists(entity(1)))
        );
        state.apply(&Patch::rename_entity(entity(1), "hero")).unwrap();
        assert_eq!(state.entity(1).map(|e| e.name.as_str()), Some("hero"));
        state.apply(&Patch::destroy_entity(entity(1))).unwrap();
        assert_eq!(
            state.apply(&Patch::destroy_entity(entity(1))),
            Err(StateError::EntityNotFound(entity(1)))
        );
    }

    #[test]
    fn test_component_add_creates_entity() {
        let mut state = NamespaceState::new(ns());
        let value: Value = [("position", Value::Vec3([0.0; 3]))].into_iter().collect();
        state.apply(&Patch::add_component(entity(4), "Transform", value)).unwrap();
        state
            .apply(&Patch::set_field(entity(4), "Transform", "position", Value::Vec3([1.0, 2.0, 3.0])))
            .unwrap();
        assert_eq!(state.entity_count(), 1);
        assert_eq!(state.component_count(), 1);
        assert_eq!(
            state.component(4, "Transform").and_then(|t| t.get("position")),
            Some(&Value::Vec3([1.0, 2.0, 3.0]))
        );
    }

    #[test]
    fn test_failed_patch_leaves_state_unchanged() {
        let mut state = NamespaceState::new(ns());
        state.apply(&Patch::add_component(entity(1), "Speed", Value::from(3))).unwrap();
        let before = state.clone();

        assert!(state.apply(&Patch::add_component(entity(1), "Speed", Value::Null)).is_err());
        assert!(state.apply(&Patch::set_field(entity(1), "Speed", "max", Value::from(1))).is_err());
        assert!(state.apply(&Patch::set_field(entity(2), "Speed", "max", Value::from(1))).is_err());
        assert!(state.apply(&Patch::rename_entity(entity(3), "ghost")).is_err());
        assert_eq!(state, before);

        state
            .apply(&Patch::transform(entity(1), TransformProperty::Scale, Value::from(2.0)))
            .unwrap();
        assert_eq!(
            state.component(1, TRANSFORM_COMPONENT).and_then(|t| t.get("scale")),
            Some(&Value::from(2.0))
        );
    }

    #[test]
    fn test_foreign_entity_rejected() {
        let mut state = NamespaceState::new(ns());
        let foreign = EntityRef::new(NamespaceId::from_raw(9), 1);
        assert!(matches!(
            state.apply(&Patch::create_entity(foreign, "x")),
            Err(StateError::ForeignEntity { .. })
        ));
    }

    #[test]
    fn test_hierarchy_cycle_and_destroy_detaches() {
        let mut state = NamespaceState::new(ns());
        for id in 1..=3 {
            state.apply(&Patch::create_entity(entity(id), "n")).unwrap();
        }
        state.apply(&Patch::set_parent(entity(2), entity(1))).unwrap();
        state.apply(&Patch::set_parent(entity(3), entity(2))).unwrap();
        assert!(matches!(
            state.apply(&Patch::set_parent(entity(1), entity(3))),
            Err(StateError::HierarchyCycle { .. })
        ));
        assert!(matches!(
            state.apply(&Patch::set_parent(entity(1), entity(1))),
            Err(StateError::HierarchyCycle { .. })
        ));

        state.apply(&Patch::destroy_entity(entity(2))).unwrap();
        assert_eq!(state.entity(3).and_then(|e| e.parent), None);
    }

    #[test]
    fn test_layers() {
        let mut state = NamespaceState::new(ns());
        state.apply(&Patch::create_entity(entity(1), "a")).unwrap();
        assert_eq!(
            state.apply(&Patch::assign_layer(5, entity(1))),
            Err(StateError::LayerNotFound(5))
        );
        state.apply(&Patch::create_layer(5, "world", 0)).unwrap();
        state.apply(&Patch::assign_layer(5, entity(1))).unwrap();
        assert_eq!(state.entity(1).and_then(|e| e.layer), Some(5));
        state.apply(&Patch::update_layer(5, "world", 2, false)).unwrap();
        assert_eq!(state.layer(5).map(|l| l.order), Some(2));
        state.apply(&Patch::destroy_layer(5)).unwrap();
        assert_eq!(state.entity(1).and_then(|e| e.layer), None);
    }

    #[test]
    fn test_apply_all_reports_index() {
        let mut state = NamespaceState::new(ns());
        let patches = [
            Patch::create_entity(entity(1), "a"),
            Patch::create_entity(entity(2), "b"),
            Patch::create_entity(entity(1), "dup"),
        ];
        let (index, err) = state.apply_all(&patches).unwrap_err();
        assert_eq!(index, 2);
        assert_eq!(err, StateError::EntityExists(entity(1)));
    }

    #[test]
    fn test_usage_counters() {
        let mut store = StateStore::new();
        store.apply(ns(), &Patch::add_component(entity(1), "A", Value::Null)).unwrap();
        store.apply(ns(), &Patch::add_component(entity(1), "B", Value::Null)).unwrap();
        let previous = ResourceUsage {
            pending_transactions: 2,
            ..Default::default()
        };
        let usage = store.get(ns()).unwrap().usage(&previous);
        assert_eq!(usage.entity_count, 1);
        assert_eq!(usage.component_count, 2);
        assert_eq!(usage.pending_transactions, 2);
        assert!(usage.memory_bytes > 0);
    }
}
