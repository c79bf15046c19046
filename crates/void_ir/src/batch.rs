//! Patch batching and optimization
//!
//! This module provides utilities for batching and optimizing patches:
//! - Merge adjacent writes to the same target (the later one wins)
//! - Eliminate contradictions (create immediately followed by destroy)
//! - Coalesce field writes on one component into a single object write
//! - Reorder patches by entity for application locality
//! - Drop writes that would not change the resolved value
//!
//! Every rewrite preserves the final state produced by applying the batch
//! in order, so optimizing a batch that applies cleanly never changes what
//! it does.

use crate::codec::{ByteReader, ByteWriter, WireFormat};
use crate::patch::{
    AssetOp, ComponentOp, ComponentPatch, EntityOp, EntityRef, HierarchyOp, LayerOp, Patch,
};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// An ordered group of patches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchBatch {
    patches: Vec<Patch>,
}

impl PatchBatch {
    /// Create a new empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a list of patches
    pub fn from_patches(patches: Vec<Patch>) -> Self {
        Self { patches }
    }

    /// Append a patch
    pub fn push(&mut self, patch: Patch) {
        self.patches.push(patch);
    }

    /// Get the patches
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Take the patches out of the batch
    pub fn into_patches(self) -> Vec<Patch> {
        self.patches
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.patches.iter()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_seq(&self.patches, |w, patch| patch.encode(w));
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        r.read_seq(Patch::decode).map(Self::from_patches)
    }
}

impl FromIterator<Patch> for PatchBatch {
    fn from_iter<I: IntoIterator<Item = Patch>>(iter: I) -> Self {
        Self::from_patches(iter.into_iter().collect())
    }
}

impl Extend<Patch> for PatchBatch {
    fn extend<I: IntoIterator<Item = Patch>>(&mut self, iter: I) {
        self.patches.extend(iter);
    }
}

impl IntoIterator for PatchBatch {
    type Item = Patch;
    type IntoIter = std::vec::IntoIter<Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.patches.into_iter()
    }
}

impl<'a> IntoIterator for &'a PatchBatch {
    type Item = &'a Patch;
    type IntoIter = std::slice::Iter<'a, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.patches.iter()
    }
}

impl WireFormat for PatchBatch {
    const MAGIC: [u8; 4] = *b"BATC";

    fn encode_payload(&self, w: &mut ByteWriter) {
        self.encode(w);
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        Self::decode(r)
    }
}

// ============================================================================
// Optimizer
// ============================================================================

/// Which rewrites the optimizer performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    /// Collapse adjacent writes to the same target + field
    pub merge_consecutive: bool,
    /// Cancel a create immediately followed by a destroy of the same entity
    pub eliminate_contradictions: bool,
    /// Union top-level field writes on one component into one write
    pub coalesce_field_patches: bool,
    /// Stable-sort runs of independent patches by entity
    pub sort_for_efficiency: bool,
    /// Drop writes of an already-resolved value
    pub remove_redundant: bool,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            merge_consecutive: true,
            eliminate_contradictions: true,
            coalesce_field_patches: true,
            sort_for_efficiency: true,
            remove_redundant: true,
        }
    }
}

impl OptimizerOptions {
    /// Every rewrite disabled
    pub fn none() -> Self {
        Self {
            merge_consecutive: false,
            eliminate_contradictions: false,
            coalesce_field_patches: false,
            sort_for_efficiency: false,
            remove_redundant: false,
        }
    }
}

/// Statistics about one optimization run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationStats {
    /// Patches before optimization
    pub original_count: usize,
    /// Patches after optimization
    pub optimized_count: usize,
    /// Patches folded into a neighbour
    pub merged_count: usize,
    /// Patches dropped as contradictory or redundant
    pub eliminated_count: usize,
    /// Patches that changed position
    pub reordered_count: usize,
}

impl OptimizationStats {
    /// Percentage of patches removed
    pub fn reduction_percent(&self) -> f64 {
        if self.original_count == 0 {
            return 0.0;
        }
        100.0 * (1.0 - self.optimized_count as f64 / self.original_count as f64)
    }
}

/// Rewrites batches according to its [`OptimizerOptions`]
#[derive(Debug, Clone, Default)]
pub struct BatchOptimizer {
    options: OptimizerOptions,
}

impl BatchOptimizer {
    /// Create an optimizer with the given options
    pub fn new(options: OptimizerOptions) -> Self {
        Self { options }
    }

    /// Disable all optimizations
    pub fn disabled() -> Self {
        Self::new(OptimizerOptions::none())
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    /// Optimize a batch
    pub fn optimize(&self, batch: &PatchBatch) -> PatchBatch {
        self.optimize_with_stats(batch).0
    }

    /// Optimize a batch, reporting what changed.
    ///
    /// Passes repeat until none of them changes the batch, which makes the
    /// result a fixpoint: optimizing it again is a no-op.
    pub fn optimize_with_stats(&self, batch: &PatchBatch) -> (PatchBatch, OptimizationStats) {
        let mut stats = OptimizationStats {
            original_count: batch.len(),
            ..Default::default()
        };
        let mut patches = batch.patches.clone();

        loop {
            let mut changed = false;
            if self.options.merge_consecutive {
                changed |= merge_consecutive(&mut patches, &mut stats);
            }
            if self.options.eliminate_contradictions {
                changed |= eliminate_contradictions(&mut patches, &mut stats);
            }
            if self.options.coalesce_field_patches {
                changed |= coalesce_field_patches(&mut patches, &mut stats);
            }
            if self.options.remove_redundant {
                changed |= remove_redundant(&mut patches, &mut stats);
            }
            if self.options.sort_for_efficiency {
                changed |= sort_for_efficiency(&mut patches, &mut stats);
            }
            if !changed {
                break;
            }
        }

        stats.optimized_count = patches.len();
        (PatchBatch::from_patches(patches), stats)
    }
}

/// Fold `next` into `prev` when applying the fold is equivalent to
/// applying both in order
fn try_merge(prev: &Patch, next: &Patch) -> Option<Patch> {
    match (prev, next) {
        (Patch::Component(a), Patch::Component(b))
            if a.entity == b.entity && a.component == b.component =>
        {
            match (a.op, b.op) {
                (ComponentOp::Add, ComponentOp::SetField) => {
                    let mut value = a.value.clone();
                    value
                        .apply_field(&b.field_path, b.value.clone())
                        .then(|| Patch::add_component(a.entity, a.component.clone(), value))
                }
                (ComponentOp::SetField, ComponentOp::SetField) if a.field_path == b.field_path => {
                    let value = if !a.field_path.is_empty() || !b.value.is_object() {
                        b.value.clone()
                    } else if a.value.is_object() {
                        let mut union = a.value.clone();
                        union.apply_field("", b.value.clone());
                        union
                    } else {
                        // A replacement followed by a merge has no single-patch form
                        return None;
                    };
                    Some(Patch::set_field(b.entity, b.component.clone(), b.field_path.clone(), value))
                }
                _ => None,
            }
        }
        (Patch::Transform(a), Patch::Transform(b)) if a.entity == b.entity && a.property == b.property => {
            Some(next.clone())
        }
        (Patch::Camera(a), Patch::Camera(b)) if a.entity == b.entity && a.property == b.property => {
            Some(next.clone())
        }
        (Patch::Entity(a), Patch::Entity(b))
            if a.entity == b.entity && a.op == EntityOp::Rename && b.op == EntityOp::Rename =>
        {
            Some(next.clone())
        }
        (Patch::Custom(a), Patch::Custom(b)) if a.entity == b.entity && a.type_name == b.type_name => {
            Some(next.clone())
        }
        _ => None,
    }
}

fn merge_consecutive(patches: &mut Vec<Patch>, stats: &mut OptimizationStats) -> bool {
    let mut out: Vec<Patch> = Vec::with_capacity(patches.len());
    let mut merged = 0;
    for patch in patches.drain(..) {
        match out.last().and_then(|prev| try_merge(prev, &patch)) {
            Some(folded) => {
                if let Some(last) = out.last_mut() {
                    *last = folded;
                }
                merged += 1;
            }
            None => out.push(patch),
        }
    }
    *patches = out;
    stats.merged_count += merged;
    merged > 0
}

fn is_create_then_destroy(prev: &Patch, next: &Patch) -> bool {
    matches!(
        (prev, next),
        (Patch::Entity(a), Patch::Entity(b))
            if a.entity == b.entity && a.op == EntityOp::Create && b.op == EntityOp::Destroy
    )
}

fn eliminate_contradictions(patches: &mut Vec<Patch>, stats: &mut OptimizationStats) -> bool {
    let mut out: Vec<Patch> = Vec::with_capacity(patches.len());
    let mut eliminated = 0;
    for patch in patches.drain(..) {
        if out.last().map_or(false, |prev| is_create_then_destroy(prev, &patch)) {
            out.pop();
            eliminated += 2;
        } else {
            out.push(patch);
        }
    }
    *patches = out;
    stats.eliminated_count += eliminated;
    eliminated > 0
}

/// Field writes that can be expressed as part of a top-level object merge
fn coalescable_fields(patch: &ComponentPatch) -> Option<BTreeMap<String, Value>> {
    if patch.op != ComponentOp::SetField {
        return None;
    }
    if patch.field_path.is_empty() {
        return patch.value.as_object().cloned();
    }
    if patch.field_path.contains('.') {
        return None;
    }
    Some(BTreeMap::from([(patch.field_path.clone(), patch.value.clone())]))
}

/// Component a non-coalescable patch may write, for closing open groups
enum Touch<'a> {
    Nothing,
    Component(EntityRef, &'a str),
    Entity(EntityRef),
}

fn touch_of(patch: &Patch) -> Touch<'_> {
    match patch {
        Patch::Entity(p) => Touch::Entity(p.entity),
        Patch::Layer(_) | Patch::Hierarchy(_) => Touch::Nothing,
        _ => match (patch.target_entity(), patch.component_type()) {
            (Some(entity), Some(component)) => Touch::Component(entity, component),
            _ => Touch::Nothing,
        },
    }
}

/// Folds field writes on one component into a single top-level merge.
///
/// A merge replaces a non-object value where a keyed write would fail, so
/// writes only fold once the component is known to hold an object: after an
/// object merge, or after a keyed write that succeeded.
fn coalesce_field_patches(patches: &mut Vec<Patch>, stats: &mut OptimizationStats) -> bool {
    struct Group {
        /// Position of the head patch, once a write follows the known object
        index: Option<usize>,
        fields: BTreeMap<String, Value>,
        members: usize,
    }

    let mut out: Vec<Patch> = Vec::with_capacity(patches.len());
    let mut open: HashMap<(EntityRef, String), Group> = HashMap::new();
    let mut closed: Vec<Group> = Vec::new();

    for patch in patches.drain(..) {
        if let Patch::Component(cp) = &patch {
            if let Some(fields) = coalescable_fields(cp) {
                let key = (cp.entity, cp.component.clone());
                match open.get_mut(&key) {
                    Some(group) if group.index.is_some() => {
                        group.fields.extend(fields);
                        group.members += 1;
                        continue;
                    }
                    Some(group) => {
                        *group = Group {
                            index: Some(out.len()),
                            fields,
                            members: 1,
                        };
                    }
                    None => {
                        let group = if cp.field_path.is_empty() {
                            Group {
                                index: Some(out.len()),
                                fields,
                                members: 1,
                            }
                        } else {
                            Group {
                                index: None,
                                fields: BTreeMap::new(),
                                members: 0,
                            }
                        };
                        open.insert(key, group);
                    }
                }
                out.push(patch);
                continue;
            }
        }

        match touch_of(&patch) {
            Touch::Nothing => {}
            Touch::Component(entity, component) => {
                if let Some(group) = open.remove(&(entity, component.to_string())) {
                    closed.push(group);
                }
            }
            Touch::Entity(entity) => {
                let keys: Vec<_> = open.keys().filter(|(e, _)| *e == entity).cloned().collect();
                for key in keys {
                    if let Some(group) = open.remove(&key) {
                        closed.push(group);
                    }
                }
            }
        }
        out.push(patch);
    }
    closed.extend(open.into_values());

    let mut merged = 0;
    for group in closed.into_iter().filter(|g| g.members > 1) {
        let Some(index) = group.index else {
            continue;
        };
        if let Some(Patch::Component(head)) = out.get_mut(index) {
            head.field_path.clear();
            head.value = Value::Object(group.fields);
            merged += group.members - 1;
        }
    }
    *patches = out;
    stats.merged_count += merged;
    merged > 0
}

/// Patches whose effect reaches beyond their own target entity. They pin
/// their position; only the runs between them are reordered.
fn is_sort_barrier(patch: &Patch) -> bool {
    match patch {
        Patch::Entity(p) => p.op == EntityOp::Destroy,
        Patch::Hierarchy(p) => p.op == HierarchyOp::SetParent,
        // Membership edits are per entity; every other layer op reaches the
        // whole layer, whatever entity it carries
        Patch::Layer(p) => {
            !matches!(p.op, LayerOp::AssignEntity | LayerOp::UnassignEntity) || p.entity.is_none()
        }
        _ => patch.target_entity().is_none(),
    }
}

fn sort_for_efficiency(patches: &mut Vec<Patch>, stats: &mut OptimizationStats) -> bool {
    fn flush(run: &mut Vec<(usize, Patch)>, out: &mut Vec<Patch>, moved: &mut usize) {
        run.sort_by_key(|(_, patch)| patch.target_entity());
        let base = out.len();
        for (position, (original, patch)) in run.drain(..).enumerate() {
            if original != base + position {
                *moved += 1;
            }
            out.push(patch);
        }
    }

    let mut out: Vec<Patch> = Vec::with_capacity(patches.len());
    let mut run: Vec<(usize, Patch)> = Vec::new();
    let mut moved = 0;
    for (index, patch) in patches.drain(..).enumerate() {
        if is_sort_barrier(&patch) {
            flush(&mut run, &mut out, &mut moved);
            out.push(patch);
        } else {
            run.push((index, patch));
        }
    }
    flush(&mut run, &mut out, &mut moved);
    *patches = out;
    stats.reordered_count += moved;
    moved > 0
}

/// A write into a field of a component that is created on demand
fn field_write(patch: &Patch) -> Option<(EntityRef, &str, &str, Value)> {
    match patch {
        Patch::Transform(p) => Some((p.entity, crate::patch::TRANSFORM_COMPONENT, p.property.field_name(), p.value.clone())),
        Patch::Camera(p) => Some((p.entity, crate::patch::CAMERA_COMPONENT, p.property.field_name(), p.value.clone())),
        Patch::Asset(p) => match p.op {
            AssetOp::Load => Some((p.entity, p.component.as_str(), p.field.as_str(), Value::AssetRef(p.asset.clone()))),
            AssetOp::Unload => Some((p.entity, p.component.as_str(), p.field.as_str(), Value::Null)),
            AssetOp::Reload => None,
        },
        _ => None,
    }
}

fn remove_redundant(patches: &mut Vec<Patch>, stats: &mut OptimizationStats) -> bool {
    // Fully known component values, as resolved at the current position
    let mut known: HashMap<(EntityRef, String), Value> = HashMap::new();
    let mut out: Vec<Patch> = Vec::with_capacity(patches.len());
    let mut removed = 0;

    for patch in patches.drain(..) {
        let mut redundant = false;
        match &patch {
            Patch::Component(cp) => {
                let key = (cp.entity, cp.component.clone());
                match cp.op {
                    ComponentOp::Add => {
                        known.insert(key, cp.value.clone());
                    }
                    ComponentOp::Remove => {
                        known.remove(&key);
                    }
                    ComponentOp::SetField => {
                        if let Some(current) = known.remove(&key) {
                            let mut next = current.clone();
                            if next.apply_field(&cp.field_path, cp.value.clone()) {
                                redundant = next == current;
                                known.insert(key, next);
                            }
                        }
                    }
                }
            }
            Patch::Custom(p) => {
                let key = (p.entity, p.type_name.clone());
                redundant = known.get(&key) == Some(&p.data);
                known.insert(key, p.data.clone());
            }
            Patch::Entity(p) => known.retain(|(entity, _), _| *entity != p.entity),
            _ => {
                if let Some((entity, component, field, value)) = field_write(&patch) {
                    let key = (entity, component.to_string());
                    if let Some(current) = known.remove(&key) {
                        let mut next = current.clone();
                        if next.set_path(field, value) {
                            redundant = next == current;
                            known.insert(key, next);
                        }
                    }
                }
            }
        }

        if redundant {
            removed += 1;
        } else {
            out.push(patch);
        }
    }
    *patches = out;
    stats.eliminated_count += removed;
    removed > 0
}

// ============================================================================
// Deduplication
// ============================================================================

/// Removes exact duplicate patches, keeping the first occurrence
#[derive(Debug, Default)]
pub struct PatchDeduplicator {
    removed_count: usize,
}

impl PatchDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every patch identical (kind, target and value) to an earlier one
    pub fn deduplicate(&mut self, batch: &PatchBatch) -> PatchBatch {
        let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(batch.len());
        let mut out = PatchBatch::new();
        for patch in batch {
            if seen.insert(patch.canonical_bytes()) {
                out.push(patch.clone());
            } else {
                self.removed_count += 1;
            }
        }
        out
    }

    /// Total duplicates removed since creation or the last reset
    pub fn removed_count(&self) -> usize {
        self.removed_count
    }

    pub fn reset(&mut self) {
        self.removed_count = 0;
    }
}
