//! Conflict detection between in-flight transactions
//!
//! Every tracked transaction (pending or applying) contributes a
//! [`Footprint`]: the entities, `(entity, component)` pairs, layers and assets
//! its patches touch. Two transactions conflict when their footprints
//! overlap. Detection is advisory; the detector never blocks or modifies a
//! transaction.
//!
//! When several resource kinds overlap, the finest one is reported:
//! component, then entity, then layer, then asset.

use crate::codec::{ByteReader, ByteWriter, WireFormat};
use crate::patch::{EntityRef, Patch};
use crate::transaction::{Transaction, TransactionId};
use crate::value::AssetRef;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of resource two transactions both touch, finest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictType {
    Component,
    Entity,
    Layer,
    Asset,
}

/// A reported overlap between two transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    /// The transaction that was checked
    pub tx_a: TransactionId,
    /// The tracked transaction it overlaps with
    pub tx_b: TransactionId,
    pub entity: Option<EntityRef>,
    pub component_type: Option<String>,
    pub layer: Option<u32>,
    pub asset: Option<AssetRef>,
}

impl Conflict {
    fn new(conflict_type: ConflictType, tx_a: TransactionId, tx_b: TransactionId) -> Self {
        Self {
            conflict_type,
            tx_a,
            tx_b,
            entity: None,
            component_type: None,
            layer: None,
            asset: None,
        }
    }

    /// Whether the conflict involves `id` on either side
    pub fn involves(&self, id: TransactionId) -> bool {
        self.tx_a == id || self.tx_b == id
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} conflict between {} and {}", self.conflict_type, self.tx_a, self.tx_b)?;
        match self.conflict_type {
            ConflictType::Component => {
                if let (Some(entity), Some(component)) = (&self.entity, &self.component_type) {
                    write!(f, " on {}.{}", entity, component)?;
                }
            }
            ConflictType::Entity => {
                if let Some(entity) = &self.entity {
                    write!(f, " on {}", entity)?;
                }
            }
            ConflictType::Layer => {
                if let Some(layer) = self.layer {
                    write!(f, " on layer {}", layer)?;
                }
            }
            ConflictType::Asset => {
                if let Some(asset) = &self.asset {
                    write!(f, " on asset {}", asset)?;
                }
            }
        }
        Ok(())
    }
}

/// Resources touched by one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    pub entities: BTreeSet<EntityRef>,
    pub components: BTreeSet<(EntityRef, String)>,
    pub layers: BTreeSet<u32>,
    pub assets: BTreeSet<AssetRef>,
}

impl Footprint {
    /// Collect the footprint of a patch sequence
    pub fn from_patches<'a>(patches: impl IntoIterator<Item = &'a Patch>) -> Self {
        let mut footprint = Self::default();
        for patch in patches {
            footprint.add_patch(patch);
        }
        footprint
    }

    /// Add a patch to the footprint
    pub fn add_patch(&mut self, patch: &Patch) {
        if let Some(entity) = patch.target_entity() {
            self.entities.insert(entity);
            if let Some(component) = patch.component_type() {
                self.components.insert((entity, component.to_string()));
            }
        }
        if let Some(layer) = patch.layer_id() {
            self.layers.insert(layer);
        }
        if let Some(asset) = patch.asset() {
            self.assets.insert(asset.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.components.is_empty()
            && self.layers.is_empty()
            && self.assets.is_empty()
    }

    /// Finest overlap with another footprint, reported from `a`'s side
    fn overlap(&self, other: &Footprint, a: TransactionId, b: TransactionId) -> Option<Conflict> {
        if let Some((entity, component)) = self.components.intersection(&other.components).next() {
            let mut conflict = Conflict::new(ConflictType::Component, a, b);
            conflict.entity = Some(*entity);
            conflict.component_type = Some(component.clone());
            return Some(conflict);
        }
        if let Some(entity) = self.entities.intersection(&other.entities).next() {
            let mut conflict = Conflict::new(ConflictType::Entity, a, b);
            conflict.entity = Some(*entity);
            return Some(conflict);
        }
        if let Some(layer) = self.layers.intersection(&other.layers).next() {
            let mut conflict = Conflict::new(ConflictType::Layer, a, b);
            conflict.layer = Some(*layer);
            return Some(conflict);
        }
        if let Some(asset) = self.assets.intersection(&other.assets).next() {
            let mut conflict = Conflict::new(ConflictType::Asset, a, b);
            conflict.asset = Some(asset.clone());
            return Some(conflict);
        }
        None
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_seq(&self.entities, |w, e| e.encode(w));
        w.write_seq(&self.components, |w, (e, c)| {
            e.encode(w);
            w.write_str(c);
        });
        w.write_seq(&self.layers, |w, l| w.write_u32(*l));
        w.write_seq(&self.assets, |w, a| a.encode(w));
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            entities: r.read_seq(EntityRef::decode)?.into_iter().collect(),
            components: r
                .read_seq(|r| Some((EntityRef::decode(r)?, r.read_string()?)))?
                .into_iter()
                .collect(),
            layers: r.read_seq(ByteReader::read_u32)?.into_iter().collect(),
            assets: r.read_seq(AssetRef::decode)?.into_iter().collect(),
        })
    }
}

/// Tracks in-flight transactions and reports overlaps between them
#[derive(Debug, Default)]
pub struct ConflictDetector {
    tracked: RwLock<BTreeMap<TransactionId, Footprint>>,
}

impl ConflictDetector {
    /// Create a new conflict detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction's footprint. Terminal transactions are not
    /// tracked; returns whether the transaction is now tracked.
    pub fn track(&self, tx: &Transaction) -> bool {
        if tx.is_terminal() {
            log::debug!("not tracking {} in state {:?}", tx.id(), tx.state());
            return false;
        }
        let footprint = Footprint::from_patches(tx.patches());
        self.tracked.write().insert(tx.id(), footprint);
        true
    }

    /// Stop tracking a transaction
    pub fn untrack(&self, id: TransactionId) -> bool {
        self.tracked.write().remove(&id).is_some()
    }

    /// First overlap between `tx` and any other tracked transaction, in id
    /// order. `tx` itself need not be tracked.
    pub fn check(&self, tx: &Transaction) -> Option<Conflict> {
        let footprint = Footprint::from_patches(tx.patches());
        self.tracked
            .read()
            .iter()
            .filter(|(id, _)| **id != tx.id())
            .find_map(|(id, other)| footprint.overlap(other, tx.id(), *id))
    }

    /// Every pairwise overlap across the tracked transactions
    pub fn detect(&self) -> Vec<Conflict> {
        let tracked = self.tracked.read();
        let entries: Vec<_> = tracked.iter().collect();
        let mut conflicts = Vec::new();
        for (i, (a, fa)) in entries.iter().enumerate() {
            for (b, fb) in &entries[i + 1..] {
                if let Some(conflict) = fa.overlap(fb, **a, **b) {
                    conflicts.push(conflict);
                }
            }
        }
        conflicts
    }

    /// Drop all tracking
    pub fn clear(&self) {
        self.tracked.write().clear();
    }

    pub fn is_tracked(&self, id: TransactionId) -> bool {
        self.tracked.read().contains_key(&id)
    }

    /// Tracked footprint of a transaction; empty when untracked
    pub fn footprint(&self, id: TransactionId) -> Footprint {
        self.tracked.read().get(&id).cloned().unwrap_or_default()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.read().len()
    }
}

impl WireFormat for ConflictDetector {
    const MAGIC: [u8; 4] = *b"CDET";

    fn encode_payload(&self, w: &mut ByteWriter) {
        let tracked = self.tracked.read();
        w.write_seq(tracked.iter().collect::<Vec<_>>().iter(), |w, (id, footprint)| {
            w.write_u64(id.raw());
            footprint.encode(w);
        });
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        let entries = r.read_seq(|r| Some((TransactionId::from_raw(r.read_u64()?), Footprint::decode(r)?)))?;
        Some(Self {
            tracked: RwLock::new(entries.into_iter().collect()),
        })
    }
}
