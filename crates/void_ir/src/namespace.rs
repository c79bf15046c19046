//! Namespaces for isolation
//!
//! Each producer operates within its own namespace, providing:
//! - Entity isolation (a namespace mints and owns its entity ids)
//! - Permission scoping (what kinds of patches it may submit)
//! - Resource accounting (usage tracked against configured limits)

use crate::codec::{ByteReader, ByteWriter, WireFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a namespace: a dense index into its [`NamespaceRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId(u32);

impl NamespaceId {
    /// Get the raw ID value
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Create from a raw value
    ///
    /// Only meant for reconstructing ids from serialized data; new
    /// namespaces get their id from [`NamespaceRegistry::create`].
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns:{}", self.0)
    }
}

/// Permissions for what a namespace can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacePermissions {
    /// Can create entities
    pub can_create_entities: bool,
    /// Can destroy entities
    pub can_delete_entities: bool,
    /// Can add, remove and write components
    pub can_modify_components: bool,
    /// Can reference entities of other namespaces
    pub can_cross_namespace: bool,
    /// Can request snapshots
    pub can_snapshot: bool,
    /// Can create and edit layers
    pub can_modify_layers: bool,
    /// Can reparent and reorder entities
    pub can_modify_hierarchy: bool,
    /// If non-empty, only these component types may be touched
    pub allowed_components: BTreeSet<String>,
    /// Component types that may never be touched
    pub blocked_components: BTreeSet<String>,
}

impl Default for NamespacePermissions {
    fn default() -> Self {
        Self {
            can_create_entities: true,
            can_delete_entities: true,
            can_modify_components: true,
            can_cross_namespace: false,
            can_snapshot: true,
            can_modify_layers: true,
            can_modify_hierarchy: true,
            allowed_components: BTreeSet::new(),
            blocked_components: BTreeSet::new(),
        }
    }
}

impl NamespacePermissions {
    /// All permissions enabled
    pub fn all() -> Self {
        Self {
            can_cross_namespace: true,
            ..Self::default()
        }
    }

    /// Minimal permissions (read-only)
    pub fn read_only() -> Self {
        Self {
            can_create_entities: false,
            can_delete_entities: false,
            can_modify_components: false,
            can_cross_namespace: true,
            can_snapshot: true,
            can_modify_layers: false,
            can_modify_hierarchy: false,
            allowed_components: BTreeSet::new(),
            blocked_components: BTreeSet::new(),
        }
    }

    /// Restrict to an allow-list of component types
    pub fn with_allowed_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_components = components.into_iter().map(Into::into).collect();
        self
    }

    /// Block a set of component types
    pub fn with_blocked_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_components = components.into_iter().map(Into::into).collect();
        self
    }

    /// Check the allow/block lists for a component type
    pub fn allows_component(&self, component_type: &str) -> bool {
        if self.blocked_components.contains(component_type) {
            return false;
        }
        self.allowed_components.is_empty() || self.allowed_components.contains(component_type)
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_bool(self.can_create_entities);
        w.write_bool(self.can_delete_entities);
        w.write_bool(self.can_modify_components);
        w.write_bool(self.can_cross_namespace);
        w.write_bool(self.can_snapshot);
        w.write_bool(self.can_modify_layers);
        w.write_bool(self.can_modify_hierarchy);
        w.write_seq(&self.allowed_components, |w, s| w.write_str(s));
        w.write_seq(&self.blocked_components, |w, s| w.write_str(s));
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            can_create_entities: r.read_bool()?,
            can_delete_entities: r.read_bool()?,
            can_modify_components: r.read_bool()?,
            can_cross_namespace: r.read_bool()?,
            can_snapshot: r.read_bool()?,
            can_modify_layers: r.read_bool()?,
            can_modify_hierarchy: r.read_bool()?,
            allowed_components: r.read_seq(ByteReader::read_string)?.into_iter().collect(),
            blocked_components: r.read_seq(ByteReader::read_string)?.into_iter().collect(),
        })
    }
}

/// Resource limits for a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of entities
    pub max_entities: Option<u32>,
    /// Maximum number of components per entity
    pub max_components_per_entity: Option<u32>,
    /// Maximum memory usage in bytes
    pub max_memory_bytes: Option<u64>,
    /// Maximum transactions waiting in the queue
    pub max_pending_transactions: Option<u32>,
    /// Maximum retained snapshots
    pub max_snapshots: Option<u32>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_entities: Some(10_000),
            max_components_per_entity: Some(64),
            max_memory_bytes: Some(256 * 1024 * 1024), // 256 MB
            max_pending_transactions: Some(256),
            max_snapshots: Some(16),
        }
    }
}

impl ResourceLimits {
    /// No limits
    pub fn unlimited() -> Self {
        Self {
            max_entities: None,
            max_components_per_entity: None,
            max_memory_bytes: None,
            max_pending_transactions: None,
            max_snapshots: None,
        }
    }

    /// Check if one more entity fits
    pub fn check_entity_limit(&self, current: u32) -> bool {
        self.max_entities.map_or(true, |max| current < max)
    }

    /// Check if one more pending transaction fits
    pub fn check_pending_limit(&self, current: u32) -> bool {
        self.max_pending_transactions.map_or(true, |max| current < max)
    }

    /// Find the first limit a projected usage would break.
    ///
    /// `max_components_on_entity` is the component count of the fullest
    /// entity in the projection.
    pub fn first_breach(
        &self,
        usage: &ResourceUsage,
        max_components_on_entity: u32,
    ) -> Option<LimitBreach> {
        let checks = [
            ("entities", u64::from(usage.entity_count), self.max_entities.map(u64::from)),
            (
                "components per entity",
                u64::from(max_components_on_entity),
                self.max_components_per_entity.map(u64::from),
            ),
            ("memory bytes", usage.memory_bytes, self.max_memory_bytes),
            (
                "pending transactions",
                u64::from(usage.pending_transactions),
                self.max_pending_transactions.map(u64::from),
            ),
            ("snapshots", u64::from(usage.snapshot_count), self.max_snapshots.map(u64::from)),
        ];
        checks.into_iter().find_map(|(resource, used, limit)| {
            limit
                .filter(|limit| used > *limit)
                .map(|limit| LimitBreach { resource, used, limit })
        })
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_option(self.max_entities.as_ref(), |w, v| w.write_u32(*v));
        w.write_option(self.max_components_per_entity.as_ref(), |w, v| w.write_u32(*v));
        w.write_option(self.max_memory_bytes.as_ref(), |w, v| w.write_u64(*v));
        w.write_option(self.max_pending_transactions.as_ref(), |w, v| w.write_u32(*v));
        w.write_option(self.max_snapshots.as_ref(), |w, v| w.write_u32(*v));
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            max_entities: r.read_option(ByteReader::read_u32)?,
            max_components_per_entity: r.read_option(ByteReader::read_u32)?,
            max_memory_bytes: r.read_option(ByteReader::read_u64)?,
            max_pending_transactions: r.read_option(ByteReader::read_u32)?,
            max_snapshots: r.read_option(ByteReader::read_u32)?,
        })
    }
}

/// A resource limit that a mutation would exceed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitBreach {
    /// Which resource
    pub resource: &'static str,
    /// Projected usage
    pub used: u64,
    /// Configured limit
    pub limit: u64,
}

impl fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} limit exceeded ({} > {})", self.resource, self.used, self.limit)
    }
}

/// Live resource counters for a namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub entity_count: u32,
    pub component_count: u32,
    pub memory_bytes: u64,
    pub pending_transactions: u32,
    pub snapshot_count: u32,
}

impl ResourceUsage {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.entity_count);
        w.write_u32(self.component_count);
        w.write_u64(self.memory_bytes);
        w.write_u32(self.pending_transactions);
        w.write_u32(self.snapshot_count);
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            entity_count: r.read_u32()?,
            component_count: r.read_u32()?,
            memory_bytes: r.read_u64()?,
            pending_transactions: r.read_u32()?,
            snapshot_count: r.read_u32()?,
        })
    }
}

/// A namespace defines the scope of a producer's operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Unique identifier
    pub id: NamespaceId,
    /// Human-readable name
    pub name: String,
    /// Permissions for this namespace
    pub permissions: NamespacePermissions,
    /// Resource limits
    pub limits: ResourceLimits,
    /// Live usage counters
    pub usage: ResourceUsage,
    next_entity_id: u64,
}

impl Namespace {
    fn new(
        id: NamespaceId,
        name: String,
        permissions: NamespacePermissions,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            id,
            name,
            permissions,
            limits,
            usage: ResourceUsage::default(),
            next_entity_id: 1,
        }
    }

    /// Mint a fresh entity id.
    ///
    /// Ids start at 1, strictly increase and are never handed out twice,
    /// including across a serialize/restore cycle.
    pub fn allocate_entity(&mut self) -> u64 {
        let id = self.next_entity_id;
        match self.next_entity_id.checked_add(1) {
            Some(next) => self.next_entity_id = next,
            None => log::error!("namespace {} exhausted its entity id space", self.name),
        }
        id
    }

    /// The id the next call to [`Namespace::allocate_entity`] will return
    pub fn next_entity_id(&self) -> u64 {
        self.next_entity_id
    }

    /// Check if this namespace can read another namespace's entities
    pub fn can_access(&self, other: NamespaceId) -> bool {
        self.id == other || self.permissions.can_cross_namespace
    }

    /// Check if this namespace can modify another namespace's entities
    pub fn can_modify(&self, other: NamespaceId) -> bool {
        self.id == other
    }

    /// Reconcile usage counters after a commit
    pub fn update_usage(&mut self, usage: ResourceUsage) {
        self.usage = usage;
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.id.raw());
        w.write_str(&self.name);
        self.permissions.encode(w);
        self.limits.encode(w);
        self.usage.encode(w);
        w.write_u64(self.next_entity_id);
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        let namespace = Self {
            id: NamespaceId(r.read_u32()?),
            name: r.read_string()?,
            permissions: NamespacePermissions::decode(r)?,
            limits: ResourceLimits::decode(r)?,
            usage: ResourceUsage::decode(r)?,
            next_entity_id: r.read_u64()?,
        };
        (namespace.next_entity_id != 0).then_some(namespace)
    }
}

impl WireFormat for Namespace {
    const MAGIC: [u8; 4] = *b"NSPC";

    fn encode_payload(&self, w: &mut ByteWriter) {
        self.encode(w);
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        Self::decode(r)
    }
}

/// Owner of every namespace; ids are dense indices and never reused
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRegistry {
    namespaces: Vec<Namespace>,
}

impl NamespaceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a namespace with default permissions and limits
    pub fn create(&mut self, name: impl Into<String>) -> NamespaceId {
        self.create_with(name, NamespacePermissions::default(), ResourceLimits::default())
    }

    /// Create a namespace with explicit permissions and limits
    pub fn create_with(
        &mut self,
        name: impl Into<String>,
        permissions: NamespacePermissions,
        limits: ResourceLimits,
    ) -> NamespaceId {
        let id = NamespaceId(self.namespaces.len() as u32);
        let name = name.into();
        log::debug!("registered namespace {} as {}", name, id);
        self.namespaces.push(Namespace::new(id, name, permissions, limits));
        id
    }

    pub fn get(&self, id: NamespaceId) -> Option<&Namespace> {
        self.namespaces.get(id.index())
    }

    pub fn get_mut(&mut self, id: NamespaceId) -> Option<&mut Namespace> {
        self.namespaces.get_mut(id.index())
    }

    /// First namespace registered under `name`
    pub fn find_by_name(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Namespace> {
        self.namespaces.iter_mut()
    }
}

impl WireFormat for NamespaceRegistry {
    const MAGIC: [u8; 4] = *b"NREG";

    fn encode_payload(&self, w: &mut ByteWriter) {
        w.write_seq(&self.namespaces, |w, ns| ns.encode(w));
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        let namespaces = r.read_seq(Namespace::decode)?;
        let dense = namespaces
            .iter()
            .enumerate()
            .all(|(index, ns)| ns.id.index() == index);
        dense.then_some(Self { namespaces })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_ids_are_dense() {
        let mut registry = NamespaceRegistry::new();
        let a = registry.create("a");
        let b = registry.create("b");
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert_eq!(registry.find_by_name("b").map(|ns| ns.id), Some(b));
        assert!(registry.get(NamespaceId::from_raw(2)).is_none());
    }

    #[test]
    fn test_namespace_access() {
        let mut registry = NamespaceRegistry::new();
        let app1 = registry.create("app1");
        let app2 = registry.create_with("app2", NamespacePermissions::all(), ResourceLimits::unlimited());

        let ns1 = registry.get(app1).unwrap();
        let ns2 = registry.get(app2).unwrap();

        // Default permissions stay inside the namespace
        assert!(!ns1.can_access(app2));
        assert!(ns2.can_access(app1));

        // Nobody modifies a foreign namespace
        assert!(!ns2.can_modify(app1));
        assert!(ns1.can_modify(app1));
    }

    #[test]
    fn test_allocate_entity_monotonic() {
        let mut registry = NamespaceRegistry::new();
        let id = registry.create("game");
        let ns = registry.get_mut(id).unwrap();
        let ids: Vec<u64> = (0..5).map(|_| ns.allocate_entity()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_allocation_survives_round_trip() {
        let mut registry = NamespaceRegistry::new();
        let id = registry.create("game");
        let last = {
            let ns = registry.get_mut(id).unwrap();
            ns.allocate_entity();
            ns.allocate_entity()
        };

        let mut restored = NamespaceRegistry::from_bytes(&registry.to_bytes()).unwrap();
        assert_eq!(restored, registry);
        let next = restored.get_mut(id).unwrap().allocate_entity();
        assert!(next > last);
    }

    #[test]
    fn test_component_lists() {
        let perms = NamespacePermissions::default()
            .with_allowed_components(["Transform", "Mesh"])
            .with_blocked_components(["Mesh"]);
        assert!(perms.allows_component("Transform"));
        assert!(!perms.allows_component("Mesh"));
        assert!(!perms.allows_component("Light"));
        assert!(NamespacePermissions::default().allows_component("Light"));
    }

    #[test]
    fn test_first_breach() {
        let limits = ResourceLimits {
            max_entities: Some(2),
            ..ResourceLimits::unlimited()
        };
        let usage = ResourceUsage {
            entity_count: 3,
            ..ResourceUsage::default()
        };
        let breach = limits.first_breach(&usage, 0).unwrap();
        assert_eq!(breach.resource, "entities");
        assert!(limits.first_breach(&ResourceUsage::default(), 100).is_none());
    }

    #[test]
    fn test_decode_rejects_non_dense_registry() {
        let mut registry = NamespaceRegistry::new();
        registry.create("a");
        let mut bytes = registry.to_bytes();
        // id of the first namespace sits right after header + count
        bytes[12] = 7;
        assert!(NamespaceRegistry::from_bytes(&bytes).is_none());
    }
}
