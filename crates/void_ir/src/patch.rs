//! Patches - declarative operations on namespace state
//!
//! A patch represents a single mutation a producer wants to perform.
//! Patches are collected into transactions and applied atomically.

use crate::codec::{wire_enum, ByteReader, ByteWriter, WireFormat};
use crate::namespace::NamespaceId;
use crate::value::{AssetRef, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Component name that transform patches write into
pub const TRANSFORM_COMPONENT: &str = "Transform";
/// Component name that camera patches write into
pub const CAMERA_COMPONENT: &str = "Camera";

/// Unique identifier for an entity within a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// The namespace this entity belongs to
    pub namespace: NamespaceId,
    /// Entity id minted by the namespace
    pub entity_id: u64,
}

impl EntityRef {
    /// Create a new entity reference
    pub fn new(namespace: NamespaceId, entity_id: u64) -> Self {
        Self {
            namespace,
            entity_id,
        }
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.namespace.raw());
        w.write_u64(self.entity_id);
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        let namespace = NamespaceId::from_raw(r.read_u32()?);
        Some(Self::new(namespace, r.read_u64()?))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/e{}", self.namespace, self.entity_id)
    }
}

wire_enum! {
    /// Discriminant of a [`Patch`], used by filters and ordering
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub enum PatchKind {
        Entity = 0,
        Component = 1,
        Layer = 2,
        Asset = 3,
        Hierarchy = 4,
        Camera = 5,
        Transform = 6,
        Custom = 7,
    }
}

/// A single patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Patch {
    /// Entity-level operations
    Entity(EntityPatch),
    /// Component-level operations
    Component(ComponentPatch),
    /// Layer operations
    Layer(LayerPatch),
    /// Asset binding operations
    Asset(AssetPatch),
    /// Hierarchy operations
    Hierarchy(HierarchyPatch),
    /// Camera property writes
    Camera(CameraPatch),
    /// Transform property writes
    Transform(TransformPatch),
    /// Plugin-declared component kinds unknown to this layer
    Custom(CustomPatch),
}

impl Patch {
    /// Discriminant of this patch
    pub fn kind(&self) -> PatchKind {
        match self {
            Self::Entity(_) => PatchKind::Entity,
            Self::Component(_) => PatchKind::Component,
            Self::Layer(_) => PatchKind::Layer,
            Self::Asset(_) => PatchKind::Asset,
            Self::Hierarchy(_) => PatchKind::Hierarchy,
            Self::Camera(_) => PatchKind::Camera,
            Self::Transform(_) => PatchKind::Transform,
            Self::Custom(_) => PatchKind::Custom,
        }
    }

    /// The entity this patch operates on, if any
    pub fn target_entity(&self) -> Option<EntityRef> {
        match self {
            Self::Entity(p) => Some(p.entity),
            Self::Component(p) => Some(p.entity),
            Self::Layer(p) => p.entity,
            Self::Asset(p) => Some(p.entity),
            Self::Hierarchy(p) => Some(p.entity),
            Self::Camera(p) => Some(p.entity),
            Self::Transform(p) => Some(p.entity),
            Self::Custom(p) => Some(p.entity),
        }
    }

    /// The component type this patch writes, if any
    pub fn component_type(&self) -> Option<&str> {
        match self {
            Self::Component(p) => Some(&p.component),
            Self::Asset(p) => Some(&p.component),
            Self::Camera(_) => Some(CAMERA_COMPONENT),
            Self::Transform(_) => Some(TRANSFORM_COMPONENT),
            Self::Custom(p) => Some(&p.type_name),
            Self::Entity(_) | Self::Layer(_) | Self::Hierarchy(_) => None,
        }
    }

    /// The layer this patch touches, if any
    pub fn layer_id(&self) -> Option<u32> {
        match self {
            Self::Layer(p) => Some(p.layer_id),
            _ => None,
        }
    }

    /// The asset this patch binds, if any
    pub fn asset(&self) -> Option<&AssetRef> {
        match self {
            Self::Asset(p) => Some(&p.asset),
            _ => None,
        }
    }

    /// Check if this patch targets a specific entity
    pub fn targets_entity(&self, entity: EntityRef) -> bool {
        self.target_entity() == Some(entity)
    }

    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    pub fn create_entity(entity: EntityRef, name: impl Into<String>) -> Self {
        Self::Entity(EntityPatch {
            entity,
            op: EntityOp::Create,
            name: name.into(),
        })
    }

    pub fn destroy_entity(entity: EntityRef) -> Self {
        Self::Entity(EntityPatch {
            entity,
            op: EntityOp::Destroy,
            name: String::new(),
        })
    }

    pub fn rename_entity(entity: EntityRef, name: impl Into<String>) -> Self {
        Self::Entity(EntityPatch {
            entity,
            op: EntityOp::Rename,
            name: name.into(),
        })
    }

    /// Add a component with its initial value
    pub fn add_component(entity: EntityRef, component: impl Into<String>, value: Value) -> Self {
        Self::Component(ComponentPatch {
            entity,
            component: component.into(),
            op: ComponentOp::Add,
            field_path: String::new(),
            value,
        })
    }

    pub fn remove_component(entity: EntityRef, component: impl Into<String>) -> Self {
        Self::Component(ComponentPatch {
            entity,
            component: component.into(),
            op: ComponentOp::Remove,
            field_path: String::new(),
            value: Value::Null,
        })
    }

    /// Write a (dot-path) field of an existing component
    pub fn set_field(
        entity: EntityRef,
        component: impl Into<String>,
        field_path: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::Component(ComponentPatch {
            entity,
            component: component.into(),
            op: ComponentOp::SetField,
            field_path: field_path.into(),
            value,
        })
    }

    pub fn create_layer(layer_id: u32, name: impl Into<String>, order: i32) -> Self {
        Self::Layer(LayerPatch {
            layer_id,
            op: LayerOp::Create,
            name: name.into(),
            order,
            visible: true,
            entity: None,
        })
    }

    pub fn update_layer(layer_id: u32, name: impl Into<String>, order: i32, visible: bool) -> Self {
        Self::Layer(LayerPatch {
            layer_id,
            op: LayerOp::Update,
            name: name.into(),
            order,
            visible,
            entity: None,
        })
    }

    pub fn destroy_layer(layer_id: u32) -> Self {
        Self::Layer(LayerPatch {
            layer_id,
            op: LayerOp::Destroy,
            name: String::new(),
            order: 0,
            visible: false,
            entity: None,
        })
    }

    pub fn assign_layer(layer_id: u32, entity: EntityRef) -> Self {
        Self::Layer(LayerPatch {
            layer_id,
            op: LayerOp::AssignEntity,
            name: String::new(),
            order: 0,
            visible: false,
            entity: Some(entity),
        })
    }

    pub fn unassign_layer(layer_id: u32, entity: EntityRef) -> Self {
        Self::Layer(LayerPatch {
            layer_id,
            op: LayerOp::UnassignEntity,
            name: String::new(),
            order: 0,
            visible: false,
            entity: Some(entity),
        })
    }

    /// Bind an asset into `component.field`
    pub fn load_asset(
        entity: EntityRef,
        component: impl Into<String>,
        field: impl Into<String>,
        asset: AssetRef,
    ) -> Self {
        Self::Asset(AssetPatch {
            entity,
            component: component.into(),
            field: field.into(),
            op: AssetOp::Load,
            asset,
        })
    }

    pub fn unload_asset(
        entity: EntityRef,
        component: impl Into<String>,
        field: impl Into<String>,
        asset: AssetRef,
    ) -> Self {
        Self::Asset(AssetPatch {
            entity,
            component: component.into(),
            field: field.into(),
            op: AssetOp::Unload,
            asset,
        })
    }

    pub fn set_parent(entity: EntityRef, parent: EntityRef) -> Self {
        Self::Hierarchy(HierarchyPatch {
            entity,
            op: HierarchyOp::SetParent,
            parent: Some(parent),
            sibling_index: 0,
        })
    }

    pub fn detach(entity: EntityRef) -> Self {
        Self::Hierarchy(HierarchyPatch {
            entity,
            op: HierarchyOp::Detach,
            parent: None,
            sibling_index: 0,
        })
    }

    pub fn reorder(entity: EntityRef, sibling_index: u32) -> Self {
        Self::Hierarchy(HierarchyPatch {
            entity,
            op: HierarchyOp::Reorder,
            parent: None,
            sibling_index,
        })
    }

    pub fn transform(entity: EntityRef, property: TransformProperty, value: Value) -> Self {
        Self::Transform(TransformPatch {
            entity,
            property,
            value,
        })
    }

    pub fn camera(entity: EntityRef, property: CameraProperty, value: Value) -> Self {
        Self::Camera(CameraPatch {
            entity,
            property,
            value,
        })
    }

    pub fn custom(type_name: impl Into<String>, entity: EntityRef, data: Value) -> Self {
        Self::Custom(CustomPatch {
            type_name: type_name.into(),
            entity,
            data,
        })
    }

    // ------------------------------------------------------------------------
    // Wire format
    // ------------------------------------------------------------------------

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.kind().tag());
        match self {
            Self::Entity(p) => {
                p.entity.encode(w);
                w.write_u8(p.op.tag());
                w.write_str(&p.name);
            }
            Self::Component(p) => {
                p.entity.encode(w);
                w.write_str(&p.component);
                w.write_u8(p.op.tag());
                w.write_str(&p.field_path);
                p.value.encode(w);
            }
            Self::Layer(p) => {
                w.write_u32(p.layer_id);
                w.write_u8(p.op.tag());
                w.write_str(&p.name);
                w.write_i32(p.order);
                w.write_bool(p.visible);
                w.write_option(p.entity.as_ref(), |w, e| e.encode(w));
            }
            Self::Asset(p) => {
                p.entity.encode(w);
                w.write_str(&p.component);
                w.write_str(&p.field);
                w.write_u8(p.op.tag());
                p.asset.encode(w);
            }
            Self::Hierarchy(p) => {
                p.entity.encode(w);
                w.write_u8(p.op.tag());
                w.write_option(p.parent.as_ref(), |w, e| e.encode(w));
                w.write_u32(p.sibling_index);
            }
            Self::Camera(p) => {
                p.entity.encode(w);
                w.write_u8(p.property.tag());
                p.value.encode(w);
            }
            Self::Transform(p) => {
                p.entity.encode(w);
                w.write_u8(p.property.tag());
                p.value.encode(w);
            }
            Self::Custom(p) => {
                w.write_str(&p.type_name);
                p.entity.encode(w);
                p.data.encode(w);
            }
        }
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        let patch = match PatchKind::from_tag(r.read_u8()?)? {
            PatchKind::Entity => Self::Entity(EntityPatch {
                entity: EntityRef::decode(r)?,
                op: EntityOp::from_tag(r.read_u8()?)?,
                name: r.read_string()?,
            }),
            PatchKind::Component => Self::Component(ComponentPatch {
                entity: EntityRef::decode(r)?,
                component: r.read_string()?,
                op: ComponentOp::from_tag(r.read_u8()?)?,
                field_path: r.read_string()?,
                value: Value::decode(r)?,
            }),
            PatchKind::Layer => Self::Layer(LayerPatch {
                layer_id: r.read_u32()?,
                op: LayerOp::from_tag(r.read_u8()?)?,
                name: r.read_string()?,
                order: r.read_i32()?,
                visible: r.read_bool()?,
                entity: r.read_option(EntityRef::decode)?,
            }),
            PatchKind::Asset => Self::Asset(AssetPatch {
                entity: EntityRef::decode(r)?,
                component: r.read_string()?,
                field: r.read_string()?,
                op: AssetOp::from_tag(r.read_u8()?)?,
                asset: AssetRef::decode(r)?,
            }),
            PatchKind::Hierarchy => Self::Hierarchy(HierarchyPatch {
                entity: EntityRef::decode(r)?,
                op: HierarchyOp::from_tag(r.read_u8()?)?,
                parent: r.read_option(EntityRef::decode)?,
                sibling_index: r.read_u32()?,
            }),
            PatchKind::Camera => Self::Camera(CameraPatch {
                entity: EntityRef::decode(r)?,
                property: CameraProperty::from_tag(r.read_u8()?)?,
                value: Value::decode(r)?,
            }),
            PatchKind::Transform => Self::Transform(TransformPatch {
                entity: EntityRef::decode(r)?,
                property: TransformProperty::from_tag(r.read_u8()?)?,
                value: Value::decode(r)?,
            }),
            PatchKind::Custom => Self::Custom(CustomPatch {
                type_name: r.read_string()?,
                entity: EntityRef::decode(r)?,
                data: Value::decode(r)?,
            }),
        };
        Some(patch)
    }

    /// Canonical encoding, used as an identity key
    pub(crate) fn canonical_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}

impl WireFormat for Patch {
    const MAGIC: [u8; 4] = *b"PATC";

    fn encode_payload(&self, w: &mut ByteWriter) {
        self.encode(w);
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        Self::decode(r)
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(p) => write!(f, "{:?} entity {}", p.op, p.entity),
            Self::Component(p) if p.field_path.is_empty() => {
                write!(f, "{:?} {} on {}", p.op, p.component, p.entity)
            }
            Self::Component(p) => {
                write!(f, "{:?} {}.{} on {}", p.op, p.component, p.field_path, p.entity)
            }
            Self::Layer(p) => write!(f, "{:?} layer {}", p.op, p.layer_id),
            Self::Asset(p) => write!(f, "{:?} asset {} on {}", p.op, p.asset, p.entity),
            Self::Hierarchy(p) => write!(f, "{:?} on {}", p.op, p.entity),
            Self::Camera(p) => write!(f, "camera {:?} on {}", p.property, p.entity),
            Self::Transform(p) => write!(f, "transform {:?} on {}", p.property, p.entity),
            Self::Custom(p) => write!(f, "custom {} on {}", p.type_name, p.entity),
        }
    }
}

// ============================================================================
// Entity & component patches
// ============================================================================

/// Entity-level patch operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    /// The entity being operated on
    pub entity: EntityRef,
    /// The operation
    pub op: EntityOp,
    /// Display name for `Create` / `Rename`
    pub name: String,
}

wire_enum! {
    /// Entity operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum EntityOp {
        Create = 0,
        Destroy = 1,
        Rename = 2,
    }
}

/// Component-level patch operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPatch {
    /// The entity being operated on
    pub entity: EntityRef,
    /// The component type name
    pub component: String,
    /// The operation
    pub op: ComponentOp,
    /// Dot path into the component; empty addresses the whole value
    pub field_path: String,
    /// New value (`Null` for `Remove`)
    pub value: Value,
}

wire_enum! {
    /// Component operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum ComponentOp {
        /// Attach a component with an initial value
        Add = 0,
        /// Detach a component
        Remove = 1,
        /// Write a field of an attached component
        SetField = 2,
    }
}

// ============================================================================
// Layers & assets
// ============================================================================

/// Layer-level patch operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerPatch {
    /// Layer identifier
    pub layer_id: u32,
    /// The operation
    pub op: LayerOp,
    /// Layer name (`Create` / `Update`)
    pub name: String,
    /// Composition order (`Create` / `Update`)
    pub order: i32,
    /// Visibility flag (`Create` / `Update`)
    pub visible: bool,
    /// Entity for `AssignEntity` / `UnassignEntity`
    pub entity: Option<EntityRef>,
}

wire_enum! {
    /// Layer operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum LayerOp {
        Create = 0,
        Destroy = 1,
        Update = 2,
        AssignEntity = 3,
        UnassignEntity = 4,
    }
}

/// Asset binding patch: points `component.field` of an entity at an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPatch {
    pub entity: EntityRef,
    pub component: String,
    pub field: String,
    pub op: AssetOp,
    pub asset: AssetRef,
}

wire_enum! {
    /// Asset operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum AssetOp {
        /// Bind the asset into the field
        Load = 0,
        /// Clear the field
        Unload = 1,
        /// Request a reload; the binding is unchanged
        Reload = 2,
    }
}

// ============================================================================
// Hierarchy
// ============================================================================

/// Hierarchy-level patch operations for scene graph management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyPatch {
    /// The entity being operated on
    pub entity: EntityRef,
    /// The operation
    pub op: HierarchyOp,
    /// New parent for `SetParent`
    pub parent: Option<EntityRef>,
    /// Index among siblings for `Reorder`
    pub sibling_index: u32,
}

wire_enum! {
    /// Hierarchy operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum HierarchyOp {
        /// Set an entity's parent
        SetParent = 0,
        /// Remove an entity's parent (make it a root)
        Detach = 1,
        /// Move an entity among its siblings
        Reorder = 2,
    }
}

// ============================================================================
// Camera & transform
// ============================================================================

/// Camera property write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPatch {
    pub entity: EntityRef,
    pub property: CameraProperty,
    pub value: Value,
}

wire_enum! {
    /// Camera properties
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum CameraProperty {
        Fov = 0,
        Near = 1,
        Far = 2,
        Projection = 3,
        Viewport = 4,
        ClearColor = 5,
        Priority = 6,
        Active = 7,
    }
}

impl CameraProperty {
    /// Field name inside the `Camera` component
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Fov => "fov",
            Self::Near => "near",
            Self::Far => "far",
            Self::Projection => "projection",
            Self::Viewport => "viewport",
            Self::ClearColor => "clear_color",
            Self::Priority => "priority",
            Self::Active => "active",
        }
    }
}

/// Transform property write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformPatch {
    pub entity: EntityRef,
    pub property: TransformProperty,
    pub value: Value,
}

wire_enum! {
    /// Transform properties
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum TransformProperty {
        Position = 0,
        Rotation = 1,
        Scale = 2,
        Matrix = 3,
    }
}

impl TransformProperty {
    /// Field name inside the `Transform` component
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Rotation => "rotation",
            Self::Scale => "scale",
            Self::Matrix => "matrix",
        }
    }
}

/// Patch for a plugin-defined component kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPatch {
    /// Plugin-declared type name
    pub type_name: String,
    pub entity: EntityRef,
    /// Opaque payload
    pub data: Value,
}
