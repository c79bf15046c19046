//! # Void IR - Transactional IR Store & Patch Bus
//!
//! Producers do not mutate world state directly - they emit IR patches that
//! are grouped into transactions, validated against their namespace,
//! applied atomically by a single applier and published to observers.
//!
//! ## Architecture
//!
//! ```text
//! Producer A ──┐                                  ┌──► PatchBus (sync)
//!              ├──► Transaction ──► Queue ──► Apply ┤
//! Producer B ──┘        │                         └──► AsyncPatchBus
//!                       ▼
//!               Validator / ConflictDetector       Snapshots ◄── StateStore
//! ```
//!
//! ## Key Concepts
//!
//! - **Patch**: A single declarative operation on an entity, component,
//!   layer, asset, hierarchy, transform, camera or custom payload
//! - **Transaction**: A batch of patches that succeed or fail atomically
//! - **Namespace**: Producer-scoped isolation with permissions and limits
//! - **Snapshot**: A point-in-time capture of a namespace's state; two
//!   snapshots diff into a replayable delta
//! - **IrSystem**: Owns every component above and is the single applier
//!
//! Every stateful component serializes to the same framed binary format
//! (`u32 magic | u32 version | payload`) and can be carried across a reload
//! through [`HotReloadable`].

pub mod batch;
pub mod bus;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod error;
pub mod hot_reload;
pub mod namespace;
pub mod patch;
pub mod schema;
pub mod snapshot;
pub mod state;
pub mod system;
pub mod transaction;
pub mod validation;
pub mod value;

pub use batch::{BatchOptimizer, OptimizationStats, OptimizerOptions, PatchBatch, PatchDeduplicator};
pub use bus::{AsyncPatchBus, PatchBus, PatchBusStats, PatchEvent, PatchFilter, SubscriptionId};
pub use codec::{ByteReader, ByteWriter, WireFormat};
pub use config::IrConfig;
pub use conflict::{Conflict, ConflictDetector, ConflictType, Footprint};
pub use error::{ConfigError, HotReloadError, PatchBusError, StateError, TransactionError};
pub use hot_reload::{HotReload, HotReloadRegistry, HotReloadable};
pub use namespace::{
    LimitBreach, Namespace, NamespaceId, NamespacePermissions, NamespaceRegistry, ResourceLimits,
    ResourceUsage,
};
pub use patch::{
    AssetOp, AssetPatch, CameraPatch, CameraProperty, ComponentOp, ComponentPatch, CustomPatch,
    EntityOp, EntityPatch, EntityRef, HierarchyOp, HierarchyPatch, LayerOp, LayerPatch, Patch,
    PatchKind, TransformPatch, TransformProperty,
};
pub use schema::{
    ArrayConstraint, ComponentSchema, FieldDescriptor, FieldType, NumericRange, SchemaRegistry,
    StringConstraint,
};
pub use snapshot::{Snapshot, SnapshotDelta, SnapshotId, SnapshotManager};
pub use state::{EntityRecord, LayerRecord, NamespaceState, StateStore};
pub use system::{IrSystem, TransactionRecord};
pub use transaction::{
    apply_transaction, Transaction, TransactionBuilder, TransactionId, TransactionIdAllocator,
    TransactionMetadata, TransactionQueue, TransactionResult, TransactionState,
};
pub use validation::{PatchValidator, ValidationError, ValidationErrorKind, ValidationResult};
pub use value::{AssetRef, Value};
