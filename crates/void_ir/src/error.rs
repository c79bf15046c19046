//! Error types
//!
//! Validation problems are values ([`crate::ValidationError`]) and decode
//! failures are `None`; the enums here cover the remaining fallible paths.

use crate::conflict::Conflict;
use crate::namespace::{LimitBreach, NamespaceId};
use crate::patch::EntityRef;
use crate::snapshot::SnapshotId;
use crate::transaction::{TransactionId, TransactionState};
use crate::validation::ValidationError;
use thiserror::Error;

/// Transaction lifecycle and submission errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionError {
    #[error("transaction {id} cannot {operation} in state {state:?}")]
    InvalidState {
        id: TransactionId,
        state: TransactionState,
        operation: &'static str,
    },

    #[error("transaction {id} depends on {dependency}, which has not committed")]
    DependencyNotCommitted {
        id: TransactionId,
        dependency: TransactionId,
    },

    #[error("transaction {id} depends on {dependency}, which was aborted")]
    DependencyAborted {
        id: TransactionId,
        dependency: TransactionId,
    },

    #[error("resource limit exceeded in {namespace}: {message}")]
    ResourceLimit {
        namespace: NamespaceId,
        message: String,
    },

    #[error("unknown namespace {0}")]
    UnknownNamespace(NamespaceId),

    #[error("transaction {id} failed validation with {} error(s)", .errors.len())]
    ValidationFailed {
        id: TransactionId,
        errors: Vec<ValidationError>,
    },

    #[error("transaction {} conflicts with {}", .0.tx_a, .0.tx_b)]
    Conflicting(Conflict),

    #[error("transaction queue is closed")]
    QueueClosed,

    #[error("unknown snapshot {0}")]
    UnknownSnapshot(SnapshotId),

    #[error("namespace {0} is not permitted to snapshot")]
    SnapshotDenied(NamespaceId),
}

/// Failures applying a patch to the in-memory state store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("entity {0} already exists")]
    EntityExists(EntityRef),

    #[error("entity {0} not found")]
    EntityNotFound(EntityRef),

    #[error("entity {entity} belongs to another namespace than {expected}")]
    ForeignEntity {
        entity: EntityRef,
        expected: NamespaceId,
    },

    #[error("component {component} already attached to {entity}")]
    ComponentExists { entity: EntityRef, component: String },

    #[error("component {component} not attached to {entity}")]
    ComponentNotFound { entity: EntityRef, component: String },

    #[error("cannot write path '{path}' of {component} on {entity}")]
    InvalidFieldPath {
        entity: EntityRef,
        component: String,
        path: String,
    },

    #[error("layer {0} already exists")]
    LayerExists(u32),

    #[error("layer {0} not found")]
    LayerNotFound(u32),

    #[error("parenting {entity} under {parent} would create a cycle")]
    HierarchyCycle { entity: EntityRef, parent: EntityRef },

    #[error("patch is missing its {0}")]
    MissingOperand(&'static str),

    #[error("{0}")]
    LimitExceeded(LimitBreach),

    #[error("patch handler rejected: {0}")]
    Rejected(String),
}

/// Patch bus errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchBusError {
    #[error("patch bus has been shut down")]
    ShutDown,
}

/// Hot-reload state transfer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotReloadError {
    #[error("incompatible state version {found} (supported up to {supported})")]
    Incompatible { found: u32, supported: u32 },

    #[error("corrupt {0} state")]
    Corrupt(&'static str),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}
