//! Patch validation - ensures patches are valid before they are queued
//!
//! This module checks patches in four independent steps:
//! - Namespace permission checks (flags and component allow/block lists)
//! - Schema presence (the field path must name a declared field)
//! - Value type and constraint checks
//! - Required-field checks on `Add`
//!
//! Every step runs for every patch and all problems are collected, so a
//! caller can report them in one pass. With a [`Namespace`] at hand,
//! [`PatchValidator::validate_for_namespace`] additionally checks
//! cross-namespace access and projects resource usage against the
//! namespace limits.

use crate::batch::PatchBatch;
use crate::namespace::{Namespace, NamespacePermissions, ResourceUsage};
use crate::patch::{AssetOp, ComponentOp, EntityOp, Patch};
use crate::schema::{ComponentSchema, FieldViolation, SchemaRegistry};
use crate::state::NamespaceState;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Category of a validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    PermissionDenied,
    UnknownField,
    TypeMismatch,
    ConstraintViolation,
    MissingRequiredField,
    ResourceLimitExceeded,
}

/// A single validation problem with enough context for a message
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub component_type: Option<String>,
    pub field_path: Option<String>,
    /// The offending value, when there is one
    pub value: Option<Value>,
    pub message: String,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            component_type: None,
            field_path: None,
            value: None,
            message: message.into(),
        }
    }

    fn on_component(mut self, component_type: &str) -> Self {
        self.component_type = Some(component_type.to_string());
        self
    }

    fn on_field(mut self, field_path: &str) -> Self {
        self.field_path = Some(field_path.to_string());
        self
    }

    fn with_value(mut self, value: &Value) -> Self {
        self.value = Some(value.clone());
        self
    }

    fn from_violation(violation: FieldViolation) -> Self {
        match violation {
            FieldViolation::Type { .. } => {
                Self::new(ValidationErrorKind::TypeMismatch, violation.to_string())
            }
            FieldViolation::Constraint(message) => {
                Self::new(ValidationErrorKind::ConstraintViolation, message)
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        match (&self.component_type, &self.field_path) {
            (Some(component), Some(field)) if !field.is_empty() => {
                write!(f, " at {}.{}", component, field)?
            }
            (Some(component), _) => write!(f, " at {}", component)?,
            _ => {}
        }
        write!(f, ": {}", self.message)?;
        if let Some(value) = &self.value {
            write!(f, " (got {:?})", value)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Outcome of validating a patch or batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// A result without errors
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.valid = self.errors.is_empty();
    }

    pub fn has_kind(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}

/// Validates patches against namespace permissions and registered schemas
#[derive(Debug, Clone, Default)]
pub struct PatchValidator {
    schemas: Arc<RwLock<SchemaRegistry>>,
}

impl PatchValidator {
    /// Create a validator with its own empty schema registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator over a shared registry
    pub fn with_registry(schemas: Arc<RwLock<SchemaRegistry>>) -> Self {
        Self { schemas }
    }

    /// The shared registry plugins register into
    pub fn registry(&self) -> &Arc<RwLock<SchemaRegistry>> {
        &self.schemas
    }

    /// Register a component schema
    pub fn register_schema(&self, schema: ComponentSchema) -> Option<ComponentSchema> {
        self.schemas.write().register(schema)
    }

    /// Validate a single patch
    pub fn validate(&self, patch: &Patch, permissions: &NamespacePermissions) -> ValidationResult {
        let schemas = self.schemas.read();
        let mut errors = Vec::new();
        check_permissions(patch, permissions, &mut errors);
        check_schema(patch, &schemas, &mut errors);
        ValidationResult::from_errors(errors)
    }

    /// Validate every patch of a batch, collecting all errors
    pub fn validate_batch(&self, batch: &PatchBatch, permissions: &NamespacePermissions) -> ValidationResult {
        let schemas = self.schemas.read();
        let mut errors = Vec::new();
        for patch in batch {
            check_permissions(patch, permissions, &mut errors);
            check_schema(patch, &schemas, &mut errors);
        }
        ValidationResult::from_errors(errors)
    }

    /// Validate a batch submitted by `namespace`.
    ///
    /// On top of [`PatchValidator::validate_batch`], patches may only target
    /// the namespace's own entities, foreign parents need cross-namespace
    /// permission, and the usage projected from `state` plus the batch (and
    /// one more pending transaction) must stay within the namespace limits.
    pub fn validate_for_namespace(
        &self,
        batch: &PatchBatch,
        namespace: &Namespace,
        state: Option<&NamespaceState>,
    ) -> ValidationResult {
        self.validate_for_namespace_with_pending(batch, namespace, state, &[])
    }

    /// Like [`PatchValidator::validate_for_namespace`], with the batches of
    /// the namespace's still queued transactions projected before `batch`.
    pub fn validate_for_namespace_with_pending(
        &self,
        batch: &PatchBatch,
        namespace: &Namespace,
        state: Option<&NamespaceState>,
        pending: &[PatchBatch],
    ) -> ValidationResult {
        let mut result = self.validate_batch(batch, &namespace.permissions);
        let mut errors = Vec::new();

        for patch in batch {
            if let Some(target) = patch.target_entity() {
                if !namespace.can_modify(target.namespace) {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::PermissionDenied,
                        format!("{} cannot modify entity {}", namespace.id, target),
                    ));
                }
            }
            if let Patch::Hierarchy(p) = patch {
                if let Some(parent) = p.parent {
                    if !namespace.can_access(parent.namespace) {
                        errors.push(ValidationError::new(
                            ValidationErrorKind::PermissionDenied,
                            format!("{} cannot reference entity {}", namespace.id, parent),
                        ));
                    }
                }
            }
        }

        let projected = pending.iter().chain(std::iter::once(batch));
        let (usage, max_components) = project_usage(projected, namespace, state);
        if let Some(breach) = namespace.limits.first_breach(&usage, max_components) {
            errors.push(ValidationError::new(
                ValidationErrorKind::ResourceLimitExceeded,
                breach.to_string(),
            ));
        }

        result.merge(ValidationResult::from_errors(errors));
        result
    }
}

fn check_permissions(patch: &Patch, permissions: &NamespacePermissions, errors: &mut Vec<ValidationError>) {
    let denied = |message: String| ValidationError::new(ValidationErrorKind::PermissionDenied, message);

    match patch {
        Patch::Entity(p) => match p.op {
            EntityOp::Create if !permissions.can_create_entities => {
                errors.push(denied(format!("creating entity {} is not permitted", p.entity)))
            }
            EntityOp::Destroy if !permissions.can_delete_entities => {
                errors.push(denied(format!("destroying entity {} is not permitted", p.entity)))
            }
            _ => {}
        },
        Patch::Layer(p) if !permissions.can_modify_layers => {
            errors.push(denied(format!("editing layer {} is not permitted", p.layer_id)))
        }
        Patch::Hierarchy(p) if !permissions.can_modify_hierarchy => {
            errors.push(denied(format!("editing the hierarchy of {} is not permitted", p.entity)))
        }
        Patch::Layer(_) | Patch::Hierarchy(_) => {}
        _ => {
            if let Some(component) = patch.component_type() {
                if !permissions.can_modify_components {
                    errors.push(denied("modifying components is not permitted".to_string()).on_component(component));
                } else if !permissions.allows_component(component) {
                    errors.push(
                        denied("component type is not allowed in this namespace".to_string())
                            .on_component(component),
                    );
                }
            }
        }
    }
}

/// Field writes a patch performs, for checking against a schema
enum SchemaTarget<'a> {
    /// A whole component value (`Add`, custom data)
    Whole(&'a str, &'a Value),
    /// A value at a path inside a component
    Field(&'a str, &'a str, &'a Value),
}

fn schema_target(patch: &Patch) -> Option<SchemaTarget<'_>> {
    match patch {
        Patch::Component(p) => match p.op {
            ComponentOp::Add => Some(SchemaTarget::Whole(&p.component, &p.value)),
            ComponentOp::SetField => Some(SchemaTarget::Field(&p.component, &p.field_path, &p.value)),
            ComponentOp::Remove => None,
        },
        Patch::Transform(p) => Some(SchemaTarget::Field(
            crate::patch::TRANSFORM_COMPONENT,
            p.property.field_name(),
            &p.value,
        )),
        Patch::Camera(p) => Some(SchemaTarget::Field(
            crate::patch::CAMERA_COMPONENT,
            p.property.field_name(),
            &p.value,
        )),
        // Custom data replaces the whole value stored under its type name
        Patch::Custom(p) => Some(SchemaTarget::Whole(&p.type_name, &p.data)),
        Patch::Asset(_) | Patch::Entity(_) | Patch::Layer(_) | Patch::Hierarchy(_) => None,
    }
}

fn check_schema(patch: &Patch, schemas: &SchemaRegistry, errors: &mut Vec<ValidationError>) {
    if let Patch::Asset(p) = patch {
        // Asset bindings only need the field to exist and hold asset refs
        if p.op == AssetOp::Reload {
            return;
        }
        if let Some(schema) = schemas.get(&p.component) {
            let value = match p.op {
                AssetOp::Load => Value::AssetRef(p.asset.clone()),
                _ => Value::Null,
            };
            check_field(schema, schemas, &p.field, &value, errors);
        }
        return;
    }

    match schema_target(patch) {
        Some(SchemaTarget::Whole(component, value)) => {
            if let Some(schema) = schemas.get(component) {
                check_object(schema, schemas, value, errors);
                check_required(schema, value, errors);
            }
        }
        Some(SchemaTarget::Field(component, path, value)) => {
            if let Some(schema) = schemas.get(component) {
                if path.is_empty() {
                    check_object(schema, schemas, value, errors);
                } else {
                    check_field(schema, schemas, path, value, errors);
                }
            }
        }
        None => {}
    }
}

/// Every key of an object value must be a declared field with a valid value
fn check_object(
    schema: &ComponentSchema,
    schemas: &SchemaRegistry,
    value: &Value,
    errors: &mut Vec<ValidationError>,
) {
    match value.as_object() {
        Some(fields) => {
            for (name, field_value) in fields {
                check_field(schema, schemas, name, field_value, errors);
            }
        }
        None => errors.push(
            ValidationError::new(
                ValidationErrorKind::TypeMismatch,
                format!("component value must be an Object, found {}", value.type_name()),
            )
            .on_component(&schema.type_name)
            .with_value(value),
        ),
    }
}

fn check_field(
    schema: &ComponentSchema,
    schemas: &SchemaRegistry,
    path: &str,
    value: &Value,
    errors: &mut Vec<ValidationError>,
) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let Some(field) = schema.field(head) else {
        errors.push(
            ValidationError::new(
                ValidationErrorKind::UnknownField,
                format!("{} has no field '{}'", schema.type_name, head),
            )
            .on_component(&schema.type_name)
            .on_field(path),
        );
        return;
    };

    if rest.is_some() {
        // Below the first segment only nested fields are addressable
        if !field.field_type.is_nested() {
            errors.push(
                ValidationError::new(
                    ValidationErrorKind::UnknownField,
                    format!("field '{}' is {:?} and has no sub-fields", head, field.field_type),
                )
                .on_component(&schema.type_name)
                .on_field(path),
            );
        }
        return;
    }

    if let Err(violation) = schemas.check_field(field, value) {
        errors.push(
            ValidationError::from_violation(violation)
                .on_component(&schema.type_name)
                .on_field(path)
                .with_value(value),
        );
    }
}

fn check_required(schema: &ComponentSchema, value: &Value, errors: &mut Vec<ValidationError>) {
    let supplied = value.as_object();
    for field in schema.required_fields() {
        let present = supplied.map_or(false, |fields| fields.contains_key(&field.name));
        if !present && field.default.is_none() {
            errors.push(
                ValidationError::new(
                    ValidationErrorKind::MissingRequiredField,
                    format!("required field '{}' is missing", field.name),
                )
                .on_component(&schema.type_name)
                .on_field(&field.name),
            );
        }
    }
}

/// Usage after applying `batches` in order on top of `state`, assuming they
/// all succeed. Returns the projection and the component count of the
/// fullest entity.
fn project_usage<'a>(
    batches: impl Iterator<Item = &'a PatchBatch>,
    namespace: &Namespace,
    state: Option<&NamespaceState>,
) -> (ResourceUsage, u32) {
    let mut entities: BTreeMap<u64, BTreeSet<String>> = state
        .map(|s| {
            s.entities()
                .map(|(id, record)| (*id, record.components.keys().cloned().collect()))
                .collect()
        })
        .unwrap_or_default();
    let mut memory = state.map_or(namespace.usage.memory_bytes, |s| s.memory_bytes());

    for patch in batches.flat_map(PatchBatch::iter) {
        let Some(target) = patch.target_entity() else {
            continue;
        };
        if target.namespace != namespace.id {
            continue;
        }
        match patch {
            Patch::Entity(p) => match p.op {
                EntityOp::Create => {
                    entities.entry(p.entity.entity_id).or_default();
                }
                EntityOp::Destroy => {
                    entities.remove(&p.entity.entity_id);
                }
                EntityOp::Rename => {}
            },
            Patch::Component(p) if p.op == ComponentOp::Remove => {
                if let Some(components) = entities.get_mut(&p.entity.entity_id) {
                    components.remove(&p.component);
                }
            }
            Patch::Layer(_) | Patch::Hierarchy(_) => {}
            Patch::Asset(p) if p.op == AssetOp::Reload => {}
            _ => {
                if let Some(component) = patch.component_type() {
                    entities
                        .entry(target.entity_id)
                        .or_default()
                        .insert(component.to_string());
                }
            }
        }
        if let Patch::Component(p) = patch {
            memory = memory.saturating_add(p.value.estimated_size() as u64);
        }
        if let Patch::Custom(p) = patch {
            memory = memory.saturating_add(p.data.estimated_size() as u64);
        }
    }

    let usage = ResourceUsage {
        entity_count: entities.len() as u32,
        component_count: entities.values().map(|c| c.len() as u32).sum(),
        memory_bytes: memory,
        pending_transactions: namespace.usage.pending_transactions.saturating_add(1),
        snapshot_count: namespace.usage.snapshot_count,
    };
    let max_components = entities.values().map(|c| c.len() as u32).max().unwrap_or(0);
    (usage, max_components)
}
