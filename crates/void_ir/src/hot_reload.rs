//! Hot-reload state transfer
//!
//! Stateful components are not subclassed for reload support. Instead any
//! [`WireFormat`] type is wrapped in a [`HotReload`] adapter, which exposes
//! the [`HotReloadable`] capability: serialize to bytes, restore from bytes,
//! and report which format versions it can read.

use crate::codec::{ByteReader, WireFormat};
use crate::error::HotReloadError;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// Capability of carrying state across a reload
pub trait HotReloadable {
    /// Serialize the current state
    fn snapshot(&self) -> Vec<u8>;

    /// Replace the current state with a serialized one. On error the
    /// current state is kept.
    fn restore(&mut self, bytes: &[u8]) -> Result<(), HotReloadError>;

    /// Whether state written at `version` can be restored
    fn is_compatible(&self, version: u32) -> bool;

    /// Called before the state is captured
    fn prepare_reload(&mut self) {}

    /// Called after the state was restored
    fn finish_reload(&mut self) {}
}

/// Read the `magic | version` header of a framed buffer
pub fn peek_header(bytes: &[u8]) -> Option<([u8; 4], u32)> {
    let magic: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    let version = ByteReader::new(bytes.get(4..)?).read_u32()?;
    Some((magic, version))
}

/// Adapter giving any wire-encodable value the reload capability
#[derive(Debug, Default)]
pub struct HotReload<T> {
    inner: T,
}

impl<T: WireFormat> HotReload<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for HotReload<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for HotReload<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: WireFormat> HotReloadable for HotReload<T> {
    fn snapshot(&self) -> Vec<u8> {
        self.inner.to_bytes()
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<(), HotReloadError> {
        let name = std::any::type_name::<T>();
        let (magic, version) = peek_header(bytes).ok_or(HotReloadError::Corrupt(name))?;
        if magic != T::MAGIC {
            return Err(HotReloadError::Corrupt(name));
        }
        if !self.is_compatible(version) {
            return Err(HotReloadError::Incompatible {
                found: version,
                supported: T::VERSION,
            });
        }
        self.inner = T::from_bytes(bytes).ok_or(HotReloadError::Corrupt(name))?;
        log::debug!("restored {} from {} bytes", name, bytes.len());
        Ok(())
    }

    fn is_compatible(&self, version: u32) -> bool {
        (1..=T::VERSION).contains(&version)
    }
}

/// Named set of reloadable components, captured and restored together
#[derive(Default)]
pub struct HotReloadRegistry {
    reloadables: BTreeMap<String, Box<dyn HotReloadable + Send>>,
}

impl HotReloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reloadable object
    pub fn register(&mut self, name: impl Into<String>, reloadable: Box<dyn HotReloadable + Send>) {
        self.reloadables.insert(name.into(), reloadable);
    }

    /// Unregister a reloadable object
    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn HotReloadable + Send>> {
        self.reloadables.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&(dyn HotReloadable + Send)> {
        self.reloadables.get(name).map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.reloadables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reloadables.is_empty()
    }

    /// Capture every registered component
    pub fn snapshot_all(&mut self) -> BTreeMap<String, Vec<u8>> {
        self.reloadables
            .iter_mut()
            .map(|(name, reloadable)| {
                reloadable.prepare_reload();
                (name.clone(), reloadable.snapshot())
            })
            .collect()
    }

    /// Restore every registered component that has saved state. Returns
    /// the failures; components without saved state are left untouched.
    pub fn restore_all(&mut self, states: &BTreeMap<String, Vec<u8>>) -> Vec<(String, HotReloadError)> {
        let mut failures = Vec::new();
        for (name, reloadable) in &mut self.reloadables {
            let Some(bytes) = states.get(name) else {
                log::warn!("no saved state for {}", name);
                continue;
            };
            match reloadable.restore(bytes) {
                Ok(()) => reloadable.finish_reload(),
                Err(err) => {
                    log::warn!("failed to restore {}: {}", name, err);
                    failures.push((name.clone(), err));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceRegistry;
    use crate::schema::{ComponentSchema, FieldDescriptor, FieldType, SchemaRegistry};

    fn registry() -> NamespaceRegistry {
        let mut namespaces = NamespaceRegistry::new();
        let game = namespaces.create("game");
        if let Some(ns) = namespaces.get_mut(game) {
            ns.allocate_entity();
            ns.allocate_entity();
        }
        namespaces
    }

    #[test]
    fn test_round_trip_through_adapter() {
        let source = HotReload::new(registry());
        let bytes = source.snapshot();
        assert_eq!(peek_header(&bytes), Some((*b"NREG", 1)));

        let mut target = HotReload::new(NamespaceRegistry::new());
        target.restore(&bytes).unwrap();
        assert_eq!(*target, *source);
    }

    #[test]
    fn test_restore_rejects_foreign_and_future_state() {
        let mut target = HotReload::new(registry());
        let before = target.snapshot();

        let schemas = HotReload::new(SchemaRegistry::new());
        assert_eq!(
            target.restore(&schemas.snapshot()),
            Err(HotReloadError::Corrupt(std::any::type_name::<NamespaceRegistry>()))
        );

        let mut future = before.clone();
        future[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(
            target.restore(&future),
            Err(HotReloadError::Incompatible { found: 9, supported: 1 })
        );

        assert!(target.restore(&before[..before.len() - 1]).is_err());
        assert!(target.restore(&[]).is_err());
        assert_eq!(target.snapshot(), before);
        assert!(target.is_compatible(1));
        assert!(!target.is_compatible(0));
    }

    #[test]
    fn test_registry_snapshot_and_restore() {
        let mut schemas = SchemaRegistry::new();
        schemas.register(ComponentSchema::new("Health").with_field(FieldDescriptor::new("hp", FieldType::Int)));

        let mut source = HotReloadRegistry::new();
        source.register("namespaces", Box::new(HotReload::new(registry())));
        source.register("schemas", Box::new(HotReload::new(schemas)));
        let saved = source.snapshot_all();
        assert_eq!(saved.len(), 2);

        let mut target = HotReloadRegistry::new();
        target.register("namespaces", Box::new(HotReload::new(NamespaceRegistry::new())));
        target.register("schemas", Box::new(HotReload::new(SchemaRegistry::new())));
        target.register("extra", Box::new(HotReload::new(SchemaRegistry::new())));
        assert!(target.restore_all(&saved).is_empty());

        let restored = target.get("schemas").map(|r| r.snapshot());
        assert_eq!(restored.as_ref(), saved.get("schemas"));
    }
}
