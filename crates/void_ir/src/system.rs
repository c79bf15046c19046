//! The IR system - namespaces, queue, state and buses wired together
//!
//! [`IrSystem`] is the single entry point producers and the applier share:
//!
//! ```text
//! producer ──► submit ──► validate ──► conflict check ──► queue
//!                                                           │
//!            buses ◄── publish ◄── commit ◄── stage ◄── apply_pending
//! ```
//!
//! Application is staged: each transaction runs against a clone of its
//! namespace state, and the clone replaces the live state only when every
//! patch succeeded. A failed transaction therefore never leaves a partial
//! write behind.
//!
//! Locks are always taken in the order namespaces, store, snapshots. The
//! applier mutex serializes `apply_pending` and `rollback_to`.

use crate::batch::{BatchOptimizer, PatchBatch};
use crate::bus::{AsyncPatchBus, PatchBus};
use crate::codec::{ByteReader, ByteWriter, WireFormat};
use crate::config::IrConfig;
use crate::conflict::{Conflict, ConflictDetector};
use crate::error::{HotReloadError, StateError, TransactionError};
use crate::hot_reload::{peek_header, HotReloadable};
use crate::namespace::{
    Namespace, NamespaceId, NamespacePermissions, NamespaceRegistry, ResourceLimits, ResourceUsage,
};
use crate::patch::{EntityRef, Patch};
use crate::schema::{ComponentSchema, SchemaRegistry};
use crate::snapshot::{Snapshot, SnapshotDelta, SnapshotId, SnapshotManager};
use crate::state::{NamespaceState, StateStore};
use crate::transaction::{
    apply_transaction, Transaction, TransactionBuilder, TransactionId, TransactionIdAllocator,
    TransactionQueue, TransactionResult, TransactionState,
};
use crate::validation::PatchValidator;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// What the system remembers about a finished transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub namespace: NamespaceId,
    /// Terminal state the transaction ended in
    pub state: TransactionState,
    pub applied_count: usize,
    pub error: Option<String>,
    /// Snapshot captured before application, or the target of a rollback
    pub snapshot: Option<SnapshotId>,
}

impl TransactionRecord {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u64(self.id.raw());
        w.write_u32(self.namespace.raw());
        w.write_u8(self.state.tag());
        w.write_u64(self.applied_count as u64);
        w.write_option(self.error.as_ref(), |w, e| w.write_str(e));
        w.write_option(self.snapshot.as_ref(), |w, s| w.write_u64(s.raw()));
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        let id = TransactionId::from_raw(r.read_u64()?);
        let namespace = NamespaceId::from_raw(r.read_u32()?);
        let state = TransactionState::from_tag(r.read_u8()?)?;
        if !state.is_terminal() {
            return None;
        }
        Some(Self {
            id,
            namespace,
            state,
            applied_count: usize::try_from(r.read_u64()?).ok()?,
            error: r.read_option(ByteReader::read_string)?,
            snapshot: r.read_option(|r| r.read_u64().map(SnapshotId::from_raw))?,
        })
    }
}

/// Transactional store of namespaced IR state
pub struct IrSystem {
    config: IrConfig,
    transaction_ids: TransactionIdAllocator,
    namespaces: RwLock<NamespaceRegistry>,
    validator: PatchValidator,
    queue: TransactionQueue,
    conflicts: ConflictDetector,
    store: RwLock<StateStore>,
    snapshots: Mutex<SnapshotManager>,
    history: Mutex<VecDeque<TransactionRecord>>,
    bus: PatchBus,
    async_bus: AsyncPatchBus,
    applier: Mutex<()>,
    closed: AtomicBool,
}

impl IrSystem {
    const MAGIC: [u8; 4] = *b"IRSY";
    const VERSION: u32 = 1;

    pub fn new(config: IrConfig) -> Self {
        let snapshots = SnapshotManager::new(config.max_snapshots);
        Self {
            config,
            transaction_ids: TransactionIdAllocator::new(),
            namespaces: RwLock::new(NamespaceRegistry::new()),
            validator: PatchValidator::new(),
            queue: TransactionQueue::new(),
            conflicts: ConflictDetector::new(),
            store: RwLock::new(StateStore::new()),
            snapshots: Mutex::new(snapshots),
            history: Mutex::new(VecDeque::new()),
            bus: PatchBus::new(),
            async_bus: AsyncPatchBus::new(),
            applier: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &IrConfig {
        &self.config
    }

    // ========================================================================
    // Namespaces and schemas
    // ========================================================================

    /// Register a namespace with default permissions and limits
    pub fn create_namespace(&self, name: impl Into<String>) -> NamespaceId {
        self.create_namespace_with(name, NamespacePermissions::default(), ResourceLimits::default())
    }

    pub fn create_namespace_with(
        &self,
        name: impl Into<String>,
        permissions: NamespacePermissions,
        limits: ResourceLimits,
    ) -> NamespaceId {
        let mut namespaces = self.namespaces.write();
        let id = namespaces.create_with(name, permissions, limits);
        self.store.write().insert(NamespaceState::new(id));
        id
    }

    /// A copy of the namespace record, usage included
    pub fn namespace(&self, id: NamespaceId) -> Option<Namespace> {
        self.namespaces.read().get(id).cloned()
    }

    pub fn find_namespace(&self, name: &str) -> Option<NamespaceId> {
        self.namespaces.read().find_by_name(name).map(|ns| ns.id)
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.read().len()
    }

    /// Mint a fresh entity reference owned by `namespace`
    pub fn allocate_entity(&self, namespace: NamespaceId) -> Result<EntityRef, TransactionError> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or(TransactionError::UnknownNamespace(namespace))?;
        Ok(EntityRef::new(namespace, ns.allocate_entity()))
    }

    /// Register a component schema used by submit-time validation
    pub fn register_schema(&self, schema: ComponentSchema) -> Option<ComponentSchema> {
        self.validator.register_schema(schema)
    }

    pub fn validator(&self) -> &PatchValidator {
        &self.validator
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Start building a transaction with a freshly allocated id
    pub fn begin(&self, namespace: NamespaceId) -> TransactionBuilder {
        TransactionBuilder::new(self.transaction_ids.allocate(), namespace)
    }

    /// Validate and enqueue a transaction.
    ///
    /// A transaction still in `Building` is submitted first. On error the
    /// transaction is dropped and nothing is queued or tracked.
    pub fn submit(&self, mut tx: Transaction) -> Result<TransactionId, TransactionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransactionError::QueueClosed);
        }
        if tx.state() == TransactionState::Building {
            tx.submit()?;
        }
        if tx.state() != TransactionState::Pending {
            return Err(TransactionError::InvalidState {
                id: tx.id(),
                state: tx.state(),
                operation: "be submitted",
            });
        }

        let id = tx.id();
        let namespace_id = tx.namespace();
        // Ids minted elsewhere must never be handed out again
        self.transaction_ids.advance_past(id);

        if tx.len() > self.config.max_patches_per_transaction {
            return Err(TransactionError::ResourceLimit {
                namespace: namespace_id,
                message: format!(
                    "{} patches exceed the per-transaction maximum of {}",
                    tx.len(),
                    self.config.max_patches_per_transaction
                ),
            });
        }

        if self.config.optimize_on_submit {
            let stats = tx.optimize(&BatchOptimizer::new(self.config.optimizer))?;
            log::debug!(
                "{} optimized: {} -> {} patch(es)",
                id,
                stats.original_count,
                stats.optimized_count
            );
        }

        // Held until the transaction is queued so concurrent submitters see
        // each other's pending count
        let mut namespaces = self.namespaces.write();
        let namespace = namespaces
            .get_mut(namespace_id)
            .ok_or(TransactionError::UnknownNamespace(namespace_id))?;

        if self.config.validate_on_submit {
            let store = self.store.read();
            let queued = self.queue.batches_for(namespace_id);
            let result = self.validator.validate_for_namespace_with_pending(
                tx.batch(),
                namespace,
                store.get(namespace_id),
                &queued,
            );
            if !result.valid {
                log::warn!("{} rejected: {} validation error(s)", id, result.errors.len());
                return Err(TransactionError::ValidationFailed {
                    id,
                    errors: result.errors,
                });
            }
        }

        if self.config.detect_conflicts {
            if let Some(conflict) = self.conflicts.check(&tx) {
                if self.config.reject_conflicting {
                    log::warn!("{} rejected: {}", id, conflict);
                    return Err(TransactionError::Conflicting(conflict));
                }
                log::warn!("{}", conflict);
            }
            self.conflicts.track(&tx);
        }

        if let Err(err) = self.queue.enqueue(tx) {
            self.conflicts.untrack(id);
            return Err(err);
        }
        namespace.usage.pending_transactions += 1;
        log::debug!("{} queued for {}", id, namespace_id);
        Ok(id)
    }

    /// Submit a single patch as its own transaction
    pub fn submit_patch(&self, namespace: NamespaceId, patch: Patch) -> Result<TransactionId, TransactionError> {
        self.submit(self.begin(namespace).patch(patch).build())
    }

    // ========================================================================
    // Application
    // ========================================================================

    /// Apply up to `max` queued transactions in submission order.
    ///
    /// A transaction whose dependencies are still queued is skipped until
    /// they have been applied; one whose dependencies ended in failure, or
    /// were never submitted, fails without touching state.
    pub fn apply_pending(&self, max: usize) -> Vec<TransactionResult> {
        let _applier = self.applier.lock();
        let mut results = Vec::new();

        while results.len() < max {
            let queued: HashSet<TransactionId> = self.queue.ids().into_iter().collect();
            let next = self.queue.dequeue_where(|tx| {
                tx.dependencies()
                    .all(|dep| dep == tx.id() || !queued.contains(&dep))
            });
            let Some(tx) = next else {
                break;
            };
            results.push(self.apply_one(tx));
        }

        if !results.is_empty() {
            log::debug!(
                "applied {} transaction(s), {} still queued",
                results.len(),
                self.queue.size()
            );
        }
        results
    }

    /// Apply everything that can currently be applied
    pub fn apply_all(&self) -> Vec<TransactionResult> {
        self.apply_pending(usize::MAX)
    }

    fn apply_one(&self, mut tx: Transaction) -> TransactionResult {
        let id = tx.id();
        let namespace_id = tx.namespace();

        let limits = {
            let mut namespaces = self.namespaces.write();
            namespaces.get_mut(namespace_id).map(|ns| {
                ns.usage.pending_transactions = ns.usage.pending_transactions.saturating_sub(1);
                ns.limits.clone()
            })
        };
        let limits = limits.unwrap_or_else(ResourceLimits::unlimited);
        let snapshot_cap = limits.max_snapshots;

        if let Err(err) = tx.begin_apply() {
            let result = TransactionResult::failed(id, tx.state(), err.to_string());
            return self.finish(&tx, result);
        }

        if let Some(err) = self.dependency_error(&tx) {
            let message = err.to_string();
            log::warn!("{}", message);
            let _ = tx.fail(message.clone());
            let result = TransactionResult::failed(id, TransactionState::Failed, message);
            return self.finish(&tx, result);
        }

        let mut staged = self
            .store
            .read()
            .get(namespace_id)
            .cloned()
            .unwrap_or_else(|| NamespaceState::new(namespace_id));

        if self.config.snapshot_before_apply {
            let snapshot = self
                .snapshots
                .lock()
                .create_capped(&staged, format!("before {}", id), snapshot_cap);
            let _ = tx.set_rollback_snapshot(snapshot);
        }

        // Queued work was projected optimistically at submit, so the limits
        // are enforced again on the final staged state
        let last = tx.len().saturating_sub(1);
        let result = apply_transaction(&mut tx, |index, patch| {
            staged.apply(patch)?;
            if index == last {
                let usage = staged.usage(&ResourceUsage::default());
                let fullest = staged.max_components_per_entity() as u32;
                if let Some(breach) = limits.first_breach(&usage, fullest) {
                    return Err(StateError::LimitExceeded(breach));
                }
            }
            Ok(())
        });

        if result.is_success() {
            let mut namespaces = self.namespaces.write();
            let mut store = self.store.write();
            let snapshot_count = self.snapshots.lock().count_for(namespace_id) as u32;
            if let Some(ns) = namespaces.get_mut(namespace_id) {
                let mut usage = staged.usage(&ns.usage);
                usage.snapshot_count = snapshot_count;
                ns.update_usage(usage);
            }
            store.insert(staged);
            drop(store);
            drop(namespaces);

            if self.config.publish_committed {
                self.publish(tx.batch(), namespace_id, id);
            }
        } else {
            self.refresh_snapshot_count(namespace_id);
        }

        self.finish(&tx, result)
    }

    fn dependency_error(&self, tx: &Transaction) -> Option<TransactionError> {
        for dependency in tx.dependencies() {
            match self.transaction_state(dependency) {
                Some(TransactionState::Committed) => {}
                Some(TransactionState::RolledBack | TransactionState::Failed) => {
                    return Some(TransactionError::DependencyAborted {
                        id: tx.id(),
                        dependency,
                    })
                }
                _ => {
                    return Some(TransactionError::DependencyNotCommitted {
                        id: tx.id(),
                        dependency,
                    })
                }
            }
        }
        None
    }

    fn publish(&self, batch: &PatchBatch, namespace: NamespaceId, transaction: TransactionId) {
        if let Err(err) = self.bus.publish_batch(batch, namespace, transaction) {
            log::debug!("{} not published: {}", transaction, err);
        }
        if let Err(err) = self.async_bus.publish_batch(batch, namespace, transaction) {
            log::debug!("{} not queued for async consumers: {}", transaction, err);
        }
    }

    fn refresh_snapshot_count(&self, namespace: NamespaceId) {
        let mut namespaces = self.namespaces.write();
        let count = self.snapshots.lock().count_for(namespace) as u32;
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.usage.snapshot_count = count;
        }
    }

    fn finish(&self, tx: &Transaction, result: TransactionResult) -> TransactionResult {
        self.conflicts.untrack(tx.id());
        self.record(TransactionRecord {
            id: tx.id(),
            namespace: tx.namespace(),
            state: result.state,
            applied_count: result.applied_count,
            error: result.error.clone(),
            snapshot: tx.rollback_snapshot(),
        });
        result
    }

    fn record(&self, record: TransactionRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.config.history_len.max(1) {
            history.pop_front();
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current state of a transaction this system has seen.
    ///
    /// Finished transactions are remembered up to `history_len`; older ones
    /// return `None`.
    pub fn transaction_state(&self, id: TransactionId) -> Option<TransactionState> {
        if let Some(record) = self.transaction(id) {
            return Some(record.state);
        }
        self.queue.contains(id).then_some(TransactionState::Pending)
    }

    /// History entry of a finished transaction
    pub fn transaction(&self, id: TransactionId) -> Option<TransactionRecord> {
        self.history.lock().iter().rev().find(|r| r.id == id).cloned()
    }

    /// Every conflicting pair among queued transactions
    pub fn check_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.detect()
    }

    /// Number of queued transactions
    pub fn pending_count(&self) -> usize {
        self.queue.size()
    }

    /// Run `f` against a namespace's live state
    pub fn read_state<R>(&self, namespace: NamespaceId, f: impl FnOnce(&NamespaceState) -> R) -> Option<R> {
        self.store.read().get(namespace).map(f)
    }

    /// A copy of a namespace's live state
    pub fn state(&self, namespace: NamespaceId) -> Option<NamespaceState> {
        self.store.read().get(namespace).cloned()
    }

    pub fn bus(&self) -> &PatchBus {
        &self.bus
    }

    pub fn async_bus(&self) -> &AsyncPatchBus {
        &self.async_bus
    }

    pub fn conflicts(&self) -> &ConflictDetector {
        &self.conflicts
    }

    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Capture a namespace's live state
    pub fn snapshot(&self, namespace: NamespaceId, description: impl Into<String>) -> Result<SnapshotId, TransactionError> {
        let cap = {
            let namespaces = self.namespaces.read();
            let ns = namespaces
                .get(namespace)
                .ok_or(TransactionError::UnknownNamespace(namespace))?;
            if !ns.permissions.can_snapshot {
                return Err(TransactionError::SnapshotDenied(namespace));
            }
            ns.limits.max_snapshots
        };

        let id = {
            let store = self.store.read();
            let empty;
            let state = match store.get(namespace) {
                Some(state) => state,
                None => {
                    empty = NamespaceState::new(namespace);
                    &empty
                }
            };
            self.snapshots.lock().create_capped(state, description, cap)
        };
        self.refresh_snapshot_count(namespace);
        log::debug!("captured {} for {}", id, namespace);
        Ok(id)
    }

    /// A copy of a retained snapshot
    pub fn get_snapshot(&self, id: SnapshotId) -> Option<Snapshot> {
        self.snapshots.lock().get(id).cloned()
    }

    /// Restore a namespace to a retained snapshot.
    ///
    /// The patches that undo the changes since the snapshot are published
    /// like a committed transaction, under a fresh transaction id, and
    /// returned as a delta.
    pub fn rollback_to(&self, snapshot: SnapshotId) -> Result<SnapshotDelta, TransactionError> {
        let _applier = self.applier.lock();

        let target = self
            .snapshots
            .lock()
            .get(snapshot)
            .map(Snapshot::to_state)
            .ok_or(TransactionError::UnknownSnapshot(snapshot))?;
        let namespace_id = target.namespace();

        let id = self.transaction_ids.allocate();
        let delta = {
            let mut namespaces = self.namespaces.write();
            let ns = namespaces
                .get_mut(namespace_id)
                .ok_or(TransactionError::UnknownNamespace(namespace_id))?;
            if !ns.permissions.can_snapshot {
                return Err(TransactionError::SnapshotDenied(namespace_id));
            }

            let mut store = self.store.write();
            let current = store
                .get(namespace_id)
                .cloned()
                .unwrap_or_else(|| NamespaceState::new(namespace_id));
            let delta = SnapshotDelta::between(&current, &target)
                .ok_or(TransactionError::UnknownSnapshot(snapshot))?;
            let usage = target.usage(&ns.usage);
            ns.update_usage(usage);
            store.insert(target);
            delta
        };

        if self.config.publish_committed && !delta.is_empty() {
            self.publish(&delta.to_patches(), namespace_id, id);
        }
        self.record(TransactionRecord {
            id,
            namespace: namespace_id,
            state: TransactionState::Committed,
            applied_count: delta.len(),
            error: None,
            snapshot: Some(snapshot),
        });
        log::info!("{} rolled back to {} ({} patch(es))", namespace_id, snapshot, delta.len());
        Ok(delta)
    }

    /// Close the queue and both buses. Queued transactions stay queued
    /// and can still be applied; new submissions are refused.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.bus.shutdown();
        let discarded = self.async_bus.shutdown();
        log::debug!("IR system shut down; {} async event(s) discarded", discarded);
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Hot reload
    // ========================================================================

    fn decode_state(bytes: &[u8]) -> Option<DecodedState> {
        let mut r = ByteReader::new(bytes);
        r.read_header(Self::MAGIC, Self::VERSION)?;
        let next_transaction = r.read_u64()?;
        let namespaces = NamespaceRegistry::from_bytes(&r.read_bytes()?)?;
        let schemas = SchemaRegistry::from_bytes(&r.read_bytes()?)?;
        let queue = TransactionQueue::from_bytes(&r.read_bytes()?)?;
        let conflicts = ConflictDetector::from_bytes(&r.read_bytes()?)?;
        let bus = PatchBus::from_bytes(&r.read_bytes()?)?;
        let async_bus = AsyncPatchBus::from_bytes(&r.read_bytes()?)?;
        let states = r.read_seq(NamespaceState::decode)?;
        let history = r.read_seq(TransactionRecord::decode)?;
        let closed = r.read_bool()?;
        if !r.is_exhausted() {
            return None;
        }

        let mut store = StateStore::new();
        for state in states {
            store.insert(state);
        }
        Some(DecodedState {
            next_transaction,
            namespaces,
            schemas,
            queue,
            conflicts,
            bus,
            async_bus,
            store,
            history: history.into(),
            closed,
        })
    }
}

impl Default for IrSystem {
    fn default() -> Self {
        Self::new(IrConfig::default())
    }
}

impl std::fmt::Debug for IrSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrSystem")
            .field("namespaces", &self.namespace_count())
            .field("pending", &self.queue.size())
            .field("snapshots", &self.snapshots.lock().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

struct DecodedState {
    next_transaction: u64,
    namespaces: NamespaceRegistry,
    schemas: SchemaRegistry,
    queue: TransactionQueue,
    conflicts: ConflictDetector,
    bus: PatchBus,
    async_bus: AsyncPatchBus,
    store: StateStore,
    history: VecDeque<TransactionRecord>,
    closed: bool,
}

/// Captured with `HotReloadable::snapshot(&system)`; the inherent
/// `snapshot` captures namespace state instead.
///
/// Carries namespaces, schemas, queued transactions, tracked footprints,
/// bus counters, the async backlog, live state and history. Retained
/// snapshots are not carried; subscribers must subscribe again on the new
/// bus.
impl HotReloadable for IrSystem {
    fn snapshot(&self) -> Vec<u8> {
        let _applier = self.applier.lock();
        let mut w = ByteWriter::new();
        w.write_header(Self::MAGIC, Self::VERSION);
        w.write_u64(self.transaction_ids.peek().raw());
        w.write_bytes(&self.namespaces.read().to_bytes());
        w.write_bytes(&self.validator.registry().read().to_bytes());
        w.write_bytes(&self.queue.to_bytes());
        w.write_bytes(&self.conflicts.to_bytes());
        w.write_bytes(&self.bus.to_bytes());
        w.write_bytes(&self.async_bus.to_bytes());
        let store = self.store.read();
        let states: Vec<&NamespaceState> = store.iter().collect();
        w.write_seq(&states, |w, state| state.encode(w));
        let history = self.history.lock();
        w.write_seq(history.iter(), |w, record| record.encode(w));
        w.write_bool(self.is_shut_down());
        w.into_bytes()
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<(), HotReloadError> {
        let (magic, version) = peek_header(bytes).ok_or(HotReloadError::Corrupt("IrSystem"))?;
        if magic != Self::MAGIC {
            return Err(HotReloadError::Corrupt("IrSystem"));
        }
        if !self.is_compatible(version) {
            return Err(HotReloadError::Incompatible {
                found: version,
                supported: Self::VERSION,
            });
        }
        let decoded = Self::decode_state(bytes).ok_or(HotReloadError::Corrupt("IrSystem"))?;

        self.transaction_ids = TransactionIdAllocator::new();
        self.transaction_ids
            .advance_past(TransactionId::from_raw(decoded.next_transaction.saturating_sub(1)));
        *self.namespaces.get_mut() = decoded.namespaces;
        *self.validator.registry().write() = decoded.schemas;
        self.queue = decoded.queue;
        self.conflicts = decoded.conflicts;
        self.bus = decoded.bus;
        self.async_bus = decoded.async_bus;
        *self.store.get_mut() = decoded.store;
        *self.history.get_mut() = decoded.history;
        *self.snapshots.get_mut() = SnapshotManager::new(self.config.max_snapshots);
        self.closed = AtomicBool::new(decoded.closed);

        for ns in self.namespaces.get_mut().iter_mut() {
            ns.usage.snapshot_count = 0;
        }
        log::debug!("IR system restored from {} bytes", bytes.len());
        Ok(())
    }

    fn is_compatible(&self, version: u32) -> bool {
        (1..=Self::VERSION).contains(&version)
    }
}
