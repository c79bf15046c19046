//! Transactions - atomic batches of patches
//!
//! Transactions group patches that should succeed or fail together.
//! Lifecycle:
//!
//! ```text
//! Building -> Pending -> Applying -> Committed | RolledBack | Failed
//! ```
//!
//! Only `Building` accepts new patches or dependencies. The terminal
//! transitions are reachable only from `Applying` and are no-ops once the
//! transaction is already terminal.

use crate::batch::{BatchOptimizer, OptimizationStats, PatchBatch};
use crate::codec::{wire_enum, ByteReader, ByteWriter, WireFormat};
use crate::error::TransactionError;
use crate::namespace::NamespaceId;
use crate::patch::Patch;
use crate::snapshot::SnapshotId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// The sentinel id no allocator ever hands out
    pub const fn invalid() -> Self {
        Self(0)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Create from a raw value (deserialization only)
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Hands out strictly increasing transaction ids, starting at 1
#[derive(Debug)]
pub struct TransactionIdAllocator {
    next: AtomicU64,
}

impl TransactionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id
    pub fn allocate(&self) -> TransactionId {
        TransactionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The id the next call to `allocate` returns
    pub fn peek(&self) -> TransactionId {
        TransactionId(self.next.load(Ordering::Relaxed))
    }

    /// Make sure `id` is never handed out again
    pub fn advance_past(&self, id: TransactionId) {
        self.next.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for TransactionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

wire_enum! {
    /// The state of a transaction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum TransactionState {
        /// Transaction is being built
        Building = 0,
        /// Transaction is queued for application
        Pending = 1,
        /// Transaction is being applied
        Applying = 2,
        /// Transaction was successfully applied
        Committed = 3,
        /// A patch failed and the transaction was rolled back
        RolledBack = 4,
        /// The transaction could not be applied at all
        Failed = 5,
    }
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

/// Descriptive data attached to a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Human-readable description for debugging
    pub description: String,
    /// Producer that built the transaction (plugin, loader, editor...)
    pub source: String,
    /// Higher is more important; informational for schedulers
    pub priority: i32,
}

/// A batch of patches that are applied atomically
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: TransactionId,
    namespace: NamespaceId,
    metadata: TransactionMetadata,
    frame: u64,
    dependencies: BTreeSet<TransactionId>,
    batch: PatchBatch,
    state: TransactionState,
    rollback_snapshot: Option<SnapshotId>,
    error: Option<String>,
}

impl Transaction {
    /// Create a new empty transaction in `Building` state
    pub fn new(id: TransactionId, namespace: NamespaceId) -> Self {
        Self {
            id,
            namespace,
            metadata: TransactionMetadata::default(),
            frame: 0,
            dependencies: BTreeSet::new(),
            batch: PatchBatch::new(),
            state: TransactionState::Building,
            rollback_snapshot: None,
            error: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The namespace that created this transaction
    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.metadata
    }

    /// Frame number the transaction was built for
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn dependencies(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.dependencies.iter().copied()
    }

    pub fn batch(&self) -> &PatchBatch {
        &self.batch
    }

    pub fn patches(&self) -> &[Patch] {
        self.batch.patches()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Snapshot taken before application, if any
    pub fn rollback_snapshot(&self) -> Option<SnapshotId> {
        self.rollback_snapshot
    }

    /// Failure reason; only set in `Failed`
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Get the number of patches
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn invalid(&self, operation: &'static str) -> TransactionError {
        TransactionError::InvalidState {
            id: self.id,
            state: self.state,
            operation,
        }
    }

    fn require(&self, state: TransactionState, operation: &'static str) -> Result<(), TransactionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    /// Add a patch to the transaction
    pub fn add_patch(&mut self, patch: Patch) -> Result<(), TransactionError> {
        self.require(TransactionState::Building, "add a patch")?;
        self.batch.push(patch);
        Ok(())
    }

    /// Add a dependency on another transaction
    pub fn add_dependency(&mut self, other: TransactionId) -> Result<(), TransactionError> {
        self.require(TransactionState::Building, "add a dependency")?;
        self.dependencies.insert(other);
        Ok(())
    }

    /// Replace the metadata while still building
    pub fn set_metadata(&mut self, metadata: TransactionMetadata) -> Result<(), TransactionError> {
        self.require(TransactionState::Building, "change metadata")?;
        self.metadata = metadata;
        Ok(())
    }

    /// Rewrite the batch through an optimizer. Allowed until application
    /// starts; the rewrite preserves the batch's final state.
    pub fn optimize(&mut self, optimizer: &BatchOptimizer) -> Result<OptimizationStats, TransactionError> {
        if !matches!(self.state, TransactionState::Building | TransactionState::Pending) {
            return Err(self.invalid("optimize"));
        }
        let (batch, stats) = optimizer.optimize_with_stats(&self.batch);
        self.batch = batch;
        Ok(stats)
    }

    /// Record the snapshot that restores the pre-application state
    pub fn set_rollback_snapshot(&mut self, snapshot: SnapshotId) -> Result<(), TransactionError> {
        if self.is_terminal() {
            return Err(self.invalid("set a rollback snapshot"));
        }
        self.rollback_snapshot = Some(snapshot);
        Ok(())
    }

    /// Building -> Pending
    pub fn submit(&mut self) -> Result<(), TransactionError> {
        self.require(TransactionState::Building, "submit")?;
        self.state = TransactionState::Pending;
        Ok(())
    }

    /// Pending -> Applying
    pub fn begin_apply(&mut self) -> Result<(), TransactionError> {
        self.require(TransactionState::Pending, "begin applying")?;
        self.state = TransactionState::Applying;
        Ok(())
    }

    fn finish(&mut self, state: TransactionState, operation: &'static str) -> Result<bool, TransactionError> {
        if self.is_terminal() {
            return Ok(false);
        }
        self.require(TransactionState::Applying, operation)?;
        self.state = state;
        Ok(true)
    }

    /// Applying -> Committed
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        self.finish(TransactionState::Committed, "commit").map(|_| ())
    }

    /// Applying -> RolledBack
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        self.finish(TransactionState::RolledBack, "roll back").map(|_| ())
    }

    /// Applying -> Failed, recording the reason
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransactionError> {
        if self.finish(TransactionState::Failed, "fail")? {
            self.error = Some(error.into());
        }
        Ok(())
    }

    /// Check if all dependencies are satisfied
    pub fn dependencies_satisfied(&self, is_committed: impl Fn(TransactionId) -> bool) -> bool {
        self.dependencies.iter().all(|dep| is_committed(*dep))
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_u64(self.id.0);
        w.write_u32(self.namespace.raw());
        w.write_str(&self.metadata.description);
        w.write_str(&self.metadata.source);
        w.write_i32(self.metadata.priority);
        w.write_u64(self.frame);
        w.write_seq(&self.dependencies, |w, dep| w.write_u64(dep.0));
        self.batch.encode(w);
        w.write_u8(self.state.tag());
        w.write_option(self.rollback_snapshot.as_ref(), |w, s| w.write_u64(s.raw()));
        w.write_option(self.error.as_ref(), |w, e| w.write_str(e));
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        let id = TransactionId(r.read_u64()?);
        let namespace = NamespaceId::from_raw(r.read_u32()?);
        let metadata = TransactionMetadata {
            description: r.read_string()?,
            source: r.read_string()?,
            priority: r.read_i32()?,
        };
        Some(Self {
            id,
            namespace,
            metadata,
            frame: r.read_u64()?,
            dependencies: r.read_seq(|r| r.read_u64().map(TransactionId))?.into_iter().collect(),
            batch: PatchBatch::decode(r)?,
            state: TransactionState::from_tag(r.read_u8()?)?,
            rollback_snapshot: r.read_option(|r| r.read_u64().map(SnapshotId::from_raw))?,
            error: r.read_option(ByteReader::read_string)?,
        })
    }
}

impl WireFormat for Transaction {
    const MAGIC: [u8; 4] = *b"TRNS";

    fn encode_payload(&self, w: &mut ByteWriter) {
        self.encode(w);
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        Self::decode(r)
    }
}

/// Builder for transactions with a fluent API
pub struct TransactionBuilder {
    transaction: Transaction,
}

impl TransactionBuilder {
    /// Start building a transaction with an already allocated id
    pub fn new(id: TransactionId, namespace: NamespaceId) -> Self {
        Self {
            transaction: Transaction::new(id, namespace),
        }
    }

    /// Set the description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.transaction.metadata.description = desc.into();
        self
    }

    /// Set the producing source
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.transaction.metadata.source = source.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.transaction.metadata.priority = priority;
        self
    }

    /// Set the frame the transaction is built for
    pub fn frame(mut self, frame: u64) -> Self {
        self.transaction.frame = frame;
        self
    }

    /// Add a patch
    pub fn patch(mut self, patch: Patch) -> Self {
        self.transaction.batch.push(patch);
        self
    }

    /// Add multiple patches
    pub fn patches(mut self, patches: impl IntoIterator<Item = Patch>) -> Self {
        self.transaction.batch.extend(patches);
        self
    }

    /// Add a dependency
    pub fn depends_on(mut self, other: TransactionId) -> Self {
        self.transaction.dependencies.insert(other);
        self
    }

    /// Build and submit the transaction
    pub fn build(mut self) -> Transaction {
        self.transaction.state = TransactionState::Pending;
        self.transaction
    }

    /// Build without submitting (stays in Building state)
    pub fn build_draft(self) -> Transaction {
        self.transaction
    }
}

/// Result of applying a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// The transaction that was applied
    pub id: TransactionId,
    /// State the transaction ended in
    pub state: TransactionState,
    /// Number of patches successfully applied
    pub applied_count: usize,
    pub failed_count: usize,
    /// Indices of the patches that failed
    pub failed_indices: Vec<usize>,
    pub error: Option<String>,
}

impl TransactionResult {
    /// Every patch applied and the transaction committed
    pub fn ok(id: TransactionId, applied_count: usize) -> Self {
        Self {
            id,
            state: TransactionState::Committed,
            applied_count,
            failed_count: 0,
            failed_indices: Vec::new(),
            error: None,
        }
    }

    /// Some patches failed and the transaction was rolled back
    pub fn partial(
        id: TransactionId,
        applied_count: usize,
        failed_indices: Vec<usize>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id,
            state: TransactionState::RolledBack,
            applied_count,
            failed_count: failed_indices.len(),
            failed_indices,
            error: Some(error.into()),
        }
    }

    /// The transaction could not be applied at all
    pub fn failed(id: TransactionId, state: TransactionState, error: impl Into<String>) -> Self {
        Self {
            id,
            state,
            applied_count: 0,
            failed_count: 0,
            failed_indices: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == TransactionState::Committed
    }
}

/// Drive a transaction through application.
///
/// The handler is invoked for each patch in order. The first failure stops
/// application and rolls the transaction back; undoing the patches that did
/// succeed is up to the caller (typically by restoring the transaction's
/// rollback snapshot or by staging the changes). A `Pending` transaction is
/// moved to `Applying` first.
pub fn apply_transaction<E, F>(tx: &mut Transaction, mut handler: F) -> TransactionResult
where
    E: fmt::Display,
    F: FnMut(usize, &Patch) -> Result<(), E>,
{
    if tx.state() == TransactionState::Pending {
        if let Err(err) = tx.begin_apply() {
            return TransactionResult::failed(tx.id(), tx.state(), err.to_string());
        }
    }
    if tx.state() != TransactionState::Applying {
        let err = tx.invalid("apply");
        return TransactionResult::failed(tx.id(), tx.state(), err.to_string());
    }

    let mut applied = 0;
    let mut failure = None;
    for (index, patch) in tx.patches().iter().enumerate() {
        match handler(index, patch) {
            Ok(()) => applied += 1,
            Err(err) => {
                failure = Some((index, err.to_string()));
                break;
            }
        }
    }

    match failure {
        None => {
            // Applying -> Committed cannot fail here
            let _ = tx.commit();
            log::debug!("{} committed {} patch(es)", tx.id(), applied);
            TransactionResult::ok(tx.id(), applied)
        }
        Some((index, error)) => {
            let _ = tx.rollback();
            log::warn!("{} rolled back: patch {} failed: {}", tx.id(), index, error);
            TransactionResult::partial(tx.id(), applied, vec![index], error)
        }
    }
}

/// FIFO queue of pending transactions
#[derive(Debug, Default)]
pub struct TransactionQueue {
    inner: Mutex<VecDeque<Transaction>>,
}

impl TransactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `Pending` transaction
    pub fn enqueue(&self, tx: Transaction) -> Result<(), TransactionError> {
        tx.require(TransactionState::Pending, "be enqueued")?;
        self.inner.lock().push_back(tx);
        Ok(())
    }

    /// Take the oldest transaction
    pub fn dequeue(&self) -> Option<Transaction> {
        self.inner.lock().pop_front()
    }

    /// Take the oldest transaction matching `predicate`
    pub fn dequeue_where(&self, mut predicate: impl FnMut(&Transaction) -> bool) -> Option<Transaction> {
        let mut inner = self.inner.lock();
        let index = inner.iter().position(|tx| predicate(tx))?;
        inner.remove(index)
    }

    /// Id of the oldest transaction
    pub fn peek(&self) -> Option<TransactionId> {
        self.inner.lock().front().map(Transaction::id)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Patches across every queued transaction
    pub fn total_patch_count(&self) -> usize {
        self.inner.lock().iter().map(Transaction::len).sum()
    }

    /// Number of queued transactions from `namespace`
    pub fn pending_for(&self, namespace: NamespaceId) -> usize {
        self.inner.lock().iter().filter(|tx| tx.namespace() == namespace).count()
    }

    /// Copies of the batches queued by `namespace`, oldest first
    pub fn batches_for(&self, namespace: NamespaceId) -> Vec<PatchBatch> {
        self.inner
            .lock()
            .iter()
            .filter(|tx| tx.namespace() == namespace)
            .map(|tx| tx.batch().clone())
            .collect()
    }

    /// Ids of the queued transactions, oldest first
    pub fn ids(&self) -> Vec<TransactionId> {
        self.inner.lock().iter().map(Transaction::id).collect()
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.inner.lock().iter().any(|tx| tx.id() == id)
    }

    /// Remove and return everything queued
    pub fn drain(&self) -> Vec<Transaction> {
        self.inner.lock().drain(..).collect()
    }
}

impl WireFormat for TransactionQueue {
    const MAGIC: [u8; 4] = *b"TXNS";

    fn encode_payload(&self, w: &mut ByteWriter) {
        let inner = self.inner.lock();
        w.write_seq(inner.iter(), |w, tx| tx.encode(w));
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        let queued = r.read_seq(Transaction::decode)?;
        if queued.iter().any(|tx| tx.state() != TransactionState::Pending) {
            return None;
        }
        Some(Self {
            inner: Mutex::new(queued.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::EntityRef;
    use crate::value::Value;

    fn ns() -> NamespaceId {
        NamespaceId::from_raw(0)
    }

    fn patch(id: u64) -> Patch {
        Patch::create_entity(EntityRef::new(ns(), id), "e")
    }

    #[test]
    fn test_transaction_builder() {
        let ids = TransactionIdAllocator::new();
        let tx = TransactionBuilder::new(ids.allocate(), ns())
            .description("Spawn player")
            .source("loader")
            .priority(3)
            .patch(patch(1))
            .build();

        assert_eq!(tx.state(), TransactionState::Pending);
        assert_eq!(tx.len(), 1);
        assert_eq!(tx.metadata().description, "Spawn player");
        assert_eq!(tx.metadata().priority, 3);
        assert!(tx.id().is_valid());
    }

    #[test]
    fn test_allocator_is_monotonic() {
        let ids = TransactionIdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        assert!(a < b);
        assert_ne!(a, TransactionId::invalid());

        ids.advance_past(TransactionId::from_raw(40));
        assert_eq!(ids.allocate().raw(), 41);
        ids.advance_past(TransactionId::from_raw(5));
        assert_eq!(ids.allocate().raw(), 42);
    }

    #[test]
    fn test_state_machine() {
        let mut tx = Transaction::new(TransactionId::from_raw(1), ns());
        tx.add_patch(patch(1)).unwrap();
        assert!(tx.begin_apply().is_err());
        assert!(tx.commit().is_err());

        tx.submit().unwrap();
        assert!(matches!(
            tx.add_patch(patch(2)),
            Err(TransactionError::InvalidState { .. })
        ));
        assert!(tx.add_dependency(TransactionId::from_raw(9)).is_err());

        tx.begin_apply().unwrap();
        tx.fail("disk on fire").unwrap();
        assert_eq!(tx.state(), TransactionState::Failed);
        assert_eq!(tx.error(), Some("disk on fire"));

        // terminal transitions are idempotent no-ops
        tx.commit().unwrap();
        tx.rollback().unwrap();
        tx.fail("other").unwrap();
        assert_eq!(tx.state(), TransactionState::Failed);
        assert_eq!(tx.error(), Some("disk on fire"));
    }

    #[test]
    fn test_transaction_dependencies() {
        let ids = TransactionIdAllocator::new();
        let tx1 = TransactionBuilder::new(ids.allocate(), ns()).build();
        let tx2 = TransactionBuilder::new(ids.allocate(), ns()).depends_on(tx1.id()).build();

        assert!(tx2.dependencies_satisfied(|dep| dep == tx1.id()));
        assert!(!tx2.dependencies_satisfied(|_| false));
        assert!(tx1.dependencies_satisfied(|_| false));
    }

    #[test]
    fn test_apply_commits_when_all_succeed() {
        let mut tx = TransactionBuilder::new(TransactionId::from_raw(1), ns())
            .patches([patch(1), patch(2)])
            .build();
        let mut seen = Vec::new();
        let result = apply_transaction(&mut tx, |index, _| {
            seen.push(index);
            Ok::<_, String>(())
        });
        assert!(result.is_success());
        assert_eq!(result.applied_count, 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[test]
    fn test_apply_rolls_back_on_failure() {
        let mut tx = TransactionBuilder::new(TransactionId::from_raw(1), ns())
            .patches([patch(1), patch(2), patch(3)])
            .build();
        let result = apply_transaction(&mut tx, |index, _| {
            if index == 1 {
                Err("nope")
            } else {
                Ok(())
            }
        });
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(result.state, TransactionState::RolledBack);
        assert_eq!(result.applied_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.failed_indices, vec![1]);
        assert_eq!(result.error.as_deref(), Some("nope"));
    }

    #[test]
    fn test_apply_rejects_building_transaction() {
        let mut tx = Transaction::new(TransactionId::from_raw(1), ns());
        let result = apply_transaction(&mut tx, |_, _| Ok::<_, String>(()));
        assert_eq!(result.state, TransactionState::Building);
        assert!(result.error.is_some());
        assert_eq!(tx.state(), TransactionState::Building);
    }

    #[test]
    fn test_queue_fifo() {
        let queue = TransactionQueue::new();
        let ids = TransactionIdAllocator::new();
        let a = TransactionBuilder::new(ids.allocate(), ns()).patch(patch(1)).build();
        let b = TransactionBuilder::new(ids.allocate(), NamespaceId::from_raw(1))
            .patches([patch(2), patch(3)])
            .build();
        let (a_id, b_id) = (a.id(), b.id());

        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();
        assert!(queue
            .enqueue(TransactionBuilder::new(ids.allocate(), ns()).build_draft())
            .is_err());

        assert_eq!(queue.size(), 2);
        assert_eq!(queue.total_patch_count(), 3);
        assert_eq!(queue.pending_for(ns()), 1);
        assert_eq!(queue.peek(), Some(a_id));
        assert_eq!(queue.dequeue().map(|tx| tx.id()), Some(a_id));
        assert_eq!(queue.dequeue().map(|tx| tx.id()), Some(b_id));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_transaction_round_trip() {
        let mut tx = TransactionBuilder::new(TransactionId::from_raw(7), ns())
            .description("move")
            .frame(12)
            .depends_on(TransactionId::from_raw(3))
            .patch(Patch::set_field(
                EntityRef::new(ns(), 1),
                "Transform",
                "position",
                Value::Vec3([1.0, 2.0, 3.0]),
            ))
            .build();
        tx.set_rollback_snapshot(SnapshotId::from_raw(4)).unwrap();

        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded, tx);

        let queue = TransactionQueue::new();
        queue.enqueue(tx).unwrap();
        let restored = TransactionQueue::from_bytes(&queue.to_bytes()).unwrap();
        assert_eq!(restored.size(), 1);
        assert_eq!(restored.peek(), Some(TransactionId::from_raw(7)));
    }
}
