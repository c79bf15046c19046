//! Patch Bus - distribution of committed patches
//!
//! Two flavours:
//!
//! - [`PatchBus`]: synchronous fan-out. Every matching subscriber callback runs
//!   on the publishing thread, in subscription order.
//! - [`AsyncPatchBus`]: publishers append events to a lock-free channel and a
//!   consumer drains the backlog from its own thread, e.g. once per frame.
//!
//! Each bus stamps events with a strictly increasing sequence number.

use crate::batch::PatchBatch;
use crate::codec::{ByteReader, ByteWriter, WireFormat};
use crate::error::PatchBusError;
use crate::namespace::NamespaceId;
use crate::patch::{EntityRef, Patch, PatchKind};
use crate::transaction::TransactionId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A published patch
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEvent {
    pub patch: Patch,
    /// Namespace that committed the patch
    pub namespace: NamespaceId,
    /// Transaction the patch belongs to
    pub transaction: TransactionId,
    /// Per-bus, strictly increasing
    pub sequence_number: u64,
}

impl PatchEvent {
    fn encode(&self, w: &mut ByteWriter) {
        self.patch.encode(w);
        w.write_u32(self.namespace.raw());
        w.write_u64(self.transaction.raw());
        w.write_u64(self.sequence_number);
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            patch: Patch::decode(r)?,
            namespace: NamespaceId::from_raw(r.read_u32()?),
            transaction: TransactionId::from_raw(r.read_u64()?),
            sequence_number: r.read_u64()?,
        })
    }
}

/// Decides which events a subscriber receives. All set criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchFilter {
    kinds: Option<BTreeSet<PatchKind>>,
    namespace: Option<NamespaceId>,
    entity: Option<EntityRef>,
    component: Option<String>,
}

impl PatchFilter {
    /// Accept every event
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the given patch kinds
    pub fn for_kinds(kinds: impl IntoIterator<Item = PatchKind>) -> Self {
        Self::all().with_kinds(kinds)
    }

    /// Accept only patches committed by `namespace`
    pub fn for_namespace(namespace: NamespaceId) -> Self {
        Self::all().with_namespace(namespace)
    }

    /// Accept only patches targeting `entity`
    pub fn for_entity(entity: EntityRef) -> Self {
        Self::all().with_entity(entity)
    }

    /// Accept only patches writing `component`
    pub fn for_component(component: impl Into<String>) -> Self {
        Self::all().with_component(component)
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = PatchKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_namespace(mut self, namespace: NamespaceId) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Whether a patch committed by `namespace` passes the filter
    pub fn matches(&self, patch: &Patch, namespace: NamespaceId) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&patch.kind()) {
                return false;
            }
        }
        if self.namespace.is_some_and(|ns| ns != namespace) {
            return false;
        }
        if self.entity.is_some_and(|e| patch.target_entity() != Some(e)) {
            return false;
        }
        if let Some(component) = &self.component {
            if patch.component_type() != Some(component.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Handle returned by [`PatchBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

type Callback = Arc<dyn Fn(&PatchEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: PatchFilter,
    callback: Callback,
}

/// Statistics about patch bus usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchBusStats {
    /// Events published
    pub published: u64,
    /// Callback invocations
    pub delivered: u64,
    /// Live subscriptions
    pub subscribers: usize,
}

/// Synchronous publish/subscribe bus
pub struct PatchBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_subscription: AtomicU64,
    next_sequence: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    shut_down: AtomicBool,
}

impl PatchBus {
    /// Create a new patch bus
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Register a callback for events passing `filter`
    pub fn subscribe<F>(&self, filter: PatchFilter, callback: F) -> Result<SubscriptionId, PatchBusError>
    where
        F: Fn(&PatchEvent) + Send + Sync + 'static,
    {
        if self.is_shut_down() {
            return Err(PatchBusError::ShutDown);
        }
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            callback: Arc::new(callback),
        });
        log::debug!("patch bus: added {}", id);
        Ok(id)
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Publish one patch, returning its sequence number.
    ///
    /// Matching callbacks run on this thread before `publish` returns. The
    /// subscriber list is not locked while they run.
    pub fn publish(
        &self,
        patch: &Patch,
        namespace: NamespaceId,
        transaction: TransactionId,
    ) -> Result<u64, PatchBusError> {
        if self.is_shut_down() {
            return Err(PatchBusError::ShutDown);
        }

        let targets: Vec<Callback> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.filter.matches(patch, namespace))
            .map(|s| Arc::clone(&s.callback))
            .collect();

        let event = PatchEvent {
            patch: patch.clone(),
            namespace,
            transaction,
            sequence_number: self.next_sequence.fetch_add(1, Ordering::SeqCst),
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        for callback in &targets {
            callback(&event);
        }
        self.delivered.fetch_add(targets.len() as u64, Ordering::Relaxed);
        log::trace!("patch bus: #{} delivered to {} subscriber(s)", event.sequence_number, targets.len());
        Ok(event.sequence_number)
    }

    /// Publish every patch of a batch in order; returns how many were published
    pub fn publish_batch(
        &self,
        batch: &PatchBatch,
        namespace: NamespaceId,
        transaction: TransactionId,
    ) -> Result<usize, PatchBusError> {
        for patch in batch {
            self.publish(patch, namespace, transaction)?;
        }
        Ok(batch.len())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Get current statistics
    pub fn stats(&self) -> PatchBusStats {
        PatchBusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    /// Drop every subscription and refuse further publishing
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let dropped = {
            let mut subscriptions = self.subscriptions.write();
            let count = subscriptions.len();
            subscriptions.clear();
            count
        };
        log::debug!("patch bus shut down, dropped {} subscription(s)", dropped);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for PatchBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PatchBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchBus")
            .field("stats", &self.stats())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Persists counters only; subscribers re-register after a reload
impl WireFormat for PatchBus {
    const MAGIC: [u8; 4] = *b"PBUS";

    fn encode_payload(&self, w: &mut ByteWriter) {
        w.write_u64(self.next_subscription.load(Ordering::SeqCst));
        w.write_u64(self.next_sequence.load(Ordering::SeqCst));
        w.write_u64(self.published.load(Ordering::Relaxed));
        w.write_u64(self.delivered.load(Ordering::Relaxed));
        w.write_bool(self.is_shut_down());
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        let bus = Self::new();
        bus.next_subscription.store(r.read_u64()?, Ordering::SeqCst);
        bus.next_sequence.store(r.read_u64()?, Ordering::SeqCst);
        bus.published.store(r.read_u64()?, Ordering::Relaxed);
        bus.delivered.store(r.read_u64()?, Ordering::Relaxed);
        bus.shut_down.store(r.read_bool()?, Ordering::SeqCst);
        Some(bus)
    }
}

/// Queue-backed bus drained by a consumer thread
#[derive(Debug)]
pub struct AsyncPatchBus {
    sender: Sender<PatchEvent>,
    receiver: Receiver<PatchEvent>,
    next_sequence: AtomicU64,
    shut_down: AtomicBool,
    /// Held while the backlog is read or written, so sequence order and
    /// queue order agree and a state capture never interleaves a publish
    gate: Mutex<()>,
}

impl AsyncPatchBus {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            next_sequence: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            gate: Mutex::new(()),
        }
    }

    /// Append a patch to the backlog, returning its sequence number
    pub fn publish(
        &self,
        patch: Patch,
        namespace: NamespaceId,
        transaction: TransactionId,
    ) -> Result<u64, PatchBusError> {
        let _gate = self.gate.lock();
        if self.is_shut_down() {
            return Err(PatchBusError::ShutDown);
        }
        let sequence_number = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(PatchEvent {
                patch,
                namespace,
                transaction,
                sequence_number,
            })
            .map_err(|_| PatchBusError::ShutDown)?;
        Ok(sequence_number)
    }

    /// Append every patch of a batch in order
    pub fn publish_batch(
        &self,
        batch: &PatchBatch,
        namespace: NamespaceId,
        transaction: TransactionId,
    ) -> Result<usize, PatchBusError> {
        for patch in batch {
            self.publish(patch.clone(), namespace, transaction)?;
        }
        Ok(batch.len())
    }

    /// Take the whole backlog
    pub fn consume_all(&self) -> Vec<PatchEvent> {
        let _gate = self.gate.lock();
        self.receiver.try_iter().collect()
    }

    /// Events waiting to be consumed
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Refuse further publishing and discard the backlog; returns how many
    /// events were discarded
    pub fn shutdown(&self) -> usize {
        let _gate = self.gate.lock();
        self.shut_down.store(true, Ordering::SeqCst);
        let discarded = self.receiver.try_iter().count();
        log::debug!("async patch bus shut down, discarded {} event(s)", discarded);
        discarded
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for AsyncPatchBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Carries the sequence counter and the unconsumed backlog
impl WireFormat for AsyncPatchBus {
    const MAGIC: [u8; 4] = *b"ABUS";

    fn encode_payload(&self, w: &mut ByteWriter) {
        let _gate = self.gate.lock();
        // Drain and refill under the gate; nobody observes the empty queue
        let backlog: Vec<PatchEvent> = self.receiver.try_iter().collect();
        for event in &backlog {
            // Channel is never disconnected while `self` holds the receiver
            let _ = self.sender.send(event.clone());
        }
        w.write_u64(self.next_sequence.load(Ordering::SeqCst));
        w.write_bool(self.is_shut_down());
        w.write_seq(&backlog, |w, e| e.encode(w));
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        let bus = Self::new();
        bus.next_sequence.store(r.read_u64()?, Ordering::SeqCst);
        bus.shut_down.store(r.read_bool()?, Ordering::SeqCst);
        for event in r.read_seq(PatchEvent::decode)? {
            bus.sender.send(event).ok()?;
        }
        Some(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::thread;

    fn ns() -> NamespaceId {
        NamespaceId::from_raw(0)
    }

    fn entity(id: u64) -> EntityRef {
        EntityRef::new(ns(), id)
    }

    fn tx() -> TransactionId {
        TransactionId::from_raw(1)
    }

    #[test]
    fn test_publish_order_and_sequence() {
        let bus = PatchBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(PatchFilter::all(), move |event| {
            sink.lock().push((event.patch.clone(), event.sequence_number));
        })
        .unwrap();

        let patches: Vec<Patch> = (1..=3).map(|i| Patch::create_entity(entity(i), "e")).collect();
        for patch in &patches {
            bus.publish(patch, ns(), tx()).unwrap();
        }

        let seen = seen.lock();
        let received: Vec<_> = seen.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(received, patches);
        assert!(seen.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[test]
    fn test_subscribers_run_in_subscription_order() {
        let bus = PatchBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let order = Arc::clone(&order);
            bus.subscribe(PatchFilter::all(), move |_| order.lock().push(name)).unwrap();
        }
        bus.publish(&Patch::destroy_layer(1), ns(), tx()).unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_filters() {
        let other = NamespaceId::from_raw(1);
        let transform = Patch::set_field(entity(1), "Transform", "position", Value::Vec3([0.0; 3]));
        let create = Patch::create_entity(entity(2), "e");

        assert!(PatchFilter::all().matches(&create, ns()));
        assert!(PatchFilter::for_kinds([PatchKind::Component]).matches(&transform, ns()));
        assert!(!PatchFilter::for_kinds([PatchKind::Component]).matches(&create, ns()));
        assert!(!PatchFilter::for_namespace(other).matches(&create, ns()));
        assert!(PatchFilter::for_entity(entity(1)).matches(&transform, ns()));
        assert!(!PatchFilter::for_entity(entity(1)).matches(&create, ns()));
        assert!(PatchFilter::for_component("Transform").matches(&transform, ns()));
        assert!(!PatchFilter::for_component("Transform")
            .with_namespace(other)
            .matches(&transform, ns()));
    }

    #[test]
    fn test_filtered_delivery_and_unsubscribe() {
        let bus = PatchBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = bus
            .subscribe(PatchFilter::for_kinds([PatchKind::Layer]), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        bus.publish(&Patch::create_layer(1, "world", 0), ns(), tx()).unwrap();
        bus.publish(&Patch::create_entity(entity(1), "e"), ns(), tx()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&Patch::destroy_layer(1), ns(), tx()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let stats = bus.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.subscribers, 0);
    }

    #[test]
    fn test_shutdown() {
        let bus = PatchBus::new();
        bus.subscribe(PatchFilter::all(), |_| {}).unwrap();
        bus.shutdown();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(
            bus.publish(&Patch::destroy_layer(1), ns(), tx()),
            Err(PatchBusError::ShutDown)
        );
        assert!(bus.subscribe(PatchFilter::all(), |_| {}).is_err());
    }

    #[test]
    fn test_bus_counters_survive_reload() {
        let bus = PatchBus::new();
        bus.publish(&Patch::destroy_layer(1), ns(), tx()).unwrap();
        let restored = PatchBus::from_bytes(&bus.to_bytes()).unwrap();
        let next = restored.publish(&Patch::destroy_layer(1), ns(), tx()).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_async_consume_all() {
        let bus = AsyncPatchBus::new();
        bus.publish(Patch::create_entity(entity(1), "a"), ns(), tx()).unwrap();
        bus.publish(Patch::create_entity(entity(2), "b"), ns(), tx()).unwrap();
        assert_eq!(bus.len(), 2);

        let events = bus.consume_all();
        assert_eq!(events.len(), 2);
        assert!(events[0].sequence_number < events[1].sequence_number);
        assert!(bus.is_empty());
        assert!(bus.consume_all().is_empty());
    }

    #[test]
    fn test_async_many_producers() {
        let bus = Arc::new(AsyncPatchBus::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for i in 0..25 {
                        bus.publish(Patch::create_entity(entity(t * 100 + i), "e"), ns(), tx())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut sequences: Vec<u64> = bus.consume_all().iter().map(|e| e.sequence_number).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), 100);
    }

    #[test]
    fn test_async_shutdown_and_reload() {
        let bus = AsyncPatchBus::new();
        bus.publish(Patch::destroy_layer(1), ns(), tx()).unwrap();

        let restored = AsyncPatchBus::from_bytes(&bus.to_bytes()).unwrap();
        assert_eq!(bus.len(), 1);
        assert_eq!(restored.consume_all().len(), 1);

        assert_eq!(bus.shutdown(), 1);
        assert!(bus.publish(Patch::destroy_layer(2), ns(), tx()).is_err());
    }

    #[test]
    fn test_async_capture_during_publishing_keeps_order() {
        let bus = Arc::new(AsyncPatchBus::new());
        let publisher = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                for i in 0..500 {
                    bus.publish(Patch::create_entity(entity(i + 1), "e"), ns(), tx()).unwrap();
                }
            })
        };
        let captures: Vec<Vec<u8>> = (0..50).map(|_| bus.to_bytes()).collect();
        publisher.join().unwrap();

        let in_order = |events: &[PatchEvent]| {
            events.windows(2).all(|w| w[0].sequence_number < w[1].sequence_number)
        };
        let events = bus.consume_all();
        assert_eq!(events.len(), 500);
        assert!(in_order(&events));
        for bytes in captures {
            let restored = AsyncPatchBus::from_bytes(&bytes).unwrap();
            assert!(in_order(&restored.consume_all()));
        }
    }
}
