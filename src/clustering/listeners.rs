// Listener Registries
//
// Pub/sub registration for migration and partition-lost events, kept
// deliberately independent of the core invariants (C1/C2/C3): losing or
// mis-firing a listener never corrupts the partition table. Grounded on the
// teacher's `FailoverManager`/`FailoverEvent` dispatch (clustering::failover),
// generalized from a single fixed event enum to two listener traits with
// their own registries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clustering::migration::MigrationInfo;
use crate::clustering::partition::PartitionReplica;

/// Opaque handle returned by a `register_*` call, passed back to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fired when a partition loses replicas it cannot recover (e.g. every
/// holder of a given slot left the cluster at once).
#[derive(Debug, Clone)]
pub struct PartitionLostEvent {
    pub partition_id: usize,
    pub lost_replica_index: usize,
    pub last_known_owner: Option<PartitionReplica>,
}

pub trait MigrationListener: Send + Sync {
    fn on_migration_start(&self, migration: &MigrationInfo);
    fn on_migration_complete(&self, migration: &MigrationInfo);
}

pub trait PartitionLostListener: Send + Sync {
    fn on_partition_lost(&self, event: &PartitionLostEvent);
}

struct Registry<T: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Arc<T>)>>,
}

impl<T: ?Sized> Registry<T> {
    fn new() -> Self {
        Self { next_id: AtomicU64::new(1), entries: RwLock::new(Vec::new()) }
    }

    fn add(&self, listener: Arc<T>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.write().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.read().iter().map(|(_, l)| l.clone()).collect()
    }
}

/// Holds migration listeners (cluster-wide) plus a separate local-only
/// partition-lost registry, matching the consumer API's distinction between
/// `addPartitionLostListener` (fires everywhere) and
/// `addLocalPartitionLostListener` (fires only on this node).
pub struct ListenerRegistries {
    migration: Registry<dyn MigrationListener>,
    partition_lost: Registry<dyn PartitionLostListener>,
    local_partition_lost: Registry<dyn PartitionLostListener>,
}

impl ListenerRegistries {
    pub fn new() -> Self {
        Self {
            migration: Registry::new(),
            partition_lost: Registry::new(),
            local_partition_lost: Registry::new(),
        }
    }

    pub fn add_migration_listener(&self, listener: Arc<dyn MigrationListener>) -> ListenerId {
        self.migration.add(listener)
    }

    pub fn remove_migration_listener(&self, id: ListenerId) -> bool {
        self.migration.remove(id)
    }

    pub fn add_partition_lost_listener(&self, listener: Arc<dyn PartitionLostListener>) -> ListenerId {
        self.partition_lost.add(listener)
    }

    pub fn remove_partition_lost_listener(&self, id: ListenerId) -> bool {
        self.partition_lost.remove(id)
    }

    pub fn add_local_partition_lost_listener(&self, listener: Arc<dyn PartitionLostListener>) -> ListenerId {
        self.local_partition_lost.add(listener)
    }

    pub fn remove_local_partition_lost_listener(&self, id: ListenerId) -> bool {
        self.local_partition_lost.remove(id)
    }

    pub fn fire_migration_start(&self, migration: &MigrationInfo) {
        for listener in self.migration.snapshot() {
            listener.on_migration_start(migration);
        }
    }

    pub fn fire_migration_complete(&self, migration: &MigrationInfo) {
        for listener in self.migration.snapshot() {
            listener.on_migration_complete(migration);
        }
    }

    /// Fires both the cluster-wide and local-only partition-lost listeners.
    pub fn fire_partition_lost(&self, event: &PartitionLostEvent) {
        for listener in self.partition_lost.snapshot() {
            listener.on_partition_lost(event);
        }
        for listener in self.local_partition_lost.snapshot() {
            listener.on_partition_lost(event);
        }
    }
}

impl Default for ListenerRegistries {
    fn default() -> Self {
        Self::new()
    }
}
