// Replica State Checker (C4)
//
// A read-only predicate over partition-table and migration state, with no
// storage of its own - grounded on the teacher's `ClusterHealth::update_from_nodes`
// (clustering::health), which derives a `ClusterStatus` from plain counts
// rather than holding mutable health state. Generalized here from
// node-count thresholds to partition-replica-completeness thresholds.

use crate::clustering::partition::PartitionTable;

/// Whether it is safe to shut down or rebalance this member, in ascending
/// order of concern. Variants are checked in declaration order by
/// `evaluate`, so the first one that applies wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyStatus {
    /// A migration this node is driving (as source, destination, or master)
    /// is in flight.
    MigrationLocal,
    /// The master is running a migration that doesn't involve this node.
    MigrationOnMaster,
    /// A backup on this node (or one it depends on) hasn't finished its
    /// version sync.
    ReplicaNotSynced,
    /// Every partition has an owner, but at least one is missing a backup
    /// it should have given the current member-group count.
    SafeWithReplicasMissing,
    /// No migration in flight, no pending sync, every partition fully
    /// replicated.
    Safe,
}

impl SafetyStatus {
    pub fn is_safe(self) -> bool {
        matches!(self, SafetyStatus::Safe | SafetyStatus::SafeWithReplicasMissing)
    }
}

/// Pure evaluation of cluster/member safety from already-gathered facts.
/// Takes no locks and owns no state - every input is a snapshot the caller
/// (C5) assembled from C1/C2/C3.
pub fn evaluate(
    table: &PartitionTable,
    is_initialized: bool,
    member_group_size: usize,
    pending_replica_syncs: usize,
    has_local_migration: bool,
    has_master_migration: bool,
) -> SafetyStatus {
    if has_local_migration {
        return SafetyStatus::MigrationLocal;
    }
    if has_master_migration {
        return SafetyStatus::MigrationOnMaster;
    }
    if pending_replica_syncs > 0 {
        return SafetyStatus::ReplicaNotSynced;
    }

    // An un-arranged table has no owners at all; `expected_replicas` being
    // 0 before the first arrangement must not be mistaken for "nothing
    // expected, so fully replicated".
    if !is_initialized || table.iter().any(|p| !p.is_assigned()) {
        return SafetyStatus::SafeWithReplicasMissing;
    }

    let expected_replicas = member_group_size.min(crate::clustering::partition::MAX_REPLICA_COUNT);
    let fully_replicated = table.iter().all(|p| {
        let filled = p.replicas().iter().filter(|r| r.is_some()).count();
        filled >= expected_replicas
    });

    if fully_replicated {
        SafetyStatus::Safe
    } else {
        SafetyStatus::SafeWithReplicasMissing
    }
}
