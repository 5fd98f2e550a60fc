// Partition State Manager (C1)
//
// Owns the in-memory partition table, its version counter, and member-group
// sizing. Grounded on the teacher's `ShardMap` (clustering::coordinator)
// locking shape - a flat key -> shard map generalized here to an N-slot
// replica table - using `parking_lot::RwLock` rather than `std::sync`'s,
// since the table is read far more often than it is written.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clustering::assignment::MemberGroupStrategy;
use crate::clustering::membership::{Address, Member, MemberId};

/// Maximum number of replica slots per partition: one owner plus up to six
/// backups.
pub const MAX_REPLICA_COUNT: usize = 7;

/// One replica slot: a (address, member id) pair. Two replicas are equal
/// iff both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReplica {
    pub address: Address,
    pub id: MemberId,
}

impl PartitionReplica {
    pub fn new(address: Address, id: MemberId) -> Self {
        Self { address, id }
    }

    pub fn from_member(member: &Member) -> Self {
        Self::new(member.address.clone(), member.id)
    }
}

/// One of the `partition_count` fixed buckets data keys map into. Slot 0 is
/// the owner; slots 1..6 are backups in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub id: usize,
    replicas: [Option<PartitionReplica>; MAX_REPLICA_COUNT],
}

impl Partition {
    pub fn new(id: usize) -> Self {
        Self { id, replicas: Default::default() }
    }

    pub fn owner(&self) -> Option<&PartitionReplica> {
        self.replicas[0].as_ref()
    }

    pub fn replica(&self, index: usize) -> Option<&PartitionReplica> {
        self.replicas.get(index).and_then(|r| r.as_ref())
    }

    pub fn replicas(&self) -> &[Option<PartitionReplica>; MAX_REPLICA_COUNT] {
        &self.replicas
    }

    /// A partition with at least one non-empty slot is considered assigned.
    pub fn is_assigned(&self) -> bool {
        self.replicas.iter().any(Option::is_some)
    }

    /// Index of `member`'s slot in this partition, if it holds one.
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.replicas
            .iter()
            .position(|r| r.as_ref().map(|r| &r.address) == Some(address))
    }

    fn set(&mut self, index: usize, replica: Option<PartitionReplica>) {
        self.replicas[index] = replica;
    }
}

/// Length-`partition_count` partition table.
pub type PartitionTable = Vec<Partition>;

/// A single replica slot change fired to migration listeners: `(partition
/// id, replica index, old replica, new replica)`.
pub type ReplicaChange = (usize, usize, Option<PartitionReplica>, Option<PartitionReplica>);

struct State {
    table: PartitionTable,
    version: u64,
    initialized: bool,
    member_group_size: usize,
}

/// Owns the partition table, its version counter, and member-group sizing
/// (C1 of the partition service).
pub struct PartitionStateManager {
    partition_count: usize,
    state: RwLock<State>,
}

impl PartitionStateManager {
    pub fn new(partition_count: usize) -> Self {
        let table = (0..partition_count).map(Partition::new).collect();
        Self {
            partition_count,
            state: RwLock::new(State {
                table,
                version: 0,
                initialized: false,
                member_group_size: 0,
            }),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn set_version(&self, version: u64) {
        self.state.write().version = version;
    }

    pub fn increment_version(&self) -> u64 {
        let mut state = self.state.write();
        state.version += 1;
        state.version
    }

    pub fn partition(&self, id: usize) -> Partition {
        self.state.read().table[id].clone()
    }

    pub fn partitions_copy(&self) -> PartitionTable {
        self.state.read().table.clone()
    }

    pub fn member_group_size(&self) -> usize {
        self.state.read().member_group_size
    }

    pub fn update_member_groups_size(&self, strategy: &dyn MemberGroupStrategy, members: &[Member]) {
        self.state.write().member_group_size = strategy.group_count(members);
    }

    /// Overwrites the slot vector for `id`, returning the list of slot
    /// changes so the caller can fire migration listeners.
    pub fn update_replicas(&self, id: usize, replicas: [Option<PartitionReplica>; MAX_REPLICA_COUNT]) -> Vec<ReplicaChange> {
        let mut state = self.state.write();
        let mut changes = Vec::new();
        for index in 0..MAX_REPLICA_COUNT {
            let old = state.table[id].replicas[index].clone();
            let new = replicas[index].clone();
            if old != new {
                changes.push((id, index, old, new));
            }
        }
        state.table[id].set_all(replicas);
        changes
    }

    /// Replaces every occurrence of `old` with `new` across the whole
    /// table, used when a member rejoins under a new identity.
    pub fn replace_member(&self, old: &Address, new: &PartitionReplica) {
        let mut state = self.state.write();
        for partition in state.table.iter_mut() {
            for slot in partition.replicas.iter_mut() {
                if let Some(r) = slot {
                    if &r.address == old {
                        *r = new.clone();
                    }
                }
            }
        }
    }

    /// Rejected with `false` if already initialized.
    pub fn set_initial_state(&self, table: PartitionTable) -> bool {
        let mut state = self.state.write();
        if state.initialized {
            return false;
        }
        state.table = table;
        state.initialized = true;
        true
    }

    /// Fills every partition's replica slots from `strategy`, excluding
    /// `excluded_members` (members that asked to leave gracefully). Returns
    /// true iff any partition ended with a non-empty owner; success flips
    /// `is_initialized` to true.
    pub fn initialize_partition_assignments(
        &self,
        strategy: &dyn MemberGroupStrategy,
        data_members: &[Member],
        excluded_members: &[Address],
    ) -> bool {
        let eligible: Vec<Member> = data_members
            .iter()
            .filter(|m| !excluded_members.contains(&m.address))
            .cloned()
            .collect();

        let assignment = strategy.assign(self.partition_count, &eligible);

        let mut state = self.state.write();
        state.member_group_size = strategy.group_count(&eligible);

        let mut any_owner = false;
        for (id, replicas) in assignment.into_iter().enumerate() {
            if replicas[0].is_some() {
                any_owner = true;
            }
            state.table[id].set_all(replicas);
        }

        if any_owner {
            state.initialized = true;
        }
        any_owner
    }

    /// Clears all slots, resets version to 0, and clears the initialized flag.
    pub fn reset(&self) {
        let mut state = self.state.write();
        for partition in state.table.iter_mut() {
            partition.replicas = Default::default();
        }
        state.version = 0;
        state.initialized = false;
        state.member_group_size = 0;
    }
}

impl Partition {
    fn set_all(&mut self, replicas: [Option<PartitionReplica>; MAX_REPLICA_COUNT]) {
        self.replicas = replicas;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::assignment::RackAwareStrategy;

    fn member(port: u16) -> Member {
        Member::new(MemberId::new(), Address::new("127.0.0.1", port))
    }

    #[test]
    fn fresh_manager_is_uninitialized_at_version_zero() {
        let mgr = PartitionStateManager::new(7);
        assert!(!mgr.is_initialized());
        assert_eq!(mgr.version(), 0);
        assert!(!mgr.partition(0).is_assigned());
    }

    #[test]
    fn initialize_assigns_owners_and_flips_initialized() {
        let mgr = PartitionStateManager::new(7);
        let members = vec![member(5701), member(5702), member(5703)];
        let strategy = RackAwareStrategy::default();

        let result = mgr.initialize_partition_assignments(&strategy, &members, &[]);

        assert!(result);
        assert!(mgr.is_initialized());
        for id in 0..7 {
            assert!(mgr.partition(id).owner().is_some());
        }
    }

    #[test]
    fn set_initial_state_rejected_when_already_initialized() {
        let mgr = PartitionStateManager::new(7);
        let members = vec![member(5701)];
        mgr.initialize_partition_assignments(&RackAwareStrategy::default(), &members, &[]);

        assert!(!mgr.set_initial_state(mgr.partitions_copy()));
    }

    #[test]
    fn update_replicas_reports_changes() {
        let mgr = PartitionStateManager::new(1);
        let replica = PartitionReplica::from_member(&member(5701));
        let mut slots: [Option<PartitionReplica>; MAX_REPLICA_COUNT] = Default::default();
        slots[0] = Some(replica.clone());

        let changes = mgr.update_replicas(0, slots.clone());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0], (0, 0, None, Some(replica)));

        let changes = mgr.update_replicas(0, slots);
        assert!(changes.is_empty());
    }

    #[test]
    fn reset_clears_version_and_initialized_flag() {
        let mgr = PartitionStateManager::new(3);
        mgr.initialize_partition_assignments(&RackAwareStrategy::default(), &[member(5701)], &[]);
        mgr.increment_version();

        mgr.reset();

        assert!(!mgr.is_initialized());
        assert_eq!(mgr.version(), 0);
        assert!(!mgr.partition(0).is_assigned());
    }
}
