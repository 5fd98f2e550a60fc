// Replica Manager (C3)
//
// Schedules and tracks per-(partition, replica index) version-sync requests:
// a backup whose version counter lags its owner's needs a full resync before
// it can serve reads. Grounded on the teacher's `LockFreeGrdCache`
// (enterprise_optimization::grd_optimizer), which replaces per-resource
// locking with independent `DashMap`s so unrelated keys never serialize
// behind one lock - used here for the scheduled/ongoing sync maps, which are
// touched from both the control task and completion callbacks concurrently.

use std::time::Duration;

use dashmap::DashMap;

use crate::clustering::membership::Address;

/// Identifies one replica slot within the partition table.
pub type ReplicaKey = (usize, usize);

/// Tracks scheduled and in-flight replica version-sync requests (C3).
pub struct ReplicaManager {
    scheduled: DashMap<ReplicaKey, Address>,
    ongoing: DashMap<ReplicaKey, Address>,
    sync_timeout: Duration,
}

impl ReplicaManager {
    pub fn new(sync_timeout: Duration) -> Self {
        Self { scheduled: DashMap::new(), ongoing: DashMap::new(), sync_timeout }
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    /// Queues a version sync for `(partition_id, replica_index)` against
    /// `target`. Returns false if a sync for this key is already scheduled
    /// or ongoing, leaving the existing request untouched.
    pub fn schedule_replica_version_sync(&self, partition_id: usize, replica_index: usize, target: Address) -> bool {
        let key = (partition_id, replica_index);
        if self.ongoing.contains_key(&key) || self.scheduled.contains_key(&key) {
            return false;
        }
        self.scheduled.insert(key, target);
        true
    }

    /// Moves a scheduled sync for `key` into the ongoing set, returning its
    /// target address if one was scheduled.
    pub fn mark_ongoing(&self, key: ReplicaKey) -> Option<Address> {
        let (_, target) = self.scheduled.remove(&key)?;
        self.ongoing.insert(key, target.clone());
        Some(target)
    }

    /// Clears `key` from the ongoing set once its sync completes (or times
    /// out), regardless of outcome.
    pub fn complete(&self, key: ReplicaKey) {
        self.ongoing.remove(&key);
    }

    /// Drops every scheduled or ongoing sync request addressed to `target`,
    /// used when a member leaves the cluster mid-sync.
    pub fn cancel_replica_sync_requests_to(&self, target: &Address) {
        self.scheduled.retain(|_, v| v != target);
        self.ongoing.retain(|_, v| v != target);
    }

    /// Clears all scheduled and ongoing sync state, used on master takeover
    /// and on full table reset.
    pub fn reset(&self) {
        self.scheduled.clear();
        self.ongoing.clear();
    }

    pub fn has_ongoing_sync(&self, key: ReplicaKey) -> bool {
        self.ongoing.contains_key(&key)
    }

    pub fn ongoing_sync_count(&self) -> usize {
        self.ongoing.len()
    }

    pub fn scheduled_sync_count(&self) -> usize {
        self.scheduled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Address {
        Address::new("127.0.0.1", port)
    }

    #[test]
    fn scheduling_twice_for_the_same_key_is_rejected() {
        let mgr = ReplicaManager::new(Duration::from_secs(5));
        assert!(mgr.schedule_replica_version_sync(3, 1, addr(5701)));
        assert!(!mgr.schedule_replica_version_sync(3, 1, addr(5702)));
        assert_eq!(mgr.scheduled_sync_count(), 1);
    }

    #[test]
    fn mark_ongoing_moves_between_maps() {
        let mgr = ReplicaManager::new(Duration::from_secs(5));
        mgr.schedule_replica_version_sync(3, 1, addr(5701));

        let target = mgr.mark_ongoing((3, 1));

        assert_eq!(target, Some(addr(5701)));
        assert_eq!(mgr.scheduled_sync_count(), 0);
        assert!(mgr.has_ongoing_sync((3, 1)));
    }

    #[test]
    fn complete_clears_ongoing_entry() {
        let mgr = ReplicaManager::new(Duration::from_secs(5));
        mgr.schedule_replica_version_sync(3, 1, addr(5701));
        mgr.mark_ongoing((3, 1));

        mgr.complete((3, 1));

        assert!(!mgr.has_ongoing_sync((3, 1)));
    }

    #[test]
    fn cancel_requests_to_a_departed_member_clears_both_maps() {
        let mgr = ReplicaManager::new(Duration::from_secs(5));
        mgr.schedule_replica_version_sync(0, 0, addr(5701));
        mgr.schedule_replica_version_sync(1, 0, addr(5702));
        mgr.mark_ongoing((1, 0));

        mgr.cancel_replica_sync_requests_to(&addr(5702));

        assert_eq!(mgr.scheduled_sync_count(), 1);
        assert_eq!(mgr.ongoing_sync_count(), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mgr = ReplicaManager::new(Duration::from_secs(5));
        mgr.schedule_replica_version_sync(0, 0, addr(5701));
        mgr.mark_ongoing((0, 0));

        mgr.reset();

        assert_eq!(mgr.scheduled_sync_count(), 0);
        assert_eq!(mgr.ongoing_sync_count(), 0);
    }
}
