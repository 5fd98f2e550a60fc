// Member-Group Assignment Strategy
//
// The injected collaborator used by the Partition State Manager (initial
// arrangement) and the Migration Manager's control task (target
// computation). Grounded on the teacher's `ShardMap` node-mapping pattern
// (clustering::coordinator) generalized from a flat key->node map to a
// group-aware, deterministic replica placement.

use std::collections::BTreeMap;

use crate::clustering::membership::Member;
use crate::clustering::partition::{PartitionReplica, MAX_REPLICA_COUNT};

/// Partitions data members into groups (e.g. racks/zones) and deterministically
/// fills a partition table's replica slots so that no two slots of the same
/// partition land in the same group.
pub trait MemberGroupStrategy: Send + Sync {
    /// Number of distinct groups among `members`.
    fn group_count(&self, members: &[Member]) -> usize;

    /// Compute a full target assignment for `partition_count` partitions
    /// over `members`. Backup count is `min(group_count - 1, 6)`.
    fn assign(
        &self,
        partition_count: usize,
        members: &[Member],
    ) -> Vec<[Option<PartitionReplica>; MAX_REPLICA_COUNT]>;
}

/// Default strategy: members without an explicit `zone` are each their own
/// singleton group (one replica per physical member, the common case for a
/// cluster with no rack topology configured); members sharing a `zone` are
/// grouped together so a partition never places two of its replicas on the
/// same rack.
#[derive(Debug, Default, Clone, Copy)]
pub struct RackAwareStrategy;

impl RackAwareStrategy {
    fn groups(&self, members: &[Member]) -> Vec<Vec<Member>> {
        let mut grouped: BTreeMap<String, Vec<Member>> = BTreeMap::new();
        for member in members {
            let key = member
                .zone
                .clone()
                .unwrap_or_else(|| member.address.to_string());
            grouped.entry(key).or_default().push(member.clone());
        }
        for group in grouped.values_mut() {
            group.sort_by(|a, b| a.address.to_string().cmp(&b.address.to_string()));
        }
        grouped.into_values().collect()
    }
}

impl MemberGroupStrategy for RackAwareStrategy {
    fn group_count(&self, members: &[Member]) -> usize {
        self.groups(members).len()
    }

    fn assign(
        &self,
        partition_count: usize,
        members: &[Member],
    ) -> Vec<[Option<PartitionReplica>; MAX_REPLICA_COUNT]> {
        let groups = self.groups(members);
        let group_count = groups.len();

        if group_count == 0 {
            return vec![Default::default(); partition_count];
        }

        let backup_count = group_count.saturating_sub(1).min(MAX_REPLICA_COUNT - 1);

        (0..partition_count)
            .map(|p| {
                let mut slots: [Option<PartitionReplica>; MAX_REPLICA_COUNT] = Default::default();
                for (s, slot) in slots.iter_mut().enumerate().take(backup_count + 1) {
                    let group = &groups[(p + s) % group_count];
                    if group.is_empty() {
                        continue;
                    }
                    let member = &group[(p / group_count + s) % group.len()];
                    *slot = Some(PartitionReplica::from_member(member));
                }
                slots
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::membership::{Address, MemberId};

    fn member(port: u16) -> Member {
        Member::new(MemberId::new(), Address::new("127.0.0.1", port))
    }

    #[test]
    fn empty_membership_yields_empty_partitions() {
        let strategy = RackAwareStrategy::default();
        let assignment = strategy.assign(7, &[]);
        assert_eq!(assignment.len(), 7);
        assert!(assignment.iter().all(|slots| slots.iter().all(Option::is_none)));
    }

    #[test]
    fn every_slot_in_a_partition_is_a_distinct_member() {
        let members = vec![member(5701), member(5702), member(5703), member(5704)];
        let strategy = RackAwareStrategy::default();
        let assignment = strategy.assign(31, &members);

        for slots in &assignment {
            let filled: Vec<_> = slots.iter().flatten().map(|r| &r.address).collect();
            let mut unique = filled.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(filled.len(), unique.len(), "duplicate member within a partition");
        }
    }

    #[test]
    fn backup_count_is_capped_at_six() {
        let members: Vec<Member> = (0..20).map(|i| member(5700 + i)).collect();
        let strategy = RackAwareStrategy::default();
        let assignment = strategy.assign(3, &members);
        for slots in &assignment {
            assert_eq!(slots.iter().filter(|s| s.is_some()).count(), 7);
        }
    }

    #[test]
    fn members_sharing_a_zone_never_share_a_partition_slot() {
        let members = vec![
            member(5701).in_zone("rack-a"),
            member(5702).in_zone("rack-a"),
            member(5703).in_zone("rack-b"),
        ];
        let strategy = RackAwareStrategy::default();
        assert_eq!(strategy.group_count(&members), 2);

        let assignment = strategy.assign(11, &members);
        for slots in &assignment {
            // Only 2 groups -> backup count 1 -> at most 2 filled slots.
            assert!(slots.iter().filter(|s| s.is_some()).count() <= 2);
        }
    }

    #[test]
    fn assignment_is_deterministic_for_a_fixed_membership() {
        let members = vec![member(5701), member(5702), member(5703)];
        let strategy = RackAwareStrategy::default();
        let a = strategy.assign(271, &members);
        let b = strategy.assign(271, &members);
        for (pa, pb) in a.iter().zip(b.iter()) {
            assert_eq!(pa, pb);
        }
    }
}
