// Cluster Membership Capability
//
// The partition service does not implement cluster membership or failure
// detection itself - both are explicit non-goals (SPEC_FULL.md §1). Instead
// it depends on a narrow `ClusterMembership` capability trait, following the
// cyclic-reference-avoidance design note: the coordinator is handed a
// `dyn ClusterMembership` at construction and only ever sees the handful of
// queries it actually needs, never the membership subsystem's internals.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Network address of a cluster member. Two replicas/members are considered
/// the same network endpoint iff their addresses are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Member identifier. `UNKNOWN` is a sentinel used for backward
/// compatibility with older cluster versions that only knew addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub Uuid);

impl MemberId {
    /// Sentinel for replicas received from a peer that predates member uuids.
    pub const UNKNOWN: MemberId = MemberId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cluster member as seen by the partition service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub address: Address,
    /// Lite members hold no partitions and are excluded from the
    /// replica-assignment set.
    pub lite: bool,
    /// Rack/zone tag consumed by the member-group assignment strategy. Two
    /// replicas of the same partition are never placed in the same group.
    pub zone: Option<String>,
}

impl Member {
    pub fn new(id: MemberId, address: Address) -> Self {
        Self { id, address, lite: false, zone: None }
    }

    pub fn lite(id: MemberId, address: Address) -> Self {
        Self { id, address, lite: true, zone: None }
    }

    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

/// The capability the partition service needs from the cluster membership /
/// failure-detector subsystem. A real node wires this to its SWIM-style (or
/// similar) membership implementation; tests and the demo binary use
/// `StaticMembershipView` below.
pub trait ClusterMembership: Send + Sync {
    /// This node's own member record.
    fn local_member(&self) -> Member;

    /// The address of the currently known master, if any.
    fn master_address(&self) -> Option<Address>;

    /// True iff this node is currently the master.
    fn is_local_master(&self) -> bool {
        self.master_address().as_ref() == Some(&self.local_member().address)
    }

    /// All non-lite members eligible to hold partitions, in a stable order.
    fn data_members(&self) -> Vec<Member>;

    /// All members (data and lite).
    fn all_members(&self) -> Vec<Member>;

    /// Look up a member by address.
    fn member_by_address(&self, address: &Address) -> Option<Member> {
        self.all_members().into_iter().find(|m| &m.address == address)
    }

    /// True iff the current cluster state allows migrations/promotions.
    fn is_migration_allowed(&self) -> bool;

    /// True iff this node is not in the process of shutting down.
    fn is_node_active(&self) -> bool;
}

/// Simple in-memory `ClusterMembership` used by tests and the demo binary to
/// simulate a fixed cluster without a real failure detector.
pub struct StaticMembershipView {
    local: Member,
    master: Option<Address>,
    members: Vec<Member>,
    migration_allowed: bool,
    active: bool,
}

impl StaticMembershipView {
    pub fn new(local: Member, master: Option<Address>, members: Vec<Member>) -> Self {
        Self { local, master, members, migration_allowed: true, active: true }
    }

    pub fn set_master(&mut self, master: Option<Address>) {
        self.master = master;
    }

    pub fn set_members(&mut self, members: Vec<Member>) {
        self.members = members;
    }

    pub fn remove_member(&mut self, address: &Address) {
        self.members.retain(|m| &m.address != address);
    }

    pub fn set_migration_allowed(&mut self, allowed: bool) {
        self.migration_allowed = allowed;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

impl ClusterMembership for StaticMembershipView {
    fn local_member(&self) -> Member {
        self.local.clone()
    }

    fn master_address(&self) -> Option<Address> {
        self.master.clone()
    }

    fn data_members(&self) -> Vec<Member> {
        self.members.iter().filter(|m| !m.lite).cloned().collect()
    }

    fn all_members(&self) -> Vec<Member> {
        self.members.clone()
    }

    fn is_migration_allowed(&self) -> bool {
        self.migration_allowed
    }

    fn is_node_active(&self) -> bool {
        self.active
    }
}

/// True iff an incoming replica's (address, id) pair refers to a member this
/// node doesn't know about and hasn't already accounted for. See
/// `PartitionServiceCoordinator::apply_new_partition_table` step 3.
pub fn is_unknown_replica_owner(
    members: &[Member],
    missing_but_expected: &HashSet<MemberId>,
    candidate_id: &MemberId,
    candidate_address: &Address,
) -> bool {
    if missing_but_expected.contains(candidate_id) {
        return false;
    }
    !members
        .iter()
        .any(|m| &m.id == candidate_id && &m.address == candidate_address)
}
