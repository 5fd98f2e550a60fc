use thiserror::Error;

use crate::clustering::membership::Address;

/// Error taxonomy for the partition service.
///
/// Only the variants that can actually reach a caller are modeled here.
/// Recoverable conditions (stale version, unknown sender, lock timeout) are
/// handled at the boundary where they occur and never surface as an `Err` -
/// see the failure semantics table in SPEC_FULL.md §4.5.1.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("partition service is not active")]
    NotActive,

    #[error("migration is disallowed by the current cluster state")]
    MigrationDisallowed,

    #[error("no data member exists in the cluster")]
    NoDataMember,

    #[error("partition state manager is already initialized")]
    AlreadyInitialized,

    #[error("sender {sender} is not the known master {known_master}")]
    UnknownSender { sender: Address, known_master: Address },

    #[error("timed out waiting for the coordinator lock")]
    LockTimeout,

    #[error("rpc to {0} timed out")]
    RpcTimeout(Address),

    #[error("member {0} left before the request completed")]
    MemberLeft(Address),

    #[error("{0} is not a cluster member")]
    TargetNotMember(Address),

    #[error("waiting for a partition owner was interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, PartitionError>;
