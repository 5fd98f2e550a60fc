// Migration Manager (C2)
//
// Sequences migrations on a single control queue, tracks active and
// completed migrations, and drives shutdown draining. The "single-threaded
// migration executor" is built the way the teacher's `networking::pool`
// builds its worker pools: a `tokio::spawn` task owning a receiver half,
// driven by a `tokio::sync::mpsc::unbounded_channel` used as an actor
// mailbox (`networking::pool::channel::ChannelPool`) - generalized here from
// a fixed worker pool draining request/response pairs to a single persistent
// worker that also runs the master's periodic control task. Bookkeeping
// (`active_migrations`, `completed_migrations`, the shutdown-requested set)
// is a small set of `parking_lot`-locked collections behind a narrow public
// contract, following the lock-per-collection shape used throughout the
// teacher's `clustering` module.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clustering::membership::{Address, Member};
use crate::clustering::partition::{Partition, PartitionReplica, PartitionTable, MAX_REPLICA_COUNT};

/// PENDING -> SUCCESS or FAILED, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatus {
    Pending,
    Success,
    Failed,
}

/// Describes one partition replica move. Two `MigrationInfo`s are equal iff
/// their `(partition_id, source, destination)` triple matches - status and
/// replica index are deliberately excluded so a completed-migrations set
/// de-duplicates by the move itself, not by how it ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub partition_id: usize,
    pub source: Option<PartitionReplica>,
    pub destination: PartitionReplica,
    pub replica_index: usize,
    pub status: MigrationStatus,
}

impl MigrationInfo {
    pub fn new(
        partition_id: usize,
        source: Option<PartitionReplica>,
        destination: PartitionReplica,
        replica_index: usize,
    ) -> Self {
        Self { partition_id, source, destination, replica_index, status: MigrationStatus::Pending }
    }

    fn involves(&self, address: &Address) -> bool {
        self.destination.address == *address
            || self.source.as_ref().map(|s| &s.address) == Some(address)
    }
}

impl PartialEq for MigrationInfo {
    fn eq(&self, other: &Self) -> bool {
        self.partition_id == other.partition_id
            && self.source == other.source
            && self.destination == other.destination
    }
}

impl Eq for MigrationInfo {}

/// Mutates `partition`'s replica slots per `m`: the slot `source` currently
/// occupies (if any, and if different from `replica_index`) is cleared, and
/// `destination` is written at `replica_index`.
pub fn apply_migration(partition: &Partition, m: &MigrationInfo) -> [Option<PartitionReplica>; MAX_REPLICA_COUNT] {
    let mut slots = partition.replicas().clone();
    if let Some(source) = &m.source {
        if let Some(idx) = slots.iter().position(|s| s.as_ref() == Some(source)) {
            if idx != m.replica_index {
                slots[idx] = None;
            }
        }
    }
    slots[m.replica_index] = Some(m.destination.clone());
    slots
}

/// Diffs `current` against `target`, emitting an ordered migration plan.
/// Owner moves (slot 0) sort before backup moves within a partition; across
/// partitions, moves that free up a member in `shutdown_requested` sort
/// first.
pub fn diff_tables(
    current: &PartitionTable,
    target: &[[Option<PartitionReplica>; MAX_REPLICA_COUNT]],
    shutdown_requested: &HashSet<Address>,
) -> Vec<MigrationInfo> {
    let mut plan = Vec::new();
    for (id, target_slots) in target.iter().enumerate() {
        let current_partition = &current[id];
        for (index, dest) in target_slots.iter().enumerate() {
            let dest = match dest {
                Some(d) => d,
                None => continue,
            };
            if current_partition.replica(index) == Some(dest) {
                continue;
            }
            plan.push(MigrationInfo::new(id, current_partition.replica(index).cloned(), dest.clone(), index));
        }
    }

    plan.sort_by_key(|m| {
        let frees_shutdown_member = m
            .source
            .as_ref()
            .is_some_and(|s| shutdown_requested.contains(&s.address));
        (!frees_shutdown_member, m.replica_index, m.partition_id)
    });
    plan
}

/// The narrow capability the migration manager needs from the coordinator
/// (C5) to run a control task and execute a single migration. Kept
/// deliberately small per the cyclic-reference design note: the migration
/// manager never sees the coordinator's lock or its other sub-managers.
#[async_trait]
pub trait MigrationHost: Send + Sync {
    fn is_master(&self) -> bool;
    fn data_members_excluding(&self, excluded: &[Address]) -> Vec<Member>;
    fn current_table(&self) -> PartitionTable;
    fn target_assignment(&self, members: &[Member]) -> Vec<[Option<PartitionReplica>; MAX_REPLICA_COUNT]>;
    fn migration_timeout(&self) -> Duration;

    /// Invoke the migration RPC on source/destination and await the result.
    async fn invoke_migration_rpc(&self, migration: &MigrationInfo) -> bool;

    /// Commit a successful migration to the partition table and bump the
    /// version. Caller holds the coordinator lock.
    fn commit_migration(&self, migration: &MigrationInfo) -> u64;

    /// Publish the post-commit state to all peers.
    async fn publish(&self);

    /// Inform local services that `migration` has finalized.
    fn finalize_locally(&self, migration: &MigrationInfo);

    /// Inform local listeners that `migration` is about to run.
    fn notify_migration_start(&self, migration: &MigrationInfo);
}

enum Job {
    Control,
    Task(Pin<Box<dyn Future<Output = ()> + Send>>),
}

struct Shared {
    active: Mutex<Option<MigrationInfo>>,
    completed: Mutex<Vec<MigrationInfo>>,
    shutdown_requested: Mutex<HashSet<Address>>,
    paused: AtomicBool,
    control_queued: AtomicBool,
    queue_len: AtomicUsize,
}

/// Sequences migrations on a single control queue; tracks active and
/// completed migrations; drives shutdown draining (C2).
pub struct MigrationManager {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MigrationManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                active: Mutex::new(None),
                completed: Mutex::new(Vec::new()),
                shutdown_requested: Mutex::new(HashSet::new()),
                paused: AtomicBool::new(false),
                control_queued: AtomicBool::new(false),
                queue_len: AtomicUsize::new(0),
            }),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Starts the single worker that drains the control queue.
    pub fn start(&self, host: Arc<dyn MigrationHost>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                shared.queue_len.fetch_sub(1, Ordering::SeqCst);
                match job {
                    Job::Control => {
                        shared.control_queued.store(false, Ordering::SeqCst);
                        run_control_task(&*host, &shared).await;
                    }
                    Job::Task(fut) => fut.await,
                }
            }
        });
        *self.sender.lock() = Some(tx);
        *self.worker.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }

    /// Enqueues a control task. Multiple triggers while one is queued
    /// collapse into a single run.
    pub fn trigger_control_task(&self) {
        if self.shared.control_queued.swap(true, Ordering::SeqCst) {
            debug!("control task already queued, coalescing");
            return;
        }
        self.enqueue(Job::Control);
    }

    /// Enqueues an arbitrary migration-executor task, used by the
    /// master-takeover reconciliation task.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(Job::Task(Box::pin(task)));
    }

    fn enqueue(&self, job: Job) {
        if let Some(sender) = self.sender.lock().as_ref() {
            self.shared.queue_len.fetch_add(1, Ordering::SeqCst);
            if sender.send(job).is_err() {
                self.shared.queue_len.fetch_sub(1, Ordering::SeqCst);
                warn!("migration executor is not running, dropping job");
            }
        } else {
            warn!("migration executor is not running, dropping job");
        }
    }

    pub fn active_migration(&self) -> Option<MigrationInfo> {
        self.shared.active.lock().clone()
    }

    pub fn completed_migrations_copy(&self) -> Vec<MigrationInfo> {
        self.shared.completed.lock().clone()
    }

    /// Idempotent: returns true iff `m` was not already present.
    pub fn add_completed_migration(&self, m: MigrationInfo) -> bool {
        let mut completed = self.shared.completed.lock();
        if completed.contains(&m) {
            return false;
        }
        completed.push(m);
        true
    }

    pub fn retain_completed_migrations<F>(&self, keep: F)
    where
        F: Fn(&MigrationInfo) -> bool,
    {
        self.shared.completed.lock().retain(|m| keep(m));
    }

    pub fn schedule_active_migration_finalization(&self, host: Arc<dyn MigrationHost>, m: MigrationInfo) {
        self.schedule(async move { host.finalize_locally(&m) });
    }

    pub fn pause_migration(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_migration(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn are_migration_tasks_allowed(&self) -> bool {
        !self.shared.paused.load(Ordering::SeqCst)
    }

    /// Cancels any active migration involving `member`, marks it FAILED, and
    /// forces a control-task re-run.
    pub fn on_member_remove(&self, member: &Address) {
        let mut active = self.shared.active.lock();
        if let Some(mut migration) = active.take() {
            if migration.involves(member) {
                migration.status = MigrationStatus::Failed;
                self.shared.completed.lock().push(migration);
            } else {
                *active = Some(migration);
            }
        }
        drop(active);
        self.trigger_control_task();
    }

    pub fn on_shutdown_request(&self, member: Address) {
        self.shared.shutdown_requested.lock().insert(member);
    }

    pub fn shutdown_requested_members(&self) -> Vec<Address> {
        self.shared.shutdown_requested.lock().iter().cloned().collect()
    }

    pub fn has_ongoing_migration(&self) -> bool {
        self.shared.active.lock().is_some()
    }

    pub fn migration_queue_size(&self) -> usize {
        self.shared.queue_len.load(Ordering::SeqCst)
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_control_task(host: &dyn MigrationHost, shared: &Shared) {
    if !host.is_master() {
        return;
    }

    let excluded = shared.shutdown_requested.lock().iter().cloned().collect::<Vec<_>>();
    let members = host.data_members_excluding(&excluded);
    let current = host.current_table();
    let target = host.target_assignment(&members);
    let excluded_set: HashSet<Address> = excluded.into_iter().collect();
    let plan = diff_tables(&current, &target, &excluded_set);

    for migration in plan {
        if shared.paused.load(Ordering::SeqCst) {
            break;
        }

        *shared.active.lock() = Some(migration.clone());
        host.notify_migration_start(&migration);

        let succeeded = host.invoke_migration_rpc(&migration).await;
        let mut finished = migration;
        if succeeded {
            finished.status = MigrationStatus::Success;
            host.commit_migration(&finished);
            host.publish().await;
        } else {
            finished.status = MigrationStatus::Failed;
        }

        shared.completed.lock().push(finished.clone());
        *shared.active.lock() = None;
        host.finalize_locally(&finished);
    }
}
