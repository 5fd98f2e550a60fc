// Partition Service Coordinator (C5)
//
// The public facade: wires the narrow-capability collaborators (C1-C4, plus
// the injected `ClusterMembership`, `MemberGroupStrategy` and
// `PartitionServiceTransport`) into the consumer-facing API. Grounded on the
// teacher's `QueryCoordinator` (clustering::coordinator) - a facade holding
// a coarse lock around multi-step state transitions while most reads go
// through finer-grained locks owned by the sub-managers themselves.
//
// The migration manager needs to call back into this facade (to plan a
// control task, invoke RPCs, and publish) without owning an `Arc` back to
// it - that would leak memory, since the facade also owns the migration
// manager. `HostHandle` instead holds a `Weak<Inner>`, upgraded on every
// call; this is the cyclic-reference break the design notes call for,
// expressed with `std::sync::Weak` rather than a second capability trait
// per collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::warn;

use crate::clustering::assignment::MemberGroupStrategy;
use crate::clustering::coalesce::CoalescingDelayedTrigger;
use crate::clustering::hash::{partition_id_for, PartitionHashed};
use crate::clustering::listeners::{ListenerId, ListenerRegistries, MigrationListener, PartitionLostEvent, PartitionLostListener};
use crate::clustering::membership::{is_unknown_replica_owner, Address, ClusterMembership, Member};
use crate::clustering::migration::{self, MigrationHost, MigrationInfo, MigrationManager, MigrationStatus};
use crate::clustering::partition::{Partition, PartitionStateManager, PartitionTable};
use crate::clustering::replica::ReplicaManager;
use crate::clustering::rpc::{
    AssignPartitionsOp, FetchPartitionStateOperation, MigrationRequestOperation, PartitionOp, PartitionOpResponse,
    PartitionStateOperation, PartitionStateVersionCheckOperation, SharedTransport, ShutdownRequestOperation,
    TriggerMemberListPublishOp,
};
use crate::clustering::safety::{self, SafetyStatus};
use crate::config::PartitionServiceConfig;
use crate::error::{PartitionError, Result};

struct HostHandle(Weak<Inner>);

#[async_trait]
impl MigrationHost for HostHandle {
    fn is_master(&self) -> bool {
        self.0.upgrade().map(|i| i.membership.is_local_master()).unwrap_or(false)
    }

    fn data_members_excluding(&self, excluded: &[Address]) -> Vec<Member> {
        let Some(inner) = self.0.upgrade() else { return Vec::new() };
        inner.membership.data_members().into_iter().filter(|m| !excluded.contains(&m.address)).collect()
    }

    fn current_table(&self) -> PartitionTable {
        self.0.upgrade().map(|i| i.partitions.partitions_copy()).unwrap_or_default()
    }

    fn target_assignment(&self, members: &[Member]) -> Vec<[Option<crate::clustering::partition::PartitionReplica>; crate::clustering::partition::MAX_REPLICA_COUNT]> {
        let Some(inner) = self.0.upgrade() else { return Vec::new() };
        inner.strategy.assign(inner.partitions.partition_count(), members)
    }

    fn migration_timeout(&self) -> Duration {
        self.0
            .upgrade()
            .map(|i| i.config.partition_migration_timeout)
            .unwrap_or(Duration::from_secs(10))
    }

    async fn invoke_migration_rpc(&self, migration: &MigrationInfo) -> bool {
        match self.0.upgrade() {
            Some(inner) => inner.invoke_migration_rpc(migration).await,
            None => false,
        }
    }

    fn commit_migration(&self, migration: &MigrationInfo) -> u64 {
        self.0.upgrade().map(|inner| inner.commit_migration(migration)).unwrap_or(0)
    }

    async fn publish(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.publish_partition_runtime_state().await;
        }
    }

    fn finalize_locally(&self, migration: &MigrationInfo) {
        if let Some(inner) = self.0.upgrade() {
            inner.listeners.fire_migration_complete(migration);
        }
    }

    fn notify_migration_start(&self, migration: &MigrationInfo) {
        if let Some(inner) = self.0.upgrade() {
            inner.listeners.fire_migration_start(migration);
        }
    }
}

struct Inner {
    config: PartitionServiceConfig,
    membership: Arc<dyn ClusterMembership>,
    strategy: Arc<dyn MemberGroupStrategy>,
    transport: SharedTransport,
    partitions: PartitionStateManager,
    migrations: MigrationManager,
    replicas: ReplicaManager,
    listeners: ListenerRegistries,
    lock: ReentrantMutex<()>,
    active: AtomicBool,
    local_migration_active: AtomicBool,
    publish_trigger: Mutex<Option<Arc<CoalescingDelayedTrigger>>>,
    /// CAS-guarded so at most one `AssignPartitions` RPC is in flight per
    /// coalescing window; cleared on response or by the timer below.
    master_triggered: Arc<AtomicBool>,
    /// The master address last observed by `on_member_removed`, used to
    /// detect "this node just became master" on the next membership event.
    last_master: Mutex<Option<Address>>,
    /// Set for the duration of a master-takeover reconciliation run.
    should_fetch_partition_tables: AtomicBool,
}

impl Inner {
    fn local_address(&self) -> Address {
        self.membership.local_member().address
    }

    async fn invoke_migration_rpc(&self, migration: &MigrationInfo) -> bool {
        let local = self.local_address();
        let involves_local =
            migration.destination.address == local || migration.source.as_ref().map(|s| &s.address) == Some(&local);
        if involves_local {
            self.local_migration_active.store(true, Ordering::SeqCst);
        }

        let op = PartitionOp::MigrationRequest(MigrationRequestOperation {
            migration: migration.clone(),
            timeout: self.config.partition_migration_timeout,
        });
        let result = match self.transport.send(&migration.destination.address, op).await {
            Ok(PartitionOpResponse::MigrationResult(ok)) => ok,
            Ok(_) => true,
            Err(err) => {
                warn!(target = %migration.destination.address, error = %err, "migration rpc failed");
                false
            }
        };

        if involves_local {
            self.local_migration_active.store(false, Ordering::SeqCst);
        }
        result
    }

    fn commit_migration(&self, migration: &MigrationInfo) -> u64 {
        let partition = self.partitions.partition(migration.partition_id);
        let new_slots = migration::apply_migration(&partition, migration);
        self.partitions.update_replicas(migration.partition_id, new_slots);
        self.partitions.increment_version()
    }

    async fn publish_partition_runtime_state(&self) {
        let table = self.partitions.partitions_copy();
        let version = self.partitions.version();
        let completed_migrations = self.migrations.completed_migrations_copy();
        let active_migration = self.migrations.active_migration();
        let local = self.local_address();
        for member in self.membership.data_members() {
            if member.address == local {
                continue;
            }
            let op = PartitionOp::PartitionState(PartitionStateOperation {
                version,
                table: table.clone(),
                completed_migrations: completed_migrations.clone(),
                active_migration: active_migration.clone(),
            });
            if let Err(err) = self.transport.send(&member.address, op).await {
                warn!(target = %member.address, error = %err, "failed to publish partition state");
            }
        }
    }

    fn schedule_publish(&self) {
        if let Some(trigger) = self.publish_trigger.lock().as_ref() {
            trigger.trigger();
        }
    }

    fn first_arrangement(&self) -> Result<bool> {
        let _guard = self.lock.lock();
        if self.partitions.is_initialized() {
            return Ok(false);
        }
        if !self.membership.is_local_master() {
            return Err(PartitionError::NotActive);
        }

        let data_members = self.membership.data_members();
        if data_members.is_empty() {
            return Err(PartitionError::NoDataMember);
        }

        let excluded = self.migrations.shutdown_requested_members();
        let assigned = self.partitions.initialize_partition_assignments(&*self.strategy, &data_members, &excluded);
        if assigned {
            self.partitions.set_version(1);
        }
        Ok(assigned)
    }

    /// Non-master path of `getPartitionOwner`: asks the master to compute
    /// and commit the initial assignment, coalesced by `master_triggered` so
    /// a burst of lookups against an uninitialized table sends at most one
    /// `AssignPartitions` RPC per coalescing window.
    fn request_assignment_from_master(&self, master: Address) {
        if self.master_triggered.swap(true, Ordering::SeqCst) {
            return;
        }

        let transport = self.transport.clone();
        let flag = self.master_triggered.clone();
        let target = master.clone();
        tokio::spawn(async move {
            let _ = transport.send(&target, PartitionOp::AssignPartitions(AssignPartitionsOp)).await;
            flag.store(false, Ordering::SeqCst);
        });

        let flag = self.master_triggered.clone();
        let window = self.config.master_trigger_coalesce_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            flag.store(false, Ordering::SeqCst);
        });
    }

    /// The four-step commit algorithm for an inbound partition table:
    /// reject stale versions, verify the sender is a recognized master,
    /// detect replicas owned by members this node doesn't know about yet
    /// (triggering a member-list republish), then commit and fold in the
    /// sender's completed/active migrations.
    ///
    /// A sender that isn't the known master is not a caller error - per
    /// SPEC_FULL.md §4.5.1 it's rejected and logged locally (WARNING for a
    /// known non-master, SEVERE for a stranger) and the update is dropped,
    /// never propagated as an `Err`.
    fn apply_new_partition_table(
        &self,
        version: u64,
        table: PartitionTable,
        completed: Vec<MigrationInfo>,
        sender: &Address,
    ) -> Result<bool> {
        let _guard = self.lock.lock();

        if self.partitions.is_initialized() && version <= self.partitions.version() {
            return Ok(false);
        }

        if let Some(master) = self.membership.master_address() {
            if *sender != master && *sender != self.local_address() {
                let known_non_master = self.membership.member_by_address(sender).is_some();
                if known_non_master {
                    warn!(sender = %sender, master = %master, "partition state from known non-master rejected");
                } else {
                    tracing::error!(sender = %sender, master = %master, "partition state from unknown sender rejected");
                }
                return Ok(false);
            }
        }

        let known_members = self.membership.all_members();
        let no_missing = HashSet::new();
        let saw_unknown_replica = table.iter().any(|partition| {
            partition.replicas().iter().flatten().any(|replica| {
                !replica.id.is_unknown() && is_unknown_replica_owner(&known_members, &no_missing, &replica.id, &replica.address)
            })
        });

        let any_changes = if !self.partitions.is_initialized() {
            self.partitions.set_initial_state(table);
            true
        } else {
            table.iter().enumerate().fold(false, |changed, (id, partition)| {
                let changes = self.partitions.update_replicas(id, partition.replicas().clone());
                changed || !changes.is_empty()
            })
        };
        self.partitions.set_version(version);

        for migration in completed {
            self.migrations.add_completed_migration(migration);
        }

        if saw_unknown_replica {
            let transport = self.transport.clone();
            let master = self.membership.master_address();
            tokio::spawn(async move {
                if let Some(master) = master {
                    let _ = transport.send(&master, PartitionOp::TriggerMemberListPublish(TriggerMemberListPublishOp)).await;
                }
            });
        }

        Ok(any_changes || saw_unknown_replica)
    }

    /// Sends a `ShutdownRequest` to `master` and waits for its ack in steps
    /// of at most one second, retrying until `timeout` elapses. Models the
    /// spec's "wait on a latch released by `onShutdownResponse`" via this
    /// crate's request/response-only transport: the ack itself stands in for
    /// the master's signal that this member's migrations have drained.
    async fn await_shutdown_ack(&self, master: &Address, member: Address, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let step = (deadline - now).min(Duration::from_secs(1));
            let op = PartitionOp::ShutdownRequest(ShutdownRequestOperation { member: member.clone() });
            match tokio::time::timeout(step, self.transport.send(master, op)).await {
                Ok(Ok(PartitionOpResponse::Ack)) => return true,
                Ok(Ok(_)) | Ok(Err(_)) => return false,
                Err(_) => continue,
            }
        }
    }

    async fn request_replica_sync(&self, owner: Address) -> bool {
        matches!(
            self.transport.send(&owner, PartitionOp::FetchPartitionState(FetchPartitionStateOperation)).await,
            Ok(_)
        )
    }
}

/// The master-coordinated partition table service's public facade (C5).
pub struct PartitionServiceCoordinator {
    inner: Arc<Inner>,
}

impl PartitionServiceCoordinator {
    pub fn new(
        config: PartitionServiceConfig,
        membership: Arc<dyn ClusterMembership>,
        strategy: Arc<dyn MemberGroupStrategy>,
        transport: SharedTransport,
    ) -> Self {
        let partition_count = config.partition_count();
        let replica_sync_timeout = config.sync_partition_state_timeout;
        let coalesce_window = config.master_trigger_coalesce_window;

        let initial_master = membership.master_address();

        let inner = Arc::new(Inner {
            config,
            membership,
            strategy,
            transport,
            partitions: PartitionStateManager::new(partition_count),
            migrations: MigrationManager::new(),
            replicas: ReplicaManager::new(replica_sync_timeout),
            listeners: ListenerRegistries::new(),
            lock: ReentrantMutex::new(()),
            active: AtomicBool::new(true),
            local_migration_active: AtomicBool::new(false),
            publish_trigger: Mutex::new(None),
            master_triggered: Arc::new(AtomicBool::new(false)),
            last_master: Mutex::new(initial_master),
            should_fetch_partition_tables: AtomicBool::new(false),
        });

        inner.migrations.start(Arc::new(HostHandle(Arc::downgrade(&inner))));

        let publish_host = Arc::downgrade(&inner);
        let trigger = CoalescingDelayedTrigger::new(Duration::from_millis(100), coalesce_window, move || {
            let host = publish_host.clone();
            Box::pin(async move {
                if let Some(inner) = host.upgrade() {
                    inner.publish_partition_runtime_state().await;
                }
            })
        });
        *inner.publish_trigger.lock() = Some(trigger);

        Self { inner }
    }

    /// Master-only: computes and commits the initial assignment if the
    /// table isn't initialized yet, otherwise runs the migration control
    /// task to converge toward the current target assignment.
    pub fn trigger_master_to_assign_partitions(&self) -> Result<()> {
        if !self.inner.membership.is_local_master() {
            return Ok(());
        }
        if !self.inner.partitions.is_initialized() {
            if self.inner.first_arrangement()? {
                self.inner.schedule_publish();
            }
        } else {
            self.inner.migrations.trigger_control_task();
        }
        Ok(())
    }

    pub async fn publish_partition_runtime_state(&self) {
        self.inner.publish_partition_runtime_state().await;
    }

    /// Coalesced equivalent of an immediate publish: several calls in quick
    /// succession collapse into one send per peer.
    pub fn sync_partition_runtime_state(&self) {
        self.inner.schedule_publish();
    }

    /// Probes every data member's version and schedules a publish for any
    /// that report a mismatch.
    pub async fn check_cluster_partition_runtime_states(&self) {
        let version = self.inner.partitions.version();
        let local = self.inner.local_address();
        for member in self.inner.membership.data_members() {
            if member.address == local {
                continue;
            }
            let op = PartitionOp::PartitionStateVersionCheck(PartitionStateVersionCheckOperation { version });
            if let Ok(PartitionOpResponse::VersionMatches(false)) = self.inner.transport.send(&member.address, op).await {
                self.inner.schedule_publish();
            }
        }
    }

    /// Applies an inbound `PartitionStateOperation`, returning whether it
    /// changed local state.
    pub fn process_partition_runtime_state(&self, op: PartitionStateOperation, sender: Address) -> Result<bool> {
        self.inner.apply_new_partition_table(op.version, op.table, op.completed_migrations, &sender)
    }

    /// Run once a node discovers it has become the new master
    /// (`FetchMostRecentPartitionTableTask`): fetches every peer's table,
    /// version, completed migrations and active migration; forces any
    /// accumulated active migrations to FAILED and folds them into the
    /// completed set alongside this node's own active migration, if any;
    /// adopts the newest table found (bumping its version one past the max
    /// seen) or, if already initialized and nothing newer turned up,
    /// increments the local version by one to signal the change of
    /// authority; then clears in-flight replica-sync bookkeeping and
    /// republishes.
    pub async fn fetch_most_recent_partition_table(&self) {
        let mut best: Option<(u64, PartitionTable)> = None;
        let mut accumulated_completed = Vec::new();
        let local = self.inner.local_address();

        for member in self.inner.membership.data_members() {
            if member.address == local {
                continue;
            }
            if let Ok(PartitionOpResponse::State { version, table, completed_migrations, active_migration }) =
                self.inner.transport.send(&member.address, PartitionOp::FetchPartitionState(FetchPartitionStateOperation)).await
            {
                accumulated_completed.extend(completed_migrations);
                if let Some(mut migration) = active_migration {
                    migration.status = MigrationStatus::Failed;
                    accumulated_completed.push(migration);
                }
                if best.as_ref().map(|(v, _)| version > *v).unwrap_or(true) {
                    best = Some((version, table));
                }
            }
        }

        if let Some(mut migration) = self.inner.migrations.active_migration() {
            migration.status = MigrationStatus::Failed;
            accumulated_completed.push(migration);
        }
        for migration in accumulated_completed {
            self.inner.migrations.add_completed_migration(migration);
        }

        if let Some((version, table)) = best {
            for (id, partition) in table.iter().enumerate() {
                self.inner.partitions.update_replicas(id, partition.replicas().clone());
            }
            self.inner.partitions.set_version(version + 1);
        } else if self.inner.partitions.is_initialized() {
            self.inner.partitions.increment_version();
        }

        // Invariant 5: a completed migration is retained only while its
        // resulting placement is still reflected in the adopted table.
        let current_table = self.inner.partitions.partitions_copy();
        self.inner.migrations.retain_completed_migrations(|m| {
            current_table.get(m.partition_id).and_then(|p| p.replica(m.replica_index)) == Some(&m.destination)
        });

        self.inner.replicas.reset();
        self.inner.schedule_publish();
        self.inner.should_fetch_partition_tables.store(false, Ordering::SeqCst);
    }

    /// `memberRemoved(member)`: drops the member's in-flight migrations and
    /// replica syncs, fires `partition_lost` for any slot only it held, and
    /// - if this node just became master - runs master-takeover
    /// reconciliation.
    pub async fn on_member_removed(&self, member: Address) {
        self.inner.migrations.on_member_remove(&member);
        self.inner.replicas.cancel_replica_sync_requests_to(&member);

        for partition in self.inner.partitions.partitions_copy() {
            let Some(index) = partition.index_of(&member) else { continue };
            let other_holder = partition.replicas().iter().enumerate().any(|(i, r)| i != index && r.is_some());
            if !other_holder {
                let last_known_owner = partition.replica(index).cloned();
                self.inner.listeners.fire_partition_lost(&PartitionLostEvent {
                    partition_id: partition.id,
                    lost_replica_index: index,
                    last_known_owner,
                });
            }
        }

        let current_master = self.inner.membership.master_address();
        let local = self.inner.local_address();
        let just_became_master = {
            let mut last_master = self.inner.last_master.lock();
            let became = current_master.as_ref() == Some(&local) && last_master.as_ref() != Some(&local);
            *last_master = current_master;
            became
        };

        if just_became_master && self.inner.membership.is_migration_allowed() {
            self.inner.should_fetch_partition_tables.store(true, Ordering::SeqCst);
            self.fetch_most_recent_partition_table().await;
        }
    }

    /// `onClusterStateChange(newState)`: a state that re-enables migration
    /// resumes the migration executor and, on the master, triggers a control
    /// task; a state that disallows it pauses the executor.
    pub fn on_cluster_state_change(&self, allows_migration: bool) {
        if allows_migration {
            self.inner.migrations.resume_migration();
            if self.inner.membership.is_local_master() {
                self.inner.migrations.trigger_control_task();
            }
        } else {
            self.inner.migrations.pause_migration();
        }
    }

    /// `onClusterVersionChange(v)`: at the compatibility watermark, every
    /// replica should have shed the legacy unknown member id by now.
    pub fn on_cluster_version_change(&self, is_compatibility_watermark: bool) {
        if !is_compatibility_watermark {
            return;
        }
        for partition in self.inner.partitions.partitions_copy() {
            for replica in partition.replicas().iter().flatten() {
                if replica.id.is_unknown() {
                    warn!(
                        partition_id = partition.id,
                        address = %replica.address,
                        "replica still carries the legacy unknown member id past the compatibility watermark"
                    );
                }
            }
        }
    }

    /// `scheduleReplicaVersionSync`: walks partitions where this node holds a
    /// non-owner slot and requests a version sync from the owner for any not
    /// already scheduled or in flight.
    pub async fn run_replica_version_sync(&self) {
        let local = self.inner.local_address();
        for partition in self.inner.partitions.partitions_copy() {
            let Some(index) = partition.index_of(&local) else { continue };
            if index == 0 {
                continue;
            }
            let Some(owner) = partition.owner() else { continue };
            let key = (partition.id, index);
            if !self.inner.replicas.schedule_replica_version_sync(partition.id, index, owner.address.clone()) {
                continue;
            }
            let Some(target) = self.inner.replicas.mark_ongoing(key) else { continue };
            let ok = self.inner.request_replica_sync(target).await;
            self.inner.replicas.complete(key);
            if !ok {
                warn!(partition_id = partition.id, replica_index = index, "replica version sync request failed");
            }
        }
    }

    /// `setInitialState`: seeds the table from an external source (e.g. a
    /// rejoin import) instead of computing it via `firstArrangement`. Fails
    /// with `AlreadyInitialized` if the table has already been set.
    pub fn set_initial_state(&self, table: PartitionTable) -> Result<()> {
        if self.inner.partitions.set_initial_state(table) {
            Ok(())
        } else {
            Err(PartitionError::AlreadyInitialized)
        }
    }

    /// Inbound RPC dispatch: answers a `PartitionOp` routed to this node by a
    /// peer, the receive-side counterpart to `PartitionServiceTransport::send`.
    pub async fn handle_op(&self, op: PartitionOp, sender: Address) -> PartitionOpResponse {
        match op {
            PartitionOp::AssignPartitions(_) => {
                let _ = self.trigger_master_to_assign_partitions();
                PartitionOpResponse::Ack
            }
            PartitionOp::PartitionState(state) => {
                let _ = self.process_partition_runtime_state(state, sender);
                PartitionOpResponse::Ack
            }
            PartitionOp::PartitionStateVersionCheck(check) => {
                PartitionOpResponse::VersionMatches(check.version == self.inner.partitions.version())
            }
            PartitionOp::FetchPartitionState(_) => PartitionOpResponse::State {
                version: self.inner.partitions.version(),
                table: self.inner.partitions.partitions_copy(),
                completed_migrations: self.inner.migrations.completed_migrations_copy(),
                active_migration: self.inner.migrations.active_migration(),
            },
            PartitionOp::ShutdownRequest(req) => {
                self.inner.migrations.on_shutdown_request(req.member);
                self.inner.migrations.trigger_control_task();
                PartitionOpResponse::Ack
            }
            PartitionOp::TriggerMemberListPublish(_) => {
                // Republishing the member list is the membership subsystem's
                // job, out of scope here; ack so the caller doesn't retry.
                PartitionOpResponse::Ack
            }
            PartitionOp::MigrationRequest(_) => {
                // Executing the payload transfer is a non-goal (spec.md §1);
                // this node only ever plays master, so an inbound migration
                // request always succeeds immediately.
                PartitionOpResponse::MigrationResult(true)
            }
        }
    }

    /// Graceful shutdown (`onShutdown(timeout)`): lite members and nodes not
    /// actively joined return true immediately. Otherwise announces
    /// departure to the master, blocking further assignment onto this node,
    /// and waits in steps of at most one second (bounded by `timeout`) for
    /// the master's acknowledgment before stopping the local migration
    /// executor. A second call is a no-op that reports success immediately,
    /// since the first call already completed the handshake.
    pub async fn on_shutdown(&self, timeout: Duration) -> bool {
        let local_member = self.inner.membership.local_member();
        if local_member.lite || !self.inner.membership.is_node_active() {
            return true;
        }

        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return true;
        }

        self.inner.migrations.on_shutdown_request(local_member.address.clone());
        self.inner.migrations.trigger_control_task();

        let released = match self.inner.membership.master_address() {
            Some(master) if master == local_member.address => true,
            Some(master) => self.inner.await_shutdown_ack(&master, local_member.address, timeout).await,
            None => true,
        };

        self.inner.migrations.stop();
        released
    }

    pub fn get_partition_id<K: PartitionHashed>(&self, key: &K) -> usize {
        partition_id_for(key, self.inner.partitions.partition_count())
    }

    /// If uninitialized, triggers first arrangement on the master path or
    /// sends `AssignPartitions` to the master on the non-master path, then
    /// returns the current (possibly absent) owner. Never blocks.
    pub fn get_partition_owner(&self, partition_id: usize) -> Option<Address> {
        if !self.inner.partitions.is_initialized() {
            if self.inner.membership.is_local_master() {
                if self.inner.first_arrangement().unwrap_or(false) {
                    self.inner.schedule_publish();
                }
            } else if let Some(master) = self.inner.membership.master_address() {
                self.inner.request_assignment_from_master(master);
            }
        }
        self.inner.partitions.partition(partition_id).owner().map(|r| r.address.clone())
    }

    /// Polls in `owner_wait_poll_interval` increments until `partition_id`
    /// has an owner or `timeout` elapses.
    pub async fn get_partition_owner_or_wait(&self, partition_id: usize, timeout: Duration) -> Result<Address> {
        if !self.inner.membership.is_node_active() {
            return Err(PartitionError::NotActive);
        }
        if !self.inner.membership.is_migration_allowed() {
            return Err(PartitionError::MigrationDisallowed);
        }
        if self.inner.membership.data_members().is_empty() {
            return Err(PartitionError::NoDataMember);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(owner) = self.get_partition_owner(partition_id) {
                return Ok(owner);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PartitionError::Interrupted);
            }
            tokio::time::sleep(self.inner.config.owner_wait_poll_interval).await;
        }
    }

    pub fn get_partition(&self, partition_id: usize) -> Partition {
        self.inner.partitions.partition(partition_id)
    }

    pub fn get_partitions(&self) -> PartitionTable {
        self.inner.partitions.partitions_copy()
    }

    pub fn get_member_partitions(&self, address: &Address) -> Vec<usize> {
        self.inner
            .partitions
            .partitions_copy()
            .iter()
            .filter(|p| p.owner().map(|r| &r.address) == Some(address))
            .map(|p| p.id)
            .collect()
    }

    pub fn get_member_partitions_map(&self) -> HashMap<Address, Vec<usize>> {
        let mut map: HashMap<Address, Vec<usize>> = HashMap::new();
        for partition in self.inner.partitions.partitions_copy() {
            if let Some(owner) = partition.owner() {
                map.entry(owner.address.clone()).or_default().push(partition.id);
            }
        }
        map
    }

    pub fn add_migration_listener(&self, listener: Arc<dyn MigrationListener>) -> ListenerId {
        self.inner.listeners.add_migration_listener(listener)
    }

    pub fn remove_migration_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove_migration_listener(id)
    }

    pub fn add_partition_lost_listener(&self, listener: Arc<dyn PartitionLostListener>) -> ListenerId {
        self.inner.listeners.add_partition_lost_listener(listener)
    }

    pub fn remove_partition_lost_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove_partition_lost_listener(id)
    }

    pub fn add_local_partition_lost_listener(&self, listener: Arc<dyn PartitionLostListener>) -> ListenerId {
        self.inner.listeners.add_local_partition_lost_listener(listener)
    }

    pub fn remove_local_partition_lost_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove_local_partition_lost_listener(id)
    }

    pub fn is_member_state_safe(&self) -> SafetyStatus {
        let table = self.inner.partitions.partitions_copy();
        let group_size = self.inner.partitions.member_group_size();
        let pending = self.inner.replicas.scheduled_sync_count() + self.inner.replicas.ongoing_sync_count();
        let local_migration = self.inner.local_migration_active.load(Ordering::SeqCst);
        let master_migration = self.inner.migrations.has_ongoing_migration() && !local_migration;
        safety::evaluate(&table, self.inner.partitions.is_initialized(), group_size, pending, local_migration, master_migration)
    }

    pub fn has_ongoing_migration(&self) -> bool {
        self.inner.migrations.has_ongoing_migration()
    }

    pub fn has_ongoing_migration_local(&self) -> bool {
        self.inner.local_migration_active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::assignment::RackAwareStrategy;
    use crate::clustering::membership::{MemberId, StaticMembershipView};
    use crate::clustering::rpc::LoopbackTransport;

    fn member(port: u16) -> Member {
        Member::new(MemberId::new(), Address::new("127.0.0.1", port))
    }

    fn coordinator(master: Member, members: Vec<Member>) -> PartitionServiceCoordinator {
        let membership = Arc::new(StaticMembershipView::new(master.clone(), Some(master.address.clone()), members));
        PartitionServiceCoordinator::new(
            PartitionServiceConfig::new(7),
            membership,
            Arc::new(RackAwareStrategy::default()),
            Arc::new(LoopbackTransport::new()),
        )
    }

    #[tokio::test]
    async fn first_arrangement_assigns_every_partition_owner() {
        let master = member(5701);
        let members = vec![master.clone(), member(5702), member(5703)];
        let coord = coordinator(master, members);

        coord.trigger_master_to_assign_partitions().unwrap();

        for id in 0..7 {
            assert!(coord.get_partition_owner(id).is_some());
        }
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_error() {
        let master = member(5701);
        let coord = coordinator(master.clone(), vec![master.clone()]);
        coord.trigger_master_to_assign_partitions().unwrap();

        let table = coord.get_partitions();
        let accepted = coord
            .process_partition_runtime_state(PartitionStateOperation { version: 0, table, ..Default::default() }, master.address)
            .unwrap();

        assert!(!accepted);
    }

    #[tokio::test]
    async fn equal_version_republish_is_a_no_op() {
        let master = member(5701);
        let coord = coordinator(master.clone(), vec![master.clone()]);
        coord.trigger_master_to_assign_partitions().unwrap();

        let table = coord.get_partitions();
        let accepted = coord
            .process_partition_runtime_state(PartitionStateOperation { version: 1, table, ..Default::default() }, master.address)
            .unwrap();

        assert!(!accepted);
    }

    #[tokio::test]
    async fn unfamiliar_replica_owner_triggers_member_list_publish() {
        let master = member(5701);
        let coord = coordinator(master.clone(), vec![master.clone()]);

        let mut table = coord.get_partitions();
        let mut slots: [Option<crate::clustering::partition::PartitionReplica>; crate::clustering::partition::MAX_REPLICA_COUNT] =
            Default::default();
        slots[0] = Some(crate::clustering::partition::PartitionReplica::new(Address::new("127.0.0.1", 5799), MemberId::new()));
        coord.inner.partitions.update_replicas(0, slots);
        table[0] = coord.get_partition(0);

        let accepted = coord
            .process_partition_runtime_state(PartitionStateOperation { version: 99, table, ..Default::default() }, master.address)
            .unwrap();

        assert!(accepted);
    }

    #[tokio::test]
    async fn on_shutdown_is_idempotent() {
        let master = member(5701);
        let coord = coordinator(master.clone(), vec![master]);
        assert!(coord.on_shutdown(Duration::from_millis(50)).await);
        assert!(coord.on_shutdown(Duration::from_millis(50)).await);
        assert!(!coord.inner.active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fresh_coordinator_is_safe_with_replicas_missing_before_first_arrangement() {
        let master = member(5701);
        let coord = coordinator(master.clone(), vec![master]);
        assert_eq!(coord.is_member_state_safe(), SafetyStatus::SafeWithReplicasMissing);
    }
}
