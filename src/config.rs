use std::time::Duration;

/// Tunables for the partition service.
///
/// `partition_count` is fixed for the lifetime of a `PartitionServiceConfig`
/// and, per spec, cannot change once the service has started - there is no
/// setter for it on purpose.
#[derive(Debug, Clone)]
pub struct PartitionServiceConfig {
    partition_count: usize,
    pub partition_migration_timeout: Duration,
    pub partition_table_send_interval: Duration,
    pub fetch_partition_state_timeout: Duration,
    pub sync_partition_state_timeout: Duration,
    pub lock_acquire_timeout: Duration,
    pub owner_wait_poll_interval: Duration,
    pub master_trigger_coalesce_window: Duration,
}

impl PartitionServiceConfig {
    pub fn new(partition_count: usize) -> Self {
        Self {
            partition_count,
            ..Self::default()
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// `partition_table_send_interval` is coerced to at least one second,
    /// matching the source system's "never allow a zero-length publish
    /// loop" guard.
    pub fn with_partition_table_send_interval(mut self, interval: Duration) -> Self {
        self.partition_table_send_interval = interval.max(Duration::from_secs(1));
        self
    }
}

impl Default for PartitionServiceConfig {
    fn default() -> Self {
        Self {
            partition_count: 271,
            partition_migration_timeout: Duration::from_secs(10),
            partition_table_send_interval: Duration::from_secs(15),
            fetch_partition_state_timeout: Duration::from_secs(5),
            sync_partition_state_timeout: Duration::from_secs(10),
            lock_acquire_timeout: Duration::from_secs(10),
            owner_wait_poll_interval: Duration::from_millis(10),
            master_trigger_coalesce_window: Duration::from_secs(3),
        }
    }
}
