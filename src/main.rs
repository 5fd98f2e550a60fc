// partitiond
//
// Demo entry point. Boots a single-process partition service coordinator
// against an in-memory `StaticMembershipView` and `LoopbackTransport`, runs
// the first arrangement, and prints the resulting table - there is no real
// cluster to join here, see SPEC_FULL.md for what a production deployment
// would wire in instead.

use std::sync::Arc;
use std::time::Duration;

use partition_service::clustering::assignment::RackAwareStrategy;
use partition_service::clustering::membership::{Address, Member, MemberId, StaticMembershipView};
use partition_service::clustering::rpc::LoopbackTransport;
use partition_service::clustering::service::PartitionServiceCoordinator;
use partition_service::{PartitionServiceConfig, VERSION};
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    let local = Member::new(MemberId::new(), Address::new("127.0.0.1", 5701));
    let peers = vec![
        local.clone(),
        Member::new(MemberId::new(), Address::new("127.0.0.1", 5702)),
        Member::new(MemberId::new(), Address::new("127.0.0.1", 5703)),
    ];
    let membership = Arc::new(StaticMembershipView::new(local.clone(), Some(local.address.clone()), peers));

    let coordinator = PartitionServiceCoordinator::new(
        PartitionServiceConfig::default(),
        membership,
        Arc::new(RackAwareStrategy::default()),
        Arc::new(LoopbackTransport::new()),
    );

    info!("running first arrangement as master {}", local.address);
    if let Err(err) = coordinator.trigger_master_to_assign_partitions() {
        info!("first arrangement failed: {err}");
        return;
    }

    let owned_here = coordinator.get_member_partitions(&local.address).len();
    info!(
        "partition table initialized: {} partitions, {} owned by {}",
        coordinator.get_partitions().len(),
        owned_here,
        local.address
    );

    coordinator.on_shutdown(Duration::from_secs(5)).await;
    info!("shutdown complete");
}

fn print_banner() {
    println!("╔══════════════════════════════════════════════╗");
    println!("║  partition-service v{:<26}║", VERSION);
    println!("╚══════════════════════════════════════════════╝");
    println!();
}
