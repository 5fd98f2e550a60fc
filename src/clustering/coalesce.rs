// Coalescing Delayed Trigger
//
// Generic utility reused by the migration control task and the partition
// table publish task: many calls to `trigger()` in quick succession collapse
// into a single delayed run of the wrapped action, firing no sooner than
// `min_delay` after the first call in the pending window and - best effort -
// no later than `max_delay` after it. Grounded on the teacher's
// `ClusterFailoverManager` debounce-style scheduling (clustering::failover),
// generalized into a standalone reusable primitive instead of being
// hand-rolled once per caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

type ActionFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Collapses bursts of `trigger()` calls into one delayed run of `action`.
///
/// The worst-case bound on `max_delay` is approximate: the check happens
/// only after each `min_delay` sleep, so a run can overshoot `max_delay` by
/// up to `min_delay`. Callers that need a hard deadline should keep
/// `min_delay` small relative to `max_delay`.
pub struct CoalescingDelayedTrigger {
    action: Box<dyn Fn() -> ActionFuture + Send + Sync>,
    min_delay: Duration,
    max_delay: Duration,
    scheduled: AtomicBool,
    dirty: AtomicBool,
    window_start: Mutex<Option<Instant>>,
}

impl CoalescingDelayedTrigger {
    pub fn new<F>(min_delay: Duration, max_delay: Duration, action: F) -> Arc<Self>
    where
        F: Fn() -> ActionFuture + Send + Sync + 'static,
    {
        Arc::new(Self {
            action: Box::new(action),
            min_delay,
            max_delay: max_delay.max(min_delay),
            scheduled: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            window_start: Mutex::new(None),
        })
    }

    /// Records a call. If no run is currently pending, spawns one; otherwise
    /// marks the pending run dirty so it re-checks before firing.
    pub fn trigger(self: &Arc<Self>) {
        {
            let mut start = self.window_start.lock();
            if start.is_none() {
                *start = Some(Instant::now());
            }
        }
        self.dirty.store(true, Ordering::SeqCst);

        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move { this.run().await });
    }

    async fn run(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.min_delay).await;

            let elapsed = self.window_start.lock().map(|s| s.elapsed()).unwrap_or(Duration::ZERO);
            let more_calls_arrived = self.dirty.swap(false, Ordering::SeqCst);

            if more_calls_arrived && elapsed < self.max_delay {
                continue;
            }
            break;
        }

        *self.window_start.lock() = None;
        self.scheduled.store(false, Ordering::SeqCst);
        (self.action)().await;
    }

    pub fn is_pending(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }
}
