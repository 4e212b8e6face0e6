use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lockwell_core::LockError;
use lockwell_domain::{OwnershipScript, RENEWAL_INTERVAL};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::lock_ports::LockStore;

/// Owner of the single lease renewal task of one lock instance.
pub(super) struct Watchdog {
    running: Arc<AtomicBool>,
    task: Mutex<Option<RenewalTask>>,
}

struct RenewalTask {
    key: String,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Clears the running flag when the renewal future is dropped.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Watchdog {
    pub(super) fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts renewing unless a live task already does.
    ///
    /// A previous task that was cancelled or has finished is joined before
    /// the new one is spawned, so two renewers never overlap.
    pub(super) async fn start(
        &self,
        store: Arc<dyn LockStore>,
        renewal: OwnershipScript,
        parent: &CancellationToken,
    ) {
        let mut slot = self.task.lock().await;

        if let Some(active) = slot.as_ref()
            && !active.stop.is_cancelled()
            && !active.handle.is_finished()
        {
            debug!(key = renewal.key(), "lease renewal already running");
            return;
        }

        if let Some(previous) = slot.take() {
            previous.stop.cancel();
            join_renewal(previous.handle, renewal.key()).await;
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                key = renewal.key(),
                "lease renewal flag still set after previous task exited"
            );
            return;
        }

        let key = renewal.key().to_owned();
        let stop = parent.child_token();
        let guard = RunningGuard(Arc::clone(&self.running));
        let task_stop = stop.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run_renewal(store, renewal, task_stop).await;
        });

        *slot = Some(RenewalTask { key, stop, handle });
    }

    /// Cancels the renewal task and waits for it to exit.
    pub(super) async fn stop(&self) {
        let mut slot = self.task.lock().await;
        if let Some(task) = slot.take() {
            task.stop.cancel();
            join_renewal(task.handle, task.key.as_str()).await;
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.stop.cancel();
        }
    }
}

async fn join_renewal(handle: JoinHandle<()>, key: &str) {
    if let Err(error) = handle.await {
        warn!(key, error = %error, "lease renewal task terminated abnormally");
    }
}

async fn run_renewal(
    store: Arc<dyn LockStore>,
    renewal: OwnershipScript,
    stop: CancellationToken,
) {
    let mut ticker = time::interval(RENEWAL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    debug!(key = renewal.key(), "lease renewal started");

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match store.evaluate_script(&renewal, &stop).await {
            Ok(1) => trace!(key = renewal.key(), "lease extended"),
            Ok(reply) => debug!(
                key = renewal.key(),
                reply,
                "lease not extended, ownership of lock lost"
            ),
            Err(LockError::Cancelled(_)) if stop.is_cancelled() => break,
            Err(error) => warn!(key = renewal.key(), error = %error, "lease renewal failed"),
        }
    }

    debug!(key = renewal.key(), "lease renewal stopped");
}
