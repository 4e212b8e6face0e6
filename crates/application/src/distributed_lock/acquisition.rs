use lockwell_core::{LockError, LockResult};
use lockwell_domain::POLL_INTERVAL;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::lock_ports::SetOutcome;

use super::DistributedLock;

impl DistributedLock {
    /// Issues one conditional write of the owner token with the lease TTL.
    pub(super) async fn try_acquire(&self, cancel: &CancellationToken) -> LockResult<()> {
        let key = self.key.as_str();
        let token = self.token.as_str();
        let ttl_seconds = self.configuration.lease_seconds();
        validate_acquire_arguments(key, token, ttl_seconds)?;

        match self
            .store
            .set_if_absent(key, token, ttl_seconds, cancel)
            .await?
        {
            SetOutcome::Acquired => Ok(()),
            SetOutcome::Conflict => Err(LockError::Conflict(format!(
                "lock '{}' is held by another owner",
                self.key.name()
            ))),
        }
    }

    /// Polls `try_acquire` until success, a terminal error, the
    /// maximum wait, or cancellation.
    ///
    /// Cancellation is observed at tick boundaries only.
    pub(super) async fn acquire_blocking(
        &self,
        started: Instant,
        cancel: &CancellationToken,
    ) -> LockResult<()> {
        let max_wait = self.configuration.max_wait();
        let mut ticker = time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut attempts = 1_u32;
        loop {
            ticker.tick().await;

            let waited = started.elapsed();
            if waited > max_wait {
                return Err(LockError::Timeout {
                    key: self.key.as_str().to_owned(),
                    waited,
                });
            }

            if cancel.is_cancelled() {
                return Err(LockError::Cancelled(format!(
                    "stopped waiting for lock '{}' after {attempts} attempts",
                    self.key.name()
                )));
            }

            attempts = attempts.saturating_add(1);
            match self.try_acquire(cancel).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_retryable() => {
                    trace!(key = %self.key, attempts, error = %error, "lock busy, polling");
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn validate_acquire_arguments(key: &str, token: &str, ttl_seconds: u64) -> LockResult<()> {
    if key.is_empty() {
        return Err(LockError::InvalidArgument(
            "lock key must not be empty".to_owned(),
        ));
    }

    if token.is_empty() {
        return Err(LockError::InvalidArgument(
            "lock owner token must not be empty".to_owned(),
        ));
    }

    if ttl_seconds == 0 {
        return Err(LockError::InvalidArgument(
            "lock lease_seconds must be greater than zero".to_owned(),
        ));
    }

    Ok(())
}
