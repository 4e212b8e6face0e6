use std::future::Future;
use std::sync::Arc;

use lockwell_core::{LockError, LockResult};
use lockwell_domain::{LockConfiguration, LockKey, LockOptions, OwnerToken, OwnershipScript};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lock_ports::LockStore;

mod acquisition;
mod watchdog;

use watchdog::Watchdog;

/// Mutual-exclusion lock shared through a remote key-value store.
///
/// Each instance carries its own owner token. Whether the lock is held is
/// decided by the store alone; the instance only tracks its renewal task.
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    key: LockKey,
    token: OwnerToken,
    configuration: LockConfiguration,
    watchdog: Watchdog,
}

impl DistributedLock {
    /// Creates a lock for the logical `name` with a fresh owner token.
    pub fn new(
        store: Arc<dyn LockStore>,
        name: impl Into<String>,
        options: LockOptions,
    ) -> LockResult<Self> {
        Ok(Self {
            store,
            key: LockKey::new(name)?,
            token: OwnerToken::new(),
            configuration: options.resolve(),
            watchdog: Watchdog::new(),
        })
    }

    /// Replaces the generated owner token.
    #[must_use]
    pub fn with_owner_token(mut self, token: OwnerToken) -> Self {
        self.token = token;
        self
    }

    /// Returns the namespaced store key.
    #[must_use]
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Returns the owner token written on acquisition.
    #[must_use]
    pub fn owner_token(&self) -> &OwnerToken {
        &self.token
    }

    /// Returns the configuration after defaulting.
    #[must_use]
    pub fn configuration(&self) -> LockConfiguration {
        self.configuration
    }

    /// Returns whether a lease renewal task is currently active.
    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.watchdog.is_running()
    }

    /// Acquires the lock.
    ///
    /// Non-blocking mode performs exactly one store round trip. Blocking mode
    /// polls while the failure is retryable, until the maximum wait elapses
    /// or `cancel` fires. On success the renewal task starts when enabled,
    /// scoped to a child of `cancel`.
    pub async fn lock(&self, cancel: &CancellationToken) -> LockResult<()> {
        let started = Instant::now();

        match self.try_acquire(cancel).await {
            Ok(()) => {}
            Err(error) if self.configuration.is_blocking() && error.is_retryable() => {
                self.acquire_blocking(started, cancel).await?;
            }
            Err(error) => return Err(error),
        }

        debug!(
            key = %self.key,
            lease_seconds = self.configuration.lease_seconds(),
            waited_ms = started.elapsed().as_millis(),
            "lock acquired"
        );

        if self.configuration.watchdog_enabled() {
            let renewal = OwnershipScript::check_and_extend(
                &self.key,
                &self.token,
                self.configuration.renewal_ttl_seconds(),
            );
            self.watchdog
                .start(Arc::clone(&self.store), renewal, cancel)
                .await;
        }

        Ok(())
    }

    /// Releases the lock when this instance still owns it.
    ///
    /// The renewal task is stopped whatever the store answers, and this call
    /// returns only after the task has exited.
    pub async fn unlock(&self, cancel: &CancellationToken) -> LockResult<()> {
        let release = OwnershipScript::check_and_delete(&self.key, &self.token);
        let released = self.store.evaluate_script(&release, cancel).await;

        self.watchdog.stop().await;

        let deleted = released?;
        if deleted != 1 {
            return Err(LockError::Ownership(format!(
                "cannot unlock '{}' without ownership of the lock",
                self.key.name()
            )));
        }

        debug!(key = %self.key, "lock released");
        Ok(())
    }

    /// Runs `work` while holding the lock.
    ///
    /// The release is attempted even if `cancel` fired during `work`. An
    /// ownership or store error from the release is returned in place of the
    /// work's output.
    pub async fn with_lock<F, Fut, T>(&self, cancel: &CancellationToken, work: F) -> LockResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.lock(cancel).await?;
        let output = work().await;

        if let Err(error) = self.unlock(&CancellationToken::new()).await {
            warn!(key = %self.key, error = %error, "failed to release lock after work");
            return Err(error);
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests;
