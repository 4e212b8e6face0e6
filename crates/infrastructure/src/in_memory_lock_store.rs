use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lockwell_application::{LockStore, SetOutcome};
use lockwell_core::{LockError, LockResult};
use lockwell_domain::OwnershipScript;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local lock store with TTL expiry.
///
/// Suitable for tests and single-process deployments. Time follows the
/// tokio clock, so paused-clock tests observe expiry deterministically.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    entries: RwLock<HashMap<String, LockEntry>>,
    extensions: AtomicU64,
}

impl InMemoryLockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live value of `key`, if any.
    pub async fn value_of(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.token.clone())
    }

    /// Returns the remaining TTL of `key`, if it is live.
    pub async fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at.duration_since(now))
    }

    /// Returns how many check-and-extend calls applied a new TTL.
    #[must_use]
    pub fn extension_count(&self) -> u64 {
        self.extensions.load(Ordering::Relaxed)
    }
}

fn expiry_after(now: Instant, ttl_seconds: u64) -> LockResult<Instant> {
    now.checked_add(Duration::from_secs(ttl_seconds))
        .ok_or_else(|| {
            LockError::InvalidArgument(format!(
                "ttl_seconds {ttl_seconds} is beyond the representable expiry"
            ))
        })
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> LockResult<()> {
    if cancel.is_cancelled() {
        return Err(LockError::Cancelled(
            "cancelled before reaching the in-memory store".to_owned(),
        ));
    }

    Ok(())
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        cancel: &CancellationToken,
    ) -> LockResult<SetOutcome> {
        if key.is_empty() || value.is_empty() {
            return Err(LockError::InvalidArgument(
                "key and value must not be empty".to_owned(),
            ));
        }

        if ttl_seconds == 0 {
            return Err(LockError::InvalidArgument(
                "ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        ensure_not_cancelled(cancel)?;

        let now = Instant::now();
        let expires_at = expiry_after(now, ttl_seconds)?;
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(SetOutcome::Conflict);
        }

        entries.insert(
            key.to_owned(),
            LockEntry {
                token: value.to_owned(),
                expires_at,
            },
        );

        Ok(SetOutcome::Acquired)
    }

    async fn evaluate_script(
        &self,
        script: &OwnershipScript,
        cancel: &CancellationToken,
    ) -> LockResult<i64> {
        ensure_not_cancelled(cancel)?;

        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let live_token_matches = entries
            .get(script.key())
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.token == script.token());
        let owned = match live_token_matches {
            Some(matches) => matches,
            None => {
                entries.remove(script.key());
                false
            }
        };
        if !owned {
            return Ok(0);
        }

        match script {
            OwnershipScript::CheckAndDelete { key, .. } => {
                entries.remove(key);
            }
            OwnershipScript::CheckAndExtend {
                key, ttl_seconds, ..
            } => {
                let expires_at = expiry_after(now, *ttl_seconds)?;
                if let Some(entry) = entries.get_mut(key) {
                    entry.expires_at = expires_at;
                }
                self.extensions.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(1)
    }
}
