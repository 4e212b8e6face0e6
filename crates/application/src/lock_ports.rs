use async_trait::async_trait;
use lockwell_core::LockResult;
use lockwell_domain::OwnershipScript;
use tokio_util::sync::CancellationToken;

/// Outcome of a conditional set-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The key was absent and now holds the value.
    Acquired,
    /// The key already held a value; nothing was written.
    Conflict,
}

/// Store primitives required by the lock protocol.
///
/// Each call must be atomic as observed by every concurrent caller.
/// Implementations honor `cancel` while acquiring a connection and report
/// it as `LockError::Cancelled`; a round trip already in flight may finish.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Sets `key` to `value` with a TTL, only when `key` does not exist.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        cancel: &CancellationToken,
    ) -> LockResult<SetOutcome>;

    /// Evaluates one ownership script server-side and returns its integer reply.
    async fn evaluate_script(
        &self,
        script: &OwnershipScript,
        cancel: &CancellationToken,
    ) -> LockResult<i64>;
}
