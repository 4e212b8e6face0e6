use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use lockwell_core::{LockError, LockResult, StoreErrorKind};
use lockwell_domain::{LockOptions, OwnerToken, OwnershipScript, POLL_INTERVAL};

use crate::lock_ports::{LockStore, SetOutcome};

use super::DistributedLock;
use super::watchdog::Watchdog;

struct StoredValue {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct FakeLockStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    set_failures: Mutex<VecDeque<LockError>>,
    script_failures: Mutex<VecDeque<LockError>>,
    set_calls: Mutex<u32>,
    extend_calls: Mutex<u32>,
    extend_successes: Mutex<u32>,
}

impl FakeLockStore {
    async fn fail_next_sets(&self, errors: Vec<LockError>) {
        self.set_failures.lock().await.extend(errors);
    }

    async fn fail_next_scripts(&self, errors: Vec<LockError>) {
        self.script_failures.lock().await.extend(errors);
    }

    async fn overwrite(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.lock().await.insert(
            key.to_owned(),
            StoredValue {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn value_of(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    async fn set_calls(&self) -> u32 {
        *self.set_calls.lock().await
    }

    async fn extend_calls(&self) -> u32 {
        *self.extend_calls.lock().await
    }

    async fn extend_successes(&self) -> u32 {
        *self.extend_successes.lock().await
    }
}

#[async_trait]
impl LockStore for FakeLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        _cancel: &CancellationToken,
    ) -> LockResult<SetOutcome> {
        *self.set_calls.lock().await += 1;

        if let Some(error) = self.set_failures.lock().await.pop_front() {
            return Err(error);
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|entry| entry.expires_at > now) {
            return Ok(SetOutcome::Conflict);
        }

        entries.insert(
            key.to_owned(),
            StoredValue {
                value: value.to_owned(),
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(SetOutcome::Acquired)
    }

    async fn evaluate_script(
        &self,
        script: &OwnershipScript,
        _cancel: &CancellationToken,
    ) -> LockResult<i64> {
        let is_extend = matches!(script, OwnershipScript::CheckAndExtend { .. });
        if is_extend {
            *self.extend_calls.lock().await += 1;
        }

        if let Some(error) = self.script_failures.lock().await.pop_front() {
            return Err(error);
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let owned = entries
            .get(script.key())
            .is_some_and(|entry| entry.expires_at > now && entry.value == script.token());
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
                if let Some(entry) = entries.get_mut(key) {
                    entry.expires_at = now + Duration::from_secs(*ttl_seconds);
                }
                *self.extend_successes.lock().await += 1;
            }
        }

        Ok(1)
    }
}

fn build_lock(store: &Arc<FakeLockStore>, name: &str, options: LockOptions) -> DistributedLock {
    DistributedLock::new(store.clone(), name, options).unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn new_rejects_empty_lock_name() {
    let store = Arc::new(FakeLockStore::default());
    let result = DistributedLock::new(store, "", LockOptions::new());
    assert!(matches!(result, Err(LockError::InvalidArgument(_))));
}

#[tokio::test(start_paused = true)]
async fn second_owner_conflicts_until_first_releases() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock_a = build_lock(&store, "k", LockOptions::new().with_lease_seconds(5));
    let lock_b = build_lock(&store, "k", LockOptions::new().with_lease_seconds(8));

    assert!(lock_a.lock(&cancel).await.is_ok());

    let contended = lock_b.lock(&cancel).await;
    assert!(matches!(contended, Err(LockError::Conflict(_))));

    assert!(lock_a.unlock(&cancel).await.is_ok());
    assert!(lock_b.lock(&cancel).await.is_ok());
    assert_eq!(
        store.value_of("REDIS_LOCK_PREFIX_k").await.as_deref(),
        Some(lock_b.owner_token().as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn non_blocking_lock_makes_exactly_one_round_trip() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(30));
    let contender = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(30));

    assert!(holder.lock(&cancel).await.is_ok());
    let result = contender.lock(&cancel).await;

    assert!(matches!(result, Err(LockError::Conflict(_))));
    assert_eq!(store.set_calls().await, 2);
}

#[tokio::test(start_paused = true)]
async fn non_blocking_lock_surfaces_retryable_error_as_is() {
    let store = Arc::new(FakeLockStore::default());
    store
        .fail_next_sets(vec![LockError::store(
            StoreErrorKind::NilReply,
            "nil returned",
        )])
        .await;
    let lock = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(30));

    let result = lock.lock(&CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(LockError::Store {
            kind: StoreErrorKind::NilReply,
            ..
        })
    ));
    assert_eq!(store.set_calls().await, 1);
}

#[tokio::test(start_paused = true)]
async fn unlock_without_ownership_keeps_other_owner_entry() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(30));
    let stranger = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(30));

    assert!(holder.lock(&cancel).await.is_ok());
    let result = stranger.unlock(&cancel).await;

    assert!(matches!(result, Err(LockError::Ownership(_))));
    assert_eq!(
        store.value_of("REDIS_LOCK_PREFIX_orders").await.as_deref(),
        Some(holder.owner_token().as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn unlock_after_lease_expiry_reports_ownership_error() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(1));

    assert!(lock.lock(&cancel).await.is_ok());
    sleep(Duration::from_millis(1_100)).await;

    let result = lock.unlock(&cancel).await;
    assert!(matches!(result, Err(LockError::Ownership(_))));
}

#[tokio::test(start_paused = true)]
async fn blocking_lock_times_out_after_max_wait() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(60));
    let waiter = build_lock(
        &store,
        "orders",
        LockOptions::new()
            .with_lease_seconds(60)
            .with_blocking()
            .with_max_wait_seconds(1),
    );

    assert!(holder.lock(&cancel).await.is_ok());

    let started = Instant::now();
    let result = waiter.lock(&cancel).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(LockError::Timeout { .. })));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed <= Duration::from_secs(1) + POLL_INTERVAL * 2);
}

#[tokio::test(start_paused = true)]
async fn blocking_lock_defaults_to_five_second_wait() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(60));
    let waiter = build_lock(
        &store,
        "orders",
        LockOptions::new().with_lease_seconds(60).with_blocking(),
    );

    assert!(holder.lock(&cancel).await.is_ok());

    let started = Instant::now();
    let result = waiter.lock(&cancel).await;

    assert!(matches!(result, Err(LockError::Timeout { .. })));
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn blocking_lock_acquires_after_holder_lease_expires() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(1));
    let waiter = build_lock(
        &store,
        "orders",
        LockOptions::new()
            .with_lease_seconds(10)
            .with_blocking()
            .with_max_wait_seconds(3),
    );

    assert!(holder.lock(&cancel).await.is_ok());

    let started = Instant::now();
    assert!(waiter.lock(&cancel).await.is_ok());
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn blocking_lock_acquires_after_holder_releases() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = Arc::new(build_lock(
        &store,
        "orders",
        LockOptions::new().with_lease_seconds(30),
    ));
    let waiter = build_lock(
        &store,
        "orders",
        LockOptions::new()
            .with_lease_seconds(30)
            .with_blocking()
            .with_max_wait_seconds(5),
    );

    assert!(holder.lock(&cancel).await.is_ok());

    let releaser = {
        let holder = Arc::clone(&holder);
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            holder.unlock(&CancellationToken::new()).await
        })
    };

    let started = Instant::now();
    assert!(waiter.lock(&cancel).await.is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));

    let released = releaser.await;
    assert!(matches!(released, Ok(Ok(()))));
}

#[tokio::test(start_paused = true)]
async fn blocking_lock_retries_nil_reply() {
    let store = Arc::new(FakeLockStore::default());
    store
        .fail_next_sets(vec![
            LockError::store(StoreErrorKind::NilReply, "nil returned"),
            LockError::store(StoreErrorKind::NilReply, "nil returned"),
        ])
        .await;
    let lock = build_lock(
        &store,
        "orders",
        LockOptions::new().with_lease_seconds(30).with_blocking(),
    );

    assert!(lock.lock(&CancellationToken::new()).await.is_ok());
    assert_eq!(store.set_calls().await, 3);
}

#[tokio::test(start_paused = true)]
async fn blocking_lock_stops_on_terminal_store_error() {
    let store = Arc::new(FakeLockStore::default());
    store
        .fail_next_sets(vec![
            LockError::store(StoreErrorKind::NilReply, "nil returned"),
            LockError::store(StoreErrorKind::Connection, "connection refused"),
        ])
        .await;
    let lock = build_lock(
        &store,
        "orders",
        LockOptions::new().with_lease_seconds(30).with_blocking(),
    );

    let result = lock.lock(&CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(LockError::Store {
            kind: StoreErrorKind::Connection,
            ..
        })
    ));
    assert_eq!(store.set_calls().await, 2);
}

#[tokio::test(start_paused = true)]
async fn terminal_first_attempt_never_enters_polling() {
    let store = Arc::new(FakeLockStore::default());
    store
        .fail_next_sets(vec![LockError::store(
            StoreErrorKind::Response,
            "WRONGTYPE",
        )])
        .await;
    let lock = build_lock(
        &store,
        "orders",
        LockOptions::new().with_lease_seconds(30).with_blocking(),
    );

    let result = lock.lock(&CancellationToken::new()).await;

    assert!(result.is_err());
    assert_eq!(store.set_calls().await, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_blocking_lock_stops_at_next_tick() {
    let store = Arc::new(FakeLockStore::default());
    let holder = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(60));
    let waiter = build_lock(
        &store,
        "orders",
        LockOptions::new()
            .with_lease_seconds(60)
            .with_blocking()
            .with_max_wait_seconds(5),
    );
    assert!(holder.lock(&CancellationToken::new()).await.is_ok());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(220)).await;
            cancel.cancel();
        });
    }

    let started = Instant::now();
    let result = waiter.lock(&cancel).await;

    assert!(matches!(result, Err(LockError::Cancelled(_))));
    assert!(started.elapsed() <= Duration::from_millis(220) + POLL_INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn renewal_keeps_short_lease_exclusive() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = build_lock(
        &store,
        "orders",
        LockOptions::new().with_lease_seconds(1).with_watchdog(),
    );
    let contender = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(1));

    assert!(holder.lock(&cancel).await.is_ok());
    assert!(holder.is_renewing());

    sleep(Duration::from_secs(3)).await;

    let contended = contender.lock(&cancel).await;
    assert!(matches!(contended, Err(LockError::Conflict(_))));
    assert!(store.extend_successes().await > 0);

    let remaining = store.remaining_ttl("REDIS_LOCK_PREFIX_orders").await;
    assert!(remaining.is_some_and(|ttl| ttl > Duration::from_secs(5)));

    assert!(holder.unlock(&cancel).await.is_ok());
    assert!(contender.lock(&cancel).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn default_options_start_renewal_implicitly() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    assert!(lock.lock(&cancel).await.is_ok());
    assert!(lock.is_renewing());

    assert!(lock.unlock(&cancel).await.is_ok());
    assert!(!lock.is_renewing());
}

#[tokio::test(start_paused = true)]
async fn explicit_lease_without_watchdog_expires() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let holder = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(1));
    let contender = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(1));

    assert!(holder.lock(&cancel).await.is_ok());
    assert!(!holder.is_renewing());

    sleep(Duration::from_millis(1_100)).await;

    assert!(contender.lock(&cancel).await.is_ok());
    assert_eq!(store.extend_calls().await, 0);
}

#[tokio::test(start_paused = true)]
async fn renewal_stops_once_unlock_returns() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    assert!(lock.lock(&cancel).await.is_ok());
    sleep(Duration::from_millis(300)).await;
    assert!(store.extend_calls().await > 0);

    assert!(lock.unlock(&cancel).await.is_ok());
    let calls_at_release = store.extend_calls().await;

    sleep(Duration::from_secs(1)).await;
    assert_eq!(store.extend_calls().await, calls_at_release);
    assert!(!lock.is_renewing());
}

#[tokio::test(start_paused = true)]
async fn renewal_stops_even_when_release_finds_another_owner() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    assert!(lock.lock(&cancel).await.is_ok());
    store
        .overwrite(
            "REDIS_LOCK_PREFIX_orders",
            "intruder",
            Duration::from_secs(60),
        )
        .await;

    let result = lock.unlock(&cancel).await;
    assert!(matches!(result, Err(LockError::Ownership(_))));
    assert!(!lock.is_renewing());

    let calls_at_release = store.extend_calls().await;
    sleep(Duration::from_millis(500)).await;
    assert_eq!(store.extend_calls().await, calls_at_release);
    assert_eq!(
        store.value_of("REDIS_LOCK_PREFIX_orders").await.as_deref(),
        Some("intruder")
    );
}

#[tokio::test(start_paused = true)]
async fn renewal_stops_even_when_release_fails_in_store() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    assert!(lock.lock(&cancel).await.is_ok());
    store
        .fail_next_scripts(vec![LockError::store(
            StoreErrorKind::Connection,
            "broken pipe",
        )])
        .await;

    let result = lock.unlock(&cancel).await;

    assert!(matches!(
        result,
        Err(LockError::Store {
            kind: StoreErrorKind::Connection,
            ..
        })
    ));
    assert!(!lock.is_renewing());
}

#[tokio::test(start_paused = true)]
async fn renewal_survives_transient_store_errors() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(
        &store,
        "orders",
        LockOptions::new().with_lease_seconds(1).with_watchdog(),
    );

    assert!(lock.lock(&cancel).await.is_ok());
    store
        .fail_next_scripts(vec![
            LockError::store(StoreErrorKind::Connection, "timeout"),
            LockError::store(StoreErrorKind::Response, "BUSY"),
            LockError::store(StoreErrorKind::NilReply, "nil returned"),
        ])
        .await;

    sleep(Duration::from_millis(500)).await;

    assert!(lock.is_renewing());
    assert!(store.extend_successes().await > 0);
    assert!(lock.unlock(&cancel).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn renewal_keeps_running_after_ownership_loss() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    assert!(lock.lock(&cancel).await.is_ok());
    store
        .overwrite(
            "REDIS_LOCK_PREFIX_orders",
            "thief",
            Duration::from_secs(60),
        )
        .await;
    let successes = store.extend_successes().await;

    sleep(Duration::from_millis(300)).await;

    assert!(lock.is_renewing());
    assert_eq!(store.extend_successes().await, successes);
}

#[tokio::test(start_paused = true)]
async fn cancelling_caller_scope_stops_renewal() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    assert!(lock.lock(&cancel).await.is_ok());
    assert!(lock.is_renewing());

    cancel.cancel();
    sleep(POLL_INTERVAL * 2).await;

    assert!(!lock.is_renewing());
}

#[tokio::test(start_paused = true)]
async fn watchdog_start_is_a_no_op_while_running() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let token = OwnerToken::new();
    store
        .overwrite("REDIS_LOCK_PREFIX_orders", token.as_str(), Duration::from_secs(60))
        .await;
    let renewal = OwnershipScript::CheckAndExtend {
        key: "REDIS_LOCK_PREFIX_orders".to_owned(),
        token: token.as_str().to_owned(),
        ttl_seconds: 35,
    };

    let watchdog = Watchdog::new();
    watchdog.start(store.clone(), renewal.clone(), &cancel).await;
    watchdog.start(store.clone(), renewal.clone(), &cancel).await;
    assert!(watchdog.is_running());

    sleep(Duration::from_millis(500)).await;
    let calls = store.extend_calls().await;
    assert!(calls >= 9);
    assert!(calls <= 11, "expected a single renewer, saw {calls} extend calls");

    watchdog.stop().await;
    assert!(!watchdog.is_running());

    watchdog.start(store.clone(), renewal, &cancel).await;
    assert!(watchdog.is_running());
    watchdog.stop().await;
}

#[tokio::test(start_paused = true)]
async fn relock_after_unlock_restarts_renewal() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    assert!(lock.lock(&cancel).await.is_ok());
    assert!(lock.unlock(&cancel).await.is_ok());
    assert!(lock.lock(&cancel).await.is_ok());
    assert!(lock.is_renewing());

    assert!(lock.unlock(&cancel).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn with_lock_returns_output_and_releases() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new());

    let output = lock
        .with_lock(&cancel, || async {
            sleep(Duration::from_millis(200)).await;
            42
        })
        .await;

    assert!(matches!(output, Ok(42)));
    assert!(!lock.is_renewing());
    assert!(store.value_of("REDIS_LOCK_PREFIX_orders").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn with_lock_reports_lost_ownership() {
    let store = Arc::new(FakeLockStore::default());
    let cancel = CancellationToken::new();
    let lock = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(1));

    let output = lock
        .with_lock(&cancel, || async {
            sleep(Duration::from_secs(2)).await;
        })
        .await;

    assert!(matches!(output, Err(LockError::Ownership(_))));
}

#[tokio::test(start_paused = true)]
async fn racing_owners_yield_a_single_winner() {
    let store = Arc::new(FakeLockStore::default());
    let mut contenders = JoinSet::new();

    for _ in 0..8 {
        let lock = build_lock(&store, "orders", LockOptions::new().with_lease_seconds(30));
        contenders.spawn(async move { lock.lock(&CancellationToken::new()).await });
    }

    let mut winners = 0;
    let mut conflicts = 0;
    while let Some(joined) = contenders.join_next().await {
        match joined {
            Ok(Ok(())) => winners += 1,
            Ok(Err(LockError::Conflict(_))) => conflicts += 1,
            other => panic!("unexpected contender outcome: {other:?}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
}
