//! Lockwell contention worker.
//!
//! Spawns several contenders that race for one lock and hold it in turn.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use lockwell_application::{DistributedLock, LockStore};
use lockwell_core::{LockError, LockResult};
use lockwell_domain::LockOptions;
use lockwell_infrastructure::{InMemoryLockStore, RedisLockStore, RedisStoreConfig};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
enum StoreBackendConfig {
    Memory,
    Redis(RedisStoreConfig),
}

#[derive(Debug, Clone)]
struct WorkerConfig {
    store: StoreBackendConfig,
    lock_name: String,
    lock_options: LockOptions,
    contenders: usize,
    rounds: u32,
    hold_ms: u64,
}

#[derive(Debug, Default)]
struct ContenderReport {
    acquired: u32,
    busy: u32,
    failed: u32,
}

#[tokio::main]
async fn main() -> Result<(), LockError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let store = build_store(&config.store)?;
    let cancel = CancellationToken::new();

    info!(
        lock_name = %config.lock_name,
        contenders = config.contenders,
        rounds = config.rounds,
        hold_ms = config.hold_ms,
        lease_seconds = config.lock_options.lease_seconds,
        blocking = config.lock_options.blocking,
        watchdog = config.lock_options.watchdog,
        "lockwell-worker started"
    );

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown requested, cancelling contenders");
                cancel.cancel();
            }
        });
    }

    let mut contenders = JoinSet::new();
    for contender_id in 0..config.contenders {
        let lock = DistributedLock::new(
            Arc::clone(&store),
            config.lock_name.as_str(),
            config.lock_options,
        )?;
        let cancel = cancel.clone();
        let rounds = config.rounds;
        let hold = Duration::from_millis(config.hold_ms);

        contenders.spawn(async move {
            let report = run_contender(contender_id, &lock, rounds, hold, &cancel).await;
            (contender_id, report)
        });
    }

    while let Some(joined) = contenders.join_next().await {
        match joined {
            Ok((contender_id, report)) => info!(
                contender_id,
                acquired = report.acquired,
                busy = report.busy,
                failed = report.failed,
                "contender finished"
            ),
            Err(error) => warn!(error = %error, "contender task failed"),
        }
    }

    info!("lockwell-worker stopped");
    Ok(())
}

async fn run_contender(
    contender_id: usize,
    lock: &DistributedLock,
    rounds: u32,
    hold: Duration,
    cancel: &CancellationToken,
) -> ContenderReport {
    let mut report = ContenderReport::default();

    for round in 0..rounds {
        if cancel.is_cancelled() {
            break;
        }

        let outcome = lock
            .with_lock(cancel, || async {
                info!(contender_id, round, token = %lock.owner_token(), "holding lock");
                tokio::select! {
                    () = tokio::time::sleep(hold) => {}
                    () = cancel.cancelled() => {}
                }
            })
            .await;

        match outcome {
            Ok(()) => report.acquired = report.acquired.saturating_add(1),
            Err(error @ (LockError::Conflict(_) | LockError::Timeout { .. })) => {
                report.busy = report.busy.saturating_add(1);
                info!(contender_id, round, error = %error, "lock busy");
            }
            Err(error) => {
                report.failed = report.failed.saturating_add(1);
                warn!(contender_id, round, error = %error, "lock round failed");
            }
        }
    }

    report
}

fn build_store(config: &StoreBackendConfig) -> LockResult<Arc<dyn LockStore>> {
    match config {
        StoreBackendConfig::Memory => Ok(Arc::new(InMemoryLockStore::new())),
        StoreBackendConfig::Redis(redis_config) => {
            Ok(Arc::new(RedisLockStore::new(redis_config.clone())?))
        }
    }
}

impl WorkerConfig {
    fn load() -> LockResult<Self> {
        let store = match env::var("LOCKWELL_STORE")
            .unwrap_or_else(|_| "redis".to_owned())
            .as_str()
        {
            "memory" => StoreBackendConfig::Memory,
            "redis" => {
                let address = required_env("LOCKWELL_REDIS_ADDRESS")?;
                let connect_timeout_ms = parse_env_u64("LOCKWELL_REDIS_CONNECT_TIMEOUT_MS", 5_000)?;
                let mut redis_config = RedisStoreConfig::new(address)
                    .with_connect_timeout(Duration::from_millis(connect_timeout_ms));
                if let Some(password) = optional_env("LOCKWELL_REDIS_PASSWORD") {
                    redis_config = redis_config.with_password(password);
                }
                redis_config.connection_url()?;
                StoreBackendConfig::Redis(redis_config)
            }
            other => {
                return Err(LockError::InvalidArgument(format!(
                    "LOCKWELL_STORE must be either 'redis' or 'memory', got '{other}'"
                )));
            }
        };

        let lock_name =
            optional_env("LOCKWELL_LOCK_NAME").unwrap_or_else(|| "lockwell-worker".to_owned());

        let mut lock_options =
            LockOptions::new().with_lease_seconds(parse_env_u64("LOCKWELL_LEASE_SECONDS", 0)?);
        if parse_env_bool("LOCKWELL_BLOCKING", true)? {
            lock_options = lock_options.with_blocking();
        }
        lock_options =
            lock_options.with_max_wait_seconds(parse_env_u64("LOCKWELL_MAX_WAIT_SECONDS", 0)?);
        if parse_env_bool("LOCKWELL_WATCHDOG", false)? {
            lock_options = lock_options.with_watchdog();
        }

        let contenders = parse_env_usize("LOCKWELL_CONTENDERS", 2)?;
        let rounds = u32::try_from(parse_env_u64("LOCKWELL_ROUNDS", 1)?).map_err(|error| {
            LockError::InvalidArgument(format!("invalid LOCKWELL_ROUNDS value: {error}"))
        })?;
        let hold_ms = parse_env_u64("LOCKWELL_HOLD_MS", 1_000)?;

        if contenders == 0 {
            return Err(LockError::InvalidArgument(
                "LOCKWELL_CONTENDERS must be greater than zero".to_owned(),
            ));
        }

        if rounds == 0 {
            return Err(LockError::InvalidArgument(
                "LOCKWELL_ROUNDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            store,
            lock_name,
            lock_options,
            contenders,
            rounds,
            hold_ms,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> LockResult<String> {
    optional_env(name).ok_or_else(|| LockError::InvalidArgument(format!("{name} is required")))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_env_usize(name: &str, default: usize) -> LockResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            LockError::InvalidArgument(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> LockResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            LockError::InvalidArgument(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> LockResult<bool> {
    match env::var(name) {
        Ok(value) if value.eq_ignore_ascii_case("true") || value == "1" => Ok(true),
        Ok(value) if value.eq_ignore_ascii_case("false") || value == "0" => Ok(false),
        Ok(value) => Err(LockError::InvalidArgument(format!(
            "invalid {name} value '{value}': expected true or false"
        ))),
        Err(_) => Ok(default),
    }
}
