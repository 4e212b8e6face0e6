//! Redis-backed store primitives for the lock protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lockwell_application::{LockStore, SetOutcome};
use lockwell_core::{LockError, LockResult, StoreErrorKind};
use lockwell_domain::OwnershipScript;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tokio::sync::OnceCell;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::redis_store_config::RedisStoreConfig;

const CHECK_AND_DELETE_SCRIPT: &str = r#"
local lock_key = KEYS[1]
local lock_token = ARGV[1]
local current_token = redis.call('GET', lock_key)
if (not current_token or current_token ~= lock_token) then
  return 0
else
  return redis.call('DEL', lock_key)
end
"#;

const CHECK_AND_EXTEND_SCRIPT: &str = r#"
local lock_key = KEYS[1]
local lock_token = ARGV[1]
local duration = ARGV[2]
local current_token = redis.call('GET', lock_key)
if (not current_token or current_token ~= lock_token) then
  return 0
else
  return redis.call('EXPIRE', lock_key, duration)
end
"#;

/// Redis implementation of the lock store port.
///
/// One reconnecting multiplexed connection is opened on first use and shared
/// by every clone of the store.
#[derive(Clone)]
pub struct RedisLockStore {
    client: redis::Client,
    connect_timeout: Duration,
    connection: Arc<OnceCell<ConnectionManager>>,
    check_and_delete: Script,
    check_and_extend: Script,
}

impl RedisLockStore {
    /// Creates a store from validated connection settings.
    ///
    /// Does not dial; connection errors surface on the first call.
    pub fn new(config: RedisStoreConfig) -> LockResult<Self> {
        let url = config.connection_url()?;
        let client = redis::Client::open(url.as_str()).map_err(|error| {
            LockError::InvalidArgument(format!("invalid redis configuration: {error}"))
        })?;

        Ok(Self::from_client(client, config.connect_timeout()))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(client: redis::Client, connect_timeout: Duration) -> Self {
        Self {
            client,
            connect_timeout,
            connection: Arc::new(OnceCell::new()),
            check_and_delete: Script::new(CHECK_AND_DELETE_SCRIPT),
            check_and_extend: Script::new(CHECK_AND_EXTEND_SCRIPT),
        }
    }

    async fn connection(&self, cancel: &CancellationToken) -> LockResult<ConnectionManager> {
        let connect = self.connection.get_or_try_init(|| async {
            debug!(timeout_ms = self.connect_timeout.as_millis(), "connecting to redis");
            let manager = ConnectionManager::new(self.client.clone());
            match time::timeout(self.connect_timeout, manager).await {
                Ok(Ok(manager)) => Ok(manager),
                Ok(Err(error)) => Err(LockError::store(
                    StoreErrorKind::Connection,
                    format!("failed to connect to redis: {error}"),
                )),
                Err(_) => Err(LockError::store(
                    StoreErrorKind::Connection,
                    format!(
                        "timed out after {:?} connecting to redis",
                        self.connect_timeout
                    ),
                )),
            }
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LockError::Cancelled(
                "cancelled while acquiring a redis connection".to_owned(),
            )),
            connection = connect => connection.cloned(),
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        cancel: &CancellationToken,
    ) -> LockResult<SetOutcome> {
        if key.is_empty() || value.is_empty() {
            return Err(LockError::InvalidArgument(
                "SET NX key or value must not be empty".to_owned(),
            ));
        }

        if ttl_seconds == 0 {
            return Err(LockError::InvalidArgument(
                "SET NX ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        let mut connection = self.connection(cancel).await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .arg("NX")
            .query_async(&mut connection)
            .await
            .map_err(|error| map_redis_error("failed to acquire lock", &error))?;

        match reply {
            Some(reply) if reply.eq_ignore_ascii_case("OK") => Ok(SetOutcome::Acquired),
            Some(reply) => Err(LockError::store(
                StoreErrorKind::Response,
                format!("unexpected SET NX reply '{reply}'"),
            )),
            None => Ok(SetOutcome::Conflict),
        }
    }

    async fn evaluate_script(
        &self,
        script: &OwnershipScript,
        cancel: &CancellationToken,
    ) -> LockResult<i64> {
        let mut connection = self.connection(cancel).await?;

        let reply: Option<i64> = match script {
            OwnershipScript::CheckAndDelete { key, token } => {
                self.check_and_delete
                    .key(key.as_str())
                    .arg(token.as_str())
                    .invoke_async(&mut connection)
                    .await
            }
            OwnershipScript::CheckAndExtend {
                key,
                token,
                ttl_seconds,
            } => {
                self.check_and_extend
                    .key(key.as_str())
                    .arg(token.as_str())
                    .arg(*ttl_seconds)
                    .invoke_async(&mut connection)
                    .await
            }
        }
        .map_err(|error| map_redis_error(script.name(), &error))?;

        reply.ok_or_else(|| {
            LockError::store(
                StoreErrorKind::NilReply,
                format!("{} returned nil for '{}'", script.name(), script.key()),
            )
        })
    }
}

fn map_redis_error(context: &str, error: &RedisError) -> LockError {
    let kind = if error.is_io_error() || error.is_timeout() {
        StoreErrorKind::Connection
    } else {
        StoreErrorKind::Response
    };

    LockError::store(kind, format!("{context}: {error}"))
}
