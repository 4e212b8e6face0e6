use std::time::Duration;

use lockwell_core::{LockError, LockResult};
use url::Url;

/// Connect timeout applied when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings of the Redis lock store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    address: String,
    password: Option<String>,
    connect_timeout: Duration,
}

impl RedisStoreConfig {
    /// Creates settings for `host:port` or a `redis://` / `rediss://` URL.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Authenticates with the given password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Bounds how long establishing the connection may take.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Returns the configured connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Validates the settings and renders the connection URL.
    pub fn connection_url(&self) -> LockResult<String> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(LockError::InvalidArgument(
                "redis address must not be empty".to_owned(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(LockError::InvalidArgument(
                "redis connect timeout must be greater than zero".to_owned(),
            ));
        }

        let raw = if address.contains("://") {
            address.to_owned()
        } else {
            format!("redis://{address}")
        };
        let mut url = Url::parse(raw.as_str()).map_err(|error| {
            LockError::InvalidArgument(format!("invalid redis address '{address}': {error}"))
        })?;

        if !matches!(url.scheme(), "redis" | "rediss") {
            return Err(LockError::InvalidArgument(format!(
                "redis address scheme must be redis or rediss, got '{}'",
                url.scheme()
            )));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(LockError::InvalidArgument(format!(
                "redis address '{address}' has no host"
            )));
        }

        if let Some(password) = self.password.as_deref().filter(|value| !value.is_empty()) {
            url.set_password(Some(password)).map_err(|()| {
                LockError::InvalidArgument(format!(
                    "redis address '{address}' does not accept a password"
                ))
            })?;
        }

        Ok(url.into())
    }
}
