use std::fmt::{Display, Formatter};

use lockwell_core::{LockError, LockResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace prepended to every logical lock name.
pub const LOCK_KEY_PREFIX: &str = "REDIS_LOCK_PREFIX_";

/// Store key guarding one logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    name: NonEmptyString,
    store_key: String,
}

impl LockKey {
    /// Creates the namespaced key for a caller-supplied lock name.
    pub fn new(name: impl Into<String>) -> LockResult<Self> {
        let name = NonEmptyString::new(name).map_err(|_| {
            LockError::InvalidArgument("lock name must not be empty".to_owned())
        })?;
        let store_key = format!("{LOCK_KEY_PREFIX}{}", name.as_str());

        Ok(Self { name, store_key })
    }

    /// Returns the caller-supplied logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the full store key, prefix included.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.store_key.as_str()
    }
}

impl Display for LockKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.store_key.as_str())
    }
}

/// Opaque identifier proving which lock instance owns a key.
///
/// Generated once per lock instance and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Creates a random 128-bit owner token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps an externally chosen token.
    pub fn from_string(value: impl Into<String>) -> LockResult<Self> {
        let value = NonEmptyString::new(value).map_err(|_| {
            LockError::InvalidArgument("owner token must not be empty".to_owned())
        })?;

        Ok(Self(value.into()))
    }

    /// Returns the token as stored in the key's value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for OwnerToken {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}
