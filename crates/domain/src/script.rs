use crate::{LockKey, OwnerToken};

/// Check-then-act payloads the store must evaluate atomically.
///
/// Both scripts compare the key's current value with the owner token and
/// act only on equality. A mismatch or an absent key yields `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipScript {
    /// Deletes the key; yields the number of deleted keys.
    CheckAndDelete {
        /// Full store key.
        key: String,
        /// Expected owner token.
        token: String,
    },
    /// Re-applies a TTL to the key; yields `1` when applied.
    CheckAndExtend {
        /// Full store key.
        key: String,
        /// Expected owner token.
        token: String,
        /// New TTL measured from now.
        ttl_seconds: u64,
    },
}

impl OwnershipScript {
    /// Builds the release payload for one lock instance.
    #[must_use]
    pub fn check_and_delete(key: &LockKey, token: &OwnerToken) -> Self {
        Self::CheckAndDelete {
            key: key.as_str().to_owned(),
            token: token.as_str().to_owned(),
        }
    }

    /// Builds the renewal payload for one lock instance.
    #[must_use]
    pub fn check_and_extend(key: &LockKey, token: &OwnerToken, ttl_seconds: u64) -> Self {
        Self::CheckAndExtend {
            key: key.as_str().to_owned(),
            token: token.as_str().to_owned(),
            ttl_seconds,
        }
    }

    /// Returns the store key the script touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::CheckAndDelete { key, .. } | Self::CheckAndExtend { key, .. } => key.as_str(),
        }
    }

    /// Returns the expected owner token.
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::CheckAndDelete { token, .. } | Self::CheckAndExtend { token, .. } => {
                token.as_str()
            }
        }
    }

    /// Returns a short label for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckAndDelete { .. } => "check_and_delete",
            Self::CheckAndExtend { .. } => "check_and_extend",
        }
    }
}
