//! Shared primitives for all Rust crates in Lockwell.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across Lockwell crates.
pub type LockResult<T> = Result<T, LockError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> LockResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(LockError::InvalidArgument(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl Display for NonEmptyString {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Classification attached by a store adapter to every failure it reports.
///
/// Retry decisions are taken on this tag, never on the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The store answered with no value where one was expected.
    ///
    /// Transient: blocking acquisition retries it like a conflict. The
    /// bundled ownership scripts always return an integer, so the Redis
    /// adapter only emits this when a server or proxy answers a script call
    /// with nil; a nil `SET NX` reply is a conflict, not this kind.
    NilReply,

    /// Dialing or acquiring a connection failed or timed out.
    Connection,

    /// The store rejected or failed to execute the request.
    Response,
}

impl StoreErrorKind {
    /// Returns the stable label used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NilReply => "nil_reply",
            Self::Connection => "connection",
            Self::Response => "response",
        }
    }
}

impl Display for StoreErrorKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Lock protocol error categories.
#[derive(Debug, Error)]
pub enum LockError {
    /// Empty key or value, non-positive TTL, or an invalid configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another owner currently holds the key.
    #[error("lock is acquired by others: {0}")]
    Conflict(String),

    /// The store or its transport failed.
    #[error("store error ({kind}): {message}")]
    Store {
        /// Structured classification set by the adapter.
        kind: StoreErrorKind,
        /// Adapter-provided context.
        message: String,
    },

    /// A blocking acquisition exceeded its configured maximum wait.
    #[error("timed out after {waited:?} waiting for lock '{key}'")]
    Timeout {
        /// Store key that stayed busy.
        key: String,
        /// Elapsed time when the acquirer gave up.
        waited: Duration,
    },

    /// The caller's cancellation signal fired.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The key is absent or held under a different owner token.
    #[error("ownership error: {0}")]
    Ownership(String),
}

impl LockError {
    /// Builds a store error carrying the given classification.
    #[must_use]
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self::Store {
            kind,
            message: message.into(),
        }
    }

    /// Returns whether a blocking acquirer may poll again after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_)
                | Self::Store {
                    kind: StoreErrorKind::NilReply,
                    ..
                }
        )
    }

    /// Returns the store classification when this is a store error.
    #[must_use]
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Store { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
