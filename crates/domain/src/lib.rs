//! Domain types and invariants for store-backed mutual exclusion.

#![forbid(unsafe_code)]

mod lock;
mod options;
mod script;

pub use lock::{LOCK_KEY_PREFIX, LockKey, OwnerToken};
pub use options::{
    DEFAULT_LEASE_SECONDS, DEFAULT_MAX_WAIT_SECONDS, LockConfiguration, LockOptions,
    POLL_INTERVAL, RENEWAL_INTERVAL, RENEWAL_MARGIN_SECONDS,
};
pub use script::OwnershipScript;
