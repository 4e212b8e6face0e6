//! Lock protocol services and store ports.

#![forbid(unsafe_code)]

mod distributed_lock;
mod lock_ports;

pub use distributed_lock::DistributedLock;
pub use lock_ports::{LockStore, SetOutcome};
