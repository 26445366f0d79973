//! dq-state: lock and port state for double-oracle runs
//!
//! Training workers of concurrent experiments share one machine and one port
//! range. This crate owns the lock discipline that keeps them apart.
//!
//! ## Key Components
//!
//! - `LockStore`: per-run `{defender, attacker} x {train, test}` locks with
//!   recorded ports and polling wait
//! - `FsLockStore`: lock files on disk, shared with the worker processes
//! - `PortRange`: cyclic port allocation inside `[MIN_PORT, MAX_PORT)`

mod error;
pub mod fakes;
mod fs;
pub mod lock_store;

pub use error::{LockError, LockResult};
pub use fs::FsLockStore;
pub use lock_store::{
    LockKey, LockStore, Phase, Player, PollPolicy, PortRange, RunIdentifier, MAX_PORT, MIN_PORT,
    PORTS_PER_ROUND,
};
