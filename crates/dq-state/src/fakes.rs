//! In-memory fakes for the lock store (testing only)
//!
//! `MemoryLockStore` satisfies the `LockStore` contract without touching the
//! filesystem and counts operations so tests can assert on side effects.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LockResult;
use crate::lock_store::{LockKey, LockStore, RunIdentifier};

#[derive(Debug, Default)]
struct LockState {
    held: HashSet<(String, LockKey)>,
    ports: HashMap<(String, LockKey), u16>,
    acquisitions: usize,
    releases: usize,
}

/// In-memory lock store backed by a `HashSet` of held locks and a port map.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    state: Mutex<LockState>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `key` already held for `run`, as if another process owned it.
    pub fn with_held(run: &RunIdentifier, key: LockKey) -> Self {
        let store = Self::new();
        store
            .state
            .lock()
            .unwrap()
            .held
            .insert((run.as_str().to_string(), key));
        store
    }

    /// Store with a port already recorded for `key`.
    pub fn with_port(self, run: &RunIdentifier, key: LockKey, port: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .ports
            .insert((run.as_str().to_string(), key), port);
        self
    }

    /// Number of `acquire` calls so far.
    pub fn acquisitions(&self) -> usize {
        self.state.lock().unwrap().acquisitions
    }

    /// Number of `release` calls so far.
    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    /// Whether `key` is currently held (synchronous, for assertions).
    pub fn is_held(&self, run: &RunIdentifier, key: LockKey) -> bool {
        self.state
            .lock()
            .unwrap()
            .held
            .contains(&(run.as_str().to_string(), key))
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn is_unlocked(&self, run: &RunIdentifier, key: LockKey) -> LockResult<bool> {
        Ok(!self.is_held(run, key))
    }

    async fn acquire(&self, run: &RunIdentifier, key: LockKey) -> LockResult<()> {
        let mut state = self.state.lock().unwrap();
        state.held.insert((run.as_str().to_string(), key));
        state.acquisitions += 1;
        Ok(())
    }

    async fn release(&self, run: &RunIdentifier, key: LockKey) -> LockResult<()> {
        let mut state = self.state.lock().unwrap();
        state.held.remove(&(run.as_str().to_string(), key));
        state.releases += 1;
        Ok(())
    }

    async fn read_port(&self, run: &RunIdentifier, key: LockKey) -> LockResult<Option<u16>> {
        let state = self.state.lock().unwrap();
        Ok(state.ports.get(&(run.as_str().to_string(), key)).copied())
    }

    async fn record_port(&self, run: &RunIdentifier, key: LockKey, port: u16) -> LockResult<()> {
        let mut state = self.state.lock().unwrap();
        state.ports.insert((run.as_str().to_string(), key), port);
        Ok(())
    }
}
