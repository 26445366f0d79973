//! Lock/port store definitions
//!
//! A run owns four named locks, {defender, attacker} x {train, test}, each
//! with a recorded network port. Training workers bind listeners on the port
//! handed to them, so ports advance cyclically inside a fixed range to avoid
//! collisions across rounds.
//!
//! `LockStore` is async and backend-agnostic. `FsLockStore` keeps the state in
//! lock files on disk; `fakes::MemoryLockStore` keeps it in memory for tests.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LockError, LockResult};

/// Lowest port handed to training workers (inclusive).
pub const MIN_PORT: u16 = 25335;

/// Upper bound of the port range (exclusive).
pub const MAX_PORT: u16 = 26335;

/// Ports consumed by one training round (defender and attacker listeners).
pub const PORTS_PER_ROUND: u16 = 4;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Name of one experiment's lock domain (the "port lock name").
///
/// Immutable for the lifetime of a run. It becomes part of lock and artifact
/// file names, so it must be non-empty and free of path separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunIdentifier(String);

impl RunIdentifier {
    pub fn new(name: impl Into<String>) -> LockResult<Self> {
        let name = name.into();
        let reason = if name.trim().is_empty() {
            Some("must not be empty")
        } else if name.contains(['/', '\\']) {
            Some("must not contain path separators")
        } else if name == "." || name == ".." {
            Some("must not be a relative path component")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(LockError::InvalidRunIdentifier {
                name,
                reason: reason.to_string(),
            }),
            None => Ok(RunIdentifier(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunIdentifier {
    type Error = LockError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        RunIdentifier::new(s)
    }
}

impl From<RunIdentifier> for String {
    fn from(id: RunIdentifier) -> Self {
        id.0
    }
}

impl FromStr for RunIdentifier {
    type Err = LockError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RunIdentifier::new(s)
    }
}

impl fmt::Display for RunIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the two players of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Player {
    Defender,
    Attacker,
}

impl Player {
    /// Short name used in lock file names.
    pub fn short(&self) -> &'static str {
        match self {
            Player::Defender => "def",
            Player::Attacker => "att",
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Player::Defender => write!(f, "defender"),
            Player::Attacker => write!(f, "attacker"),
        }
    }
}

/// Whether a lock guards a training or a testing worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Test,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Test => "test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one of the four locks of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub player: Player,
    pub phase: Phase,
}

impl LockKey {
    pub const DEFENDER_TRAIN: LockKey = LockKey::new(Player::Defender, Phase::Train);
    pub const DEFENDER_TEST: LockKey = LockKey::new(Player::Defender, Phase::Test);
    pub const ATTACKER_TRAIN: LockKey = LockKey::new(Player::Attacker, Phase::Train);
    pub const ATTACKER_TEST: LockKey = LockKey::new(Player::Attacker, Phase::Test);

    /// All four locks of a run, defender first.
    pub const ALL: [LockKey; 4] = [
        LockKey::DEFENDER_TRAIN,
        LockKey::DEFENDER_TEST,
        LockKey::ATTACKER_TRAIN,
        LockKey::ATTACKER_TEST,
    ];

    pub const fn new(player: Player, phase: Phase) -> Self {
        Self { player, phase }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.player, self.phase)
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Half-open port range `[min, max)` walked in steps of `stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
    pub stride: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: MIN_PORT,
            max: MAX_PORT,
            stride: PORTS_PER_ROUND,
        }
    }
}

impl PortRange {
    /// Create a validated port range.
    pub fn new(min: u16, max: u16, stride: u16) -> LockResult<Self> {
        let range = Self { min, max, stride };
        range.validate()?;
        Ok(range)
    }

    /// Reject empty ranges and strides that do not fit inside the range.
    pub fn validate(&self) -> LockResult<()> {
        if self.min >= self.max || self.stride == 0 || self.stride >= self.max - self.min {
            return Err(LockError::InvalidPortRange {
                min: self.min,
                max: self.max,
                stride: self.stride,
            });
        }
        Ok(())
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port < self.max
    }

    /// Next port after `port`, wrapping back into the range.
    ///
    /// For a port `P` inside the range, `k` calls yield
    /// `min + ((P - min + k * stride) mod (max - min))`. A port recorded
    /// outside the range restarts at `min`.
    pub fn advance(&self, port: u16) -> u16 {
        if !self.contains(port) {
            return self.min;
        }
        let span = u32::from(self.max - self.min);
        let offset = (u32::from(port - self.min) + u32::from(self.stride)) % span;
        // offset < span <= u16::MAX - min, so the sum fits
        self.min + offset as u16
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Backoff schedule used while waiting for a lock held by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// First delay between polls (milliseconds).
    pub initial_ms: u64,
    /// Upper bound on the delay between polls (milliseconds).
    pub max_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
        }
    }
}

impl PollPolicy {
    /// Delay before poll number `attempt` (0-based): doubling, capped at `max_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let ms = self.initial_ms.saturating_mul(factor).min(self.max_ms);
        Duration::from_millis(ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// LockStore
// ---------------------------------------------------------------------------

/// Named lock and port storage for double-oracle runs.
///
/// Guarantees:
/// - Locks are independent per `(run, player, phase)`.
/// - `acquire` does not wait; callers go through `wait_for_unlocked` first.
///   The window between the two is accepted because only one orchestrator
///   may run per `RunIdentifier` (see `are_all_unlocked`).
/// - `read_port` returns the port last passed to `record_port`, or `None`.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Non-blocking query.
    async fn is_unlocked(&self, run: &RunIdentifier, key: LockKey) -> LockResult<bool>;

    /// Mark the lock held.
    async fn acquire(&self, run: &RunIdentifier, key: LockKey) -> LockResult<()>;

    /// Mark the lock free. No-op if already free.
    async fn release(&self, run: &RunIdentifier, key: LockKey) -> LockResult<()>;

    /// Last recorded port for the lock.
    async fn read_port(&self, run: &RunIdentifier, key: LockKey) -> LockResult<Option<u16>>;

    /// Record the port handed out under this lock.
    async fn record_port(&self, run: &RunIdentifier, key: LockKey, port: u16) -> LockResult<()>;

    /// Suspend until the lock is free, polling with backoff.
    async fn wait_for_unlocked(
        &self,
        run: &RunIdentifier,
        key: LockKey,
        poll: &PollPolicy,
    ) -> LockResult<()> {
        let mut attempt = 0u32;
        while !self.is_unlocked(run, key).await? {
            let delay = poll.delay(attempt);
            debug!(run = %run, lock = %key, delay_ms = delay.as_millis() as u64, "lock held, waiting");
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
        Ok(())
    }

    /// True when none of the four locks of `run` is held.
    async fn are_all_unlocked(&self, run: &RunIdentifier) -> LockResult<bool> {
        for key in LockKey::ALL {
            if !self.is_unlocked(run, key).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
