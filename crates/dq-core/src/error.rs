//! Error taxonomy for the orchestration core.

use std::fmt;
use std::path::PathBuf;

use dq_state::{LockError, Player, RunIdentifier};

use crate::collaborator::ExitStatus;
use crate::stage::Stage;

/// What kind of seed resource the precondition check found missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Directory,
    File,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Directory => write!(f, "directory"),
            ResourceKind::File => write!(f, "file"),
        }
    }
}

/// Errors produced by the orchestration layer. All of them end the run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A required directory or seed file is missing at startup.
    #[error("missing {kind}: {}", .path.display())]
    MissingResource { kind: ResourceKind, path: PathBuf },

    /// One of the run's locks is held at startup.
    #[error("lock is being held: {run}")]
    LockHeld { run: RunIdentifier },

    /// The next epoch's result artifact already exists.
    #[error("cannot run epoch {epoch}: {} already exists", .artifact.display())]
    DuplicateEpoch { epoch: u32, artifact: PathBuf },

    /// A collaborator ran and did not succeed.
    #[error("stage {stage} failed: {status}")]
    StageFailed { stage: Stage, status: ExitStatus },

    /// A collaborator could not be launched.
    #[error("could not launch stage {stage}: {source}")]
    Spawn {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    /// The deviation oracle printed something that is not a boolean.
    #[error("deviation check for {player} returned unreadable output: {output:?}")]
    InvalidOracleOutput { player: Player, output: String },

    /// A run parameter is out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("lock store error: {0}")]
    Lock(#[from] LockError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        OrchestratorError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Result type for orchestration operations.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
