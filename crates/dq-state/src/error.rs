//! Error types for dq-state

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the lock/port persistence layer
#[derive(Error, Debug)]
pub enum LockError {
    /// Run identifier cannot be used to name lock files
    #[error("Invalid run identifier {name:?}: {reason}")]
    InvalidRunIdentifier { name: String, reason: String },

    /// Port range is empty or the stride does not fit inside it
    #[error("Invalid port range [{min}, {max}) with stride {stride}")]
    InvalidPortRange { min: u16, max: u16, stride: u16 },

    /// A lock or port file holds something other than the expected value
    #[error("Corrupt lock state in {path}: {content:?}")]
    Corrupt { path: PathBuf, content: String },

    /// Filesystem error while reading or writing lock state
    #[error("Lock store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lock store operations
pub type LockResult<T> = std::result::Result<T, LockError>;
