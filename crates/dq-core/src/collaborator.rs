//! Collaborator seams.
//!
//! Every stage of an epoch is an opaque external unit of work. The epoch
//! runner only sees the invocation it hands out and the `ExitStatus` it gets
//! back; artifacts produced as side effects stay the collaborator's business.

use std::fmt;

use async_trait::async_trait;
use dq_state::Player;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorResult;
use crate::stage::Stage;

/// How a collaborator run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    /// Non-zero exit; `-1` when the process was killed by a signal.
    Failed(i32),
    TimedOut,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            ExitStatus::Success
        } else {
            ExitStatus::Failed(status.code().unwrap_or(-1))
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Failed(code) => write!(f, "exit code {code}"),
            ExitStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// A stage plus its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub stage: Stage,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            args: Vec::new(),
        }
    }

    /// Append one positional argument.
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Append a flag the way the Python collaborators parse it.
    pub fn flag(self, value: bool) -> Self {
        self.arg(py_bool(value))
    }
}

/// Render a boolean as a Python literal.
pub fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Runs one stage to completion.
///
/// `Err` is reserved for failures to launch the unit at all; a unit that ran
/// and failed reports it through `ExitStatus`.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> OrchestratorResult<ExitStatus>;
}

/// Boolean oracle answering "is this player's new candidate a beneficial
/// deviation from the current equilibrium?"
#[async_trait]
pub trait DeviationOracle: Send + Sync {
    async fn is_beneficial(
        &self,
        player: Player,
        invocation: &Invocation,
    ) -> OrchestratorResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Success.to_string(), "success");
        assert_eq!(ExitStatus::Failed(3).to_string(), "exit code 3");
        assert_eq!(ExitStatus::TimedOut.to_string(), "timed out");
    }

    #[test]
    fn test_only_success_is_success() {
        assert!(ExitStatus::Success.is_success());
        assert!(!ExitStatus::Failed(0).is_success());
        assert!(!ExitStatus::TimedOut.is_success());
    }

    #[test]
    fn test_invocation_builder_keeps_order() {
        let inv = Invocation::new(Stage::ExpandColumns)
            .arg(400)
            .arg("sl29")
            .flag(true)
            .flag(false);
        assert_eq!(inv.stage, Stage::ExpandColumns);
        assert_eq!(inv.args, vec!["400", "sl29", "True", "False"]);
    }
}
