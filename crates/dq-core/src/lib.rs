//! dq-core: orchestration of double-oracle training runs
//!
//! Each epoch computes an equilibrium over the current strategy pools,
//! trains a best response per player against it, and keeps a response only
//! if it is a beneficial deviation. The run ends when neither player
//! improves or the round budget is spent.
//!
//! ## Key Components
//!
//! - `EpochRunner`: the per-epoch stage sequence
//! - `Orchestrator` / `run_until_converged`: startup checks and the outer loop
//! - `Collaborator` / `DeviationOracle`: seams for the external stage scripts,
//!   with `ProcessCollaborator` and `ProcessDeviationOracle` for production
//! - `OrchestratorConfig`: optional TOML overrides for scripts, locks and ports

pub mod artifacts;
pub mod collaborator;
pub mod config;
pub mod convergence;
pub mod dispatch;
pub mod epoch;
mod error;
pub mod fakes;
pub mod obs;
pub mod params;
pub mod runner;
pub mod stage;

pub use artifacts::ArtifactLayout;
pub use collaborator::{Collaborator, DeviationOracle, ExitStatus, Invocation};
pub use config::{LockSettings, OrchestratorConfig};
pub use convergence::{run_until_converged, LoopOutcome, Orchestrator};
pub use dispatch::{run_training_pair, PairOutcome};
pub use epoch::{EpochDecision, EpochReport, EpochRunner};
pub use error::{OrchestratorError, OrchestratorResult, ResourceKind};
pub use params::{RoundBudget, RunParams};
pub use runner::{ProcessCollaborator, ProcessDeviationOracle, StageOutcome};
pub use stage::{Stage, StageConfig};
