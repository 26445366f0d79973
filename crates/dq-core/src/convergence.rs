//! The outer double-oracle loop.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::epoch::{EpochDecision, EpochRunner};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::obs;
use crate::params::RoundBudget;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// Epoch `epoch` found no beneficial deviation for either player.
    Converged { epoch: u32 },
    /// The round budget ran out; `epoch` is the next epoch that would have run.
    BudgetExhausted { epoch: u32 },
}

impl LoopOutcome {
    pub fn epoch(&self) -> u32 {
        match self {
            LoopOutcome::Converged { epoch } | LoopOutcome::BudgetExhausted { epoch } => *epoch,
        }
    }
}

impl fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopOutcome::Converged { epoch } => write!(f, "Converged at epoch {epoch}"),
            LoopOutcome::BudgetExhausted { epoch } => {
                write!(f, "Ran max_new_rounds by epoch {epoch}")
            }
        }
    }
}

/// Call `step` from `start_epoch` until it says stop or `budget` runs out.
///
/// The epoch only advances on `Continue`, and every `Continue` spends one
/// unit of budget. Errors from `step` end the loop unchanged.
pub async fn run_until_converged<F, Fut>(
    start_epoch: u32,
    budget: RoundBudget,
    mut step: F,
) -> OrchestratorResult<LoopOutcome>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = OrchestratorResult<EpochDecision>>,
{
    let mut epoch = start_epoch;
    let mut completed = 0u32;
    loop {
        if !budget.allows(completed) {
            return Ok(LoopOutcome::BudgetExhausted { epoch });
        }
        match step(epoch).await? {
            EpochDecision::Stop => return Ok(LoopOutcome::Converged { epoch }),
            EpochDecision::Continue => {
                completed = completed.saturating_add(1);
                epoch = epoch.checked_add(1).ok_or_else(|| {
                    OrchestratorError::invalid("cur_epoch", "epoch counter overflow")
                })?;
            }
        }
    }
}

/// Startup checks plus the convergence loop over an [`EpochRunner`].
pub struct Orchestrator {
    runner: EpochRunner,
}

impl Orchestrator {
    pub fn new(runner: EpochRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &EpochRunner {
        &self.runner
    }

    /// Check seed inputs and locks, then run epochs until convergence or
    /// budget exhaustion. Nothing external is invoked if a check fails.
    pub async fn run(&self) -> OrchestratorResult<LoopOutcome> {
        let params = self.runner.params();
        self.runner
            .layout()
            .check_preconditions(params.game, &params.payoffs_name)?;
        if !self.runner.locks().are_all_unlocked(&params.run_id).await? {
            return Err(OrchestratorError::LockHeld {
                run: params.run_id.clone(),
            });
        }

        async {
            obs::emit_run_started(
                &params.run_id,
                params.game,
                params.start_epoch,
                params.max_new_rounds,
            );
            let outcome =
                run_until_converged(params.start_epoch, params.max_new_rounds, |epoch| async move {
                    self.runner.run_epoch(epoch).await.map(|report| report.decision)
                })
                .await?;
            obs::emit_loop_finished(&outcome);
            Ok::<_, OrchestratorError>(outcome)
        }
        .instrument(obs::run_span(&params.run_id))
        .await
    }
}
