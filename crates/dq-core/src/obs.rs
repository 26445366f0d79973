//! Structured lifecycle events for orchestrator runs.
//!
//! - Run- and epoch-scoped tracing spans
//! - One emission function per lifecycle event, so field names stay stable
//!   for log aggregation
//!
//! Events are emitted at `info!` level except per-stage chatter (`debug!`)
//! and failures (`warn!`).

use dq_state::{Player, RunIdentifier};
use tracing::{debug, info, warn, Span};
use uuid::Uuid;

use crate::collaborator::ExitStatus;
use crate::convergence::LoopOutcome;
use crate::params::RoundBudget;
use crate::stage::Stage;

/// Span for the whole orchestrator invocation.
///
/// Each invocation gets a fresh session id so restarts of the same run can be
/// told apart in aggregated logs. Attach with `tracing::Instrument`; spans are
/// never held entered across an `.await`.
pub fn run_span(run: &RunIdentifier) -> Span {
    tracing::info_span!("dq.run", run = %run, session = %Uuid::new_v4())
}

/// Span tagging everything inside one epoch.
pub fn epoch_span(run: &RunIdentifier, epoch: u32) -> Span {
    tracing::info_span!("dq.epoch", run = %run, epoch = epoch)
}

pub fn emit_run_started(run: &RunIdentifier, game: u32, start_epoch: u32, budget: RoundBudget) {
    info!(
        event = "run.started",
        run = %run,
        game = game,
        start_epoch = start_epoch,
        max_new_rounds = %budget,
        "Starting from epoch {start_epoch}"
    );
}

pub fn emit_epoch_started(epoch: u32) {
    info!(event = "epoch.started", epoch = epoch, "Will run epoch {epoch}");
}

pub fn emit_stage_started(stage: Stage, epoch: u32) {
    info!(event = "stage.started", stage = %stage, epoch = epoch, "Will run {stage}");
}

pub fn emit_stage_finished(stage: Stage, status: ExitStatus) {
    if status.is_success() {
        debug!(event = "stage.finished", stage = %stage, status = %status);
    } else {
        warn!(event = "stage.failed", stage = %stage, status = %status);
    }
}

pub fn emit_port_allocated(run: &RunIdentifier, previous: Option<u16>, port: u16) {
    info!(
        event = "port.allocated",
        run = %run,
        previous = ?previous,
        port = port,
    );
}

pub fn emit_deviation_checked(player: Player, epoch: u32, beneficial: bool) {
    info!(
        event = "deviation.checked",
        player = %player,
        epoch = epoch,
        beneficial = beneficial,
    );
}

pub fn emit_epoch_decided(epoch: u32, keep_going: bool) {
    if keep_going {
        info!(event = "epoch.continue", epoch = epoch, "Should continue after round {epoch}");
    } else {
        info!(event = "epoch.converged", epoch = epoch, "Converged after round {epoch}");
    }
}

pub fn emit_loop_finished(outcome: &LoopOutcome) {
    match outcome {
        LoopOutcome::Converged { epoch } => {
            info!(event = "run.converged", epoch = *epoch, "Converged at epoch {epoch}")
        }
        LoopOutcome::BudgetExhausted { epoch } => info!(
            event = "run.budget_exhausted",
            epoch = *epoch,
            "Ran max_new_rounds by epoch {epoch}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_enter_without_subscriber() {
        let run = RunIdentifier::new("s29").unwrap();
        let _run = run_span(&run).entered();
        let _epoch = epoch_span(&run, 17).entered();
    }

    #[test]
    fn emitters_accept_every_variant() {
        emit_stage_finished(Stage::TrainDefender, ExitStatus::Success);
        emit_stage_finished(Stage::TrainDefender, ExitStatus::TimedOut);
        emit_epoch_decided(18, true);
        emit_epoch_decided(18, false);
        emit_loop_finished(&LoopOutcome::Converged { epoch: 17 });
        emit_loop_finished(&LoopOutcome::BudgetExhausted { epoch: 18 });
    }
}
