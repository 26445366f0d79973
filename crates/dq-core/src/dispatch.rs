//! Concurrent dispatch of the defender/attacker training pair.

use crate::collaborator::{Collaborator, ExitStatus, Invocation};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::obs;
use crate::stage::Stage;

/// Joined result of both trainers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairOutcome {
    pub defender: ExitStatus,
    pub attacker: ExitStatus,
}

impl PairOutcome {
    /// First failing trainer, defender before attacker.
    pub fn into_result(self) -> OrchestratorResult<()> {
        if !self.defender.is_success() {
            return Err(OrchestratorError::StageFailed {
                stage: Stage::TrainDefender,
                status: self.defender,
            });
        }
        if !self.attacker.is_success() {
            return Err(OrchestratorError::StageFailed {
                stage: Stage::TrainAttacker,
                status: self.attacker,
            });
        }
        Ok(())
    }
}

/// Run both trainers concurrently and wait for both.
///
/// Neither future is cancelled when the other fails. A trainer that could
/// not be launched is only reported after its sibling has finished.
pub async fn run_training_pair(
    collaborator: &dyn Collaborator,
    defender: &Invocation,
    attacker: &Invocation,
) -> OrchestratorResult<PairOutcome> {
    let (def_result, att_result) =
        tokio::join!(collaborator.run(defender), collaborator.run(attacker));

    let defender_status = def_result?;
    let attacker_status = att_result?;
    obs::emit_stage_finished(defender.stage, defender_status);
    obs::emit_stage_finished(attacker.stage, attacker_status);

    Ok(PairOutcome {
        defender: defender_status,
        attacker: attacker_status,
    })
}
