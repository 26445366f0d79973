//! One double-oracle round.
//!
//! ```text
//! CheckNotAlreadyRun -> ComputeEquilibrium -> ExportStrategies
//!   -> UpdateOpponentStrategies -> SamplePayoffs -> TrainAndTest
//!   -> CheckDeviation(def) -> CheckDeviation(att)
//!   -> [both false] Stop
//!   -> ExpandColumns -> AppendStrategyNames -> IngestNewData -> Continue
//! ```
//!
//! Stages run strictly in this order; only the two trainers overlap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dq_state::{LockKey, LockStore, Player, PollPolicy, PortRange};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::artifacts::ArtifactLayout;
use crate::collaborator::{Collaborator, DeviationOracle, Invocation};
use crate::dispatch::run_training_pair;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::obs;
use crate::params::RunParams;

/// What the convergence loop should do after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochDecision {
    /// At least one player found a beneficial deviation; the new strategies
    /// were added to the pool.
    Continue,
    /// Neither player can improve on the current equilibrium.
    Stop,
}

/// Summary of one finished epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: u32,
    pub decision: EpochDecision,
    pub defender_beneficial: bool,
    pub attacker_beneficial: bool,
    /// Port handed to the trainers.
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives the stages of a single epoch against injected collaborators.
pub struct EpochRunner {
    params: RunParams,
    layout: ArtifactLayout,
    ports: PortRange,
    poll: PollPolicy,
    collaborator: Arc<dyn Collaborator>,
    oracle: Arc<dyn DeviationOracle>,
    locks: Arc<dyn LockStore>,
}

impl EpochRunner {
    /// Validates `params` up front so no stage ever sees a malformed value.
    pub fn new(
        params: RunParams,
        layout: ArtifactLayout,
        collaborator: Arc<dyn Collaborator>,
        oracle: Arc<dyn DeviationOracle>,
        locks: Arc<dyn LockStore>,
    ) -> OrchestratorResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            layout,
            ports: PortRange::default(),
            poll: PollPolicy::default(),
            collaborator,
            oracle,
            locks,
        })
    }

    pub fn with_ports(mut self, ports: PortRange) -> OrchestratorResult<Self> {
        ports
            .validate()
            .map_err(|e| OrchestratorError::invalid("ports", e.to_string()))?;
        self.ports = ports;
        Ok(self)
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn locks(&self) -> &dyn LockStore {
        self.locks.as_ref()
    }

    /// Run epoch `epoch`, producing the strategies of epoch `epoch + 1`.
    pub async fn run_epoch(&self, epoch: u32) -> OrchestratorResult<EpochReport> {
        self.run_epoch_inner(epoch)
            .instrument(obs::epoch_span(&self.params.run_id, epoch))
            .await
    }

    async fn run_epoch_inner(&self, epoch: u32) -> OrchestratorResult<EpochReport> {
        let started_at = Utc::now();
        let p = &self.params;
        let next = epoch
            .checked_add(1)
            .ok_or_else(|| OrchestratorError::invalid("cur_epoch", "epoch counter overflow"))?;

        let artifact = self.layout.result_file(p.game, next, &p.payoffs_name);
        if artifact.exists() {
            return Err(OrchestratorError::DuplicateEpoch { epoch, artifact });
        }
        obs::emit_epoch_started(epoch);

        self.run_stage(p.compute_equilibrium(epoch), epoch).await?;
        self.run_stage(p.export_strategies(epoch), epoch).await?;
        self.run_stage(p.update_opponent_strategies(next), epoch).await?;
        self.run_stage(p.sample_payoffs(next), epoch).await?;

        let port = self.train_and_test(epoch, next).await?;

        let defender_beneficial = self.check_deviation(epoch, next, Player::Defender).await?;
        let attacker_beneficial = self.check_deviation(epoch, next, Player::Attacker).await?;

        let decision = if defender_beneficial || attacker_beneficial {
            self.run_stage(
                p.expand_columns(next, defender_beneficial, attacker_beneficial),
                epoch,
            )
            .await?;
            self.run_stage(
                p.append_strategy_names(next, defender_beneficial, attacker_beneficial),
                epoch,
            )
            .await?;
            self.run_stage(p.ingest_new_data(next), epoch).await?;
            EpochDecision::Continue
        } else {
            EpochDecision::Stop
        };
        obs::emit_epoch_decided(next, decision == EpochDecision::Continue);

        Ok(EpochReport {
            epoch,
            decision,
            defender_beneficial,
            attacker_beneficial,
            port,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_stage(&self, invocation: Invocation, epoch: u32) -> OrchestratorResult<()> {
        let stage = invocation.stage;
        obs::emit_stage_started(stage, epoch);
        let status = self.collaborator.run(&invocation).await?;
        obs::emit_stage_finished(stage, status);
        if !status.is_success() {
            return Err(OrchestratorError::StageFailed { stage, status });
        }
        Ok(())
    }

    /// Take the defender-train lock, hand both trainers a fresh port and
    /// release the lock once both have joined, whatever they returned.
    async fn train_and_test(&self, epoch: u32, next: u32) -> OrchestratorResult<u16> {
        let run = &self.params.run_id;
        let key = LockKey::DEFENDER_TRAIN;

        self.locks.wait_for_unlocked(run, key, &self.poll).await?;
        self.locks.acquire(run, key).await?;

        let trained = self.train_while_locked(epoch, next).await;
        let released = self.locks.release(run, key).await;

        let port = trained?;
        released?;
        Ok(port)
    }

    async fn train_while_locked(&self, epoch: u32, next: u32) -> OrchestratorResult<u16> {
        let run = &self.params.run_id;
        let key = LockKey::DEFENDER_TRAIN;

        let previous = self.locks.read_port(run, key).await?;
        let port = self.ports.advance(previous.unwrap_or(self.ports.min));
        self.locks.record_port(run, key, port).await?;
        obs::emit_port_allocated(run, previous, port);

        let defender = self.params.train_defender(next, port);
        let attacker = self.params.train_attacker(next, port);
        obs::emit_stage_started(defender.stage, epoch);
        obs::emit_stage_started(attacker.stage, epoch);

        run_training_pair(self.collaborator.as_ref(), &defender, &attacker)
            .await?
            .into_result()?;
        Ok(port)
    }

    async fn check_deviation(
        &self,
        epoch: u32,
        next: u32,
        player: Player,
    ) -> OrchestratorResult<bool> {
        let invocation = self.params.check_deviation(next, player);
        obs::emit_stage_started(invocation.stage, epoch);
        let beneficial = self.oracle.is_beneficial(player, &invocation).await?;
        obs::emit_deviation_checked(player, epoch, beneficial);
        Ok(beneficial)
    }
}
