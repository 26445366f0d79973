//! Run parameters and the positional argument layout of each collaborator.

use std::fmt;
use std::str::FromStr;

use dq_state::{Player, RunIdentifier};
use serde::{Deserialize, Serialize};

use crate::collaborator::Invocation;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::stage::Stage;

/// Upper bound on the number of new rounds a run may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundBudget {
    Unbounded,
    Bounded(u32),
}

impl RoundBudget {
    /// Whether another epoch may start after `completed` continuing rounds.
    pub fn allows(&self, completed: u32) -> bool {
        match self {
            RoundBudget::Unbounded => true,
            RoundBudget::Bounded(max) => completed < *max,
        }
    }
}

impl FromStr for RoundBudget {
    type Err = OrchestratorError;

    /// `None` means unbounded; anything else must be a non-negative integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") {
            return Ok(RoundBudget::Unbounded);
        }
        s.parse::<u32>().map(RoundBudget::Bounded).map_err(|_| {
            OrchestratorError::invalid(
                "max_new_rounds",
                format!("expected `None` or a non-negative integer, got {s:?}"),
            )
        })
    }
}

impl fmt::Display for RoundBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundBudget::Unbounded => write!(f, "None"),
            RoundBudget::Bounded(n) => write!(f, "{n}"),
        }
    }
}

/// Static configuration of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Game identifier used in seed and result file names.
    pub game: u32,
    /// Epoch whose equilibrium the first round computes.
    pub start_epoch: u32,
    /// Namespace of the exported strategy tables.
    pub tsv_name: String,
    /// Namespace of payoff files and strategy name lists.
    pub payoffs_name: String,
    pub def_net_env: String,
    pub att_net_env: String,
    pub both_env: String,
    pub graph_name: String,
    /// Environment where the attacker trains against the defender mixture.
    pub vs_mixed_def_env: String,
    /// Environment where the defender trains against the attacker mixture.
    pub vs_mixed_att_env: String,
    /// Samples per new payoff-matrix column.
    pub new_col_count: u32,
    pub def_pkl_prefix: String,
    pub att_pkl_prefix: String,
    /// Lock and port namespace.
    pub run_id: RunIdentifier,
    pub def_train_steps: u64,
    pub att_train_steps: u64,
    pub max_new_rounds: RoundBudget,
}

impl RunParams {
    /// Reject malformed values before any stage runs.
    pub fn validate(&self) -> OrchestratorResult<()> {
        let names: [(&'static str, &str); 11] = [
            ("env_short_name_tsv", &self.tsv_name),
            ("env_short_name_payoffs", &self.payoffs_name),
            ("env_name_def_net", &self.def_net_env),
            ("env_name_att_net", &self.att_net_env),
            ("env_name_both", &self.both_env),
            ("graph_name", &self.graph_name),
            ("env_name_vs_mixed_def", &self.vs_mixed_def_env),
            ("env_name_vs_mixed_att", &self.vs_mixed_att_env),
            ("def_pkl_prefix", &self.def_pkl_prefix),
            ("att_pkl_prefix", &self.att_pkl_prefix),
            ("port_lock_name", self.run_id.as_str()),
        ];
        for (name, value) in names {
            if value.trim().is_empty() {
                return Err(OrchestratorError::invalid(name, "must not be empty"));
            }
        }
        if self.new_col_count == 0 {
            return Err(OrchestratorError::invalid("new_col_count", "must be positive"));
        }
        if self.def_train_steps == 0 {
            return Err(OrchestratorError::invalid("max_timesteps_def", "must be positive"));
        }
        if self.att_train_steps == 0 {
            return Err(OrchestratorError::invalid("max_timesteps_att", "must be positive"));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collaborator arguments. `epoch` is the current epoch; stages tagged
    // with the next epoch receive `epoch + 1`.
    // -----------------------------------------------------------------------

    pub fn compute_equilibrium(&self, epoch: u32) -> Invocation {
        Invocation::new(Stage::ComputeEquilibrium)
            .arg(self.game)
            .arg(epoch)
            .arg(&self.payoffs_name)
    }

    pub fn export_strategies(&self, epoch: u32) -> Invocation {
        Invocation::new(Stage::ExportStrategies)
            .arg(self.game)
            .arg(epoch)
            .arg(&self.tsv_name)
            .arg(&self.payoffs_name)
    }

    pub fn update_opponent_strategies(&self, new_epoch: u32) -> Invocation {
        Invocation::new(Stage::UpdateOpponentStrategies)
            .arg(&self.run_id)
            .arg(&self.tsv_name)
            .arg(new_epoch)
    }

    pub fn sample_payoffs(&self, new_epoch: u32) -> Invocation {
        Invocation::new(Stage::SamplePayoffs)
            .arg(self.game)
            .arg(&self.payoffs_name)
            .arg(new_epoch)
    }

    pub fn train_defender(&self, new_epoch: u32, port: u16) -> Invocation {
        Invocation::new(Stage::TrainDefender)
            .arg(&self.graph_name)
            .arg(&self.payoffs_name)
            .arg(new_epoch)
            .arg(&self.vs_mixed_att_env)
            .arg(&self.run_id)
            .arg(port)
            .arg(&self.tsv_name)
            .arg(self.def_train_steps)
    }

    /// The attacker trainer takes the port before the lock name.
    pub fn train_attacker(&self, new_epoch: u32, port: u16) -> Invocation {
        Invocation::new(Stage::TrainAttacker)
            .arg(&self.graph_name)
            .arg(&self.payoffs_name)
            .arg(new_epoch)
            .arg(&self.vs_mixed_def_env)
            .arg(port)
            .arg(&self.run_id)
            .arg(&self.tsv_name)
            .arg(self.att_train_steps)
    }

    pub fn check_deviation(&self, new_epoch: u32, player: Player) -> Invocation {
        Invocation::new(Stage::CheckDeviation)
            .arg(&self.payoffs_name)
            .arg(new_epoch)
            .flag(player == Player::Defender)
    }

    pub fn expand_columns(
        &self,
        new_epoch: u32,
        def_beneficial: bool,
        att_beneficial: bool,
    ) -> Invocation {
        Invocation::new(Stage::ExpandColumns)
            .arg(&self.def_net_env)
            .arg(&self.att_net_env)
            .arg(&self.both_env)
            .arg(self.new_col_count)
            .arg(new_epoch)
            .arg(&self.payoffs_name)
            .flag(def_beneficial)
            .flag(att_beneficial)
            .arg(&self.graph_name)
    }

    pub fn append_strategy_names(
        &self,
        new_epoch: u32,
        def_beneficial: bool,
        att_beneficial: bool,
    ) -> Invocation {
        Invocation::new(Stage::AppendStrategyNames)
            .arg(&self.payoffs_name)
            .arg(new_epoch)
            .arg(&self.def_pkl_prefix)
            .arg(&self.att_pkl_prefix)
            .flag(def_beneficial)
            .flag(att_beneficial)
    }

    pub fn ingest_new_data(&self, new_epoch: u32) -> Invocation {
        Invocation::new(Stage::IngestNewData)
            .arg(self.game)
            .arg(&self.payoffs_name)
            .arg(new_epoch)
    }
}
