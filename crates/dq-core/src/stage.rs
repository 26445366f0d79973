//! Pipeline stage definitions and configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// External collaborator stages of one epoch, in pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Solve for the equilibrium over the current strategy pool
    ComputeEquilibrium,

    /// Export the equilibrium as a strategy table
    ExportStrategies,

    /// Point the live training opponents at the exported table
    UpdateOpponentStrategies,

    /// Estimate each pooled strategy's payoff against the new equilibrium
    SamplePayoffs,

    /// Train and test a defender candidate against the attacker equilibrium
    TrainDefender,

    /// Train and test an attacker candidate against the defender equilibrium
    TrainAttacker,

    /// Decide whether a candidate is a beneficial deviation
    CheckDeviation,

    /// Sample beneficial candidates against the whole opponent pool
    ExpandColumns,

    /// Register beneficial candidates in the strategy name lists
    AppendStrategyNames,

    /// Fold the new payoffs into the game payoff matrix
    IngestNewData,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 10] = [
        Stage::ComputeEquilibrium,
        Stage::ExportStrategies,
        Stage::UpdateOpponentStrategies,
        Stage::SamplePayoffs,
        Stage::TrainDefender,
        Stage::TrainAttacker,
        Stage::CheckDeviation,
        Stage::ExpandColumns,
        Stage::AppendStrategyNames,
        Stage::IngestNewData,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::ComputeEquilibrium => "compute_equilibrium",
            Stage::ExportStrategies => "export_strategies",
            Stage::UpdateOpponentStrategies => "update_opponent_strategies",
            Stage::SamplePayoffs => "sample_payoffs",
            Stage::TrainDefender => "train_defender",
            Stage::TrainAttacker => "train_attacker",
            Stage::CheckDeviation => "check_deviation",
            Stage::ExpandColumns => "expand_columns",
            Stage::AppendStrategyNames => "append_strategy_names",
            Stage::IngestNewData => "ingest_new_data",
        }
    }

    /// Get the script that implements the stage by default.
    pub fn default_script(&self) -> &'static str {
        match self {
            Stage::ComputeEquilibrium => "gambit_analyze.py",
            Stage::ExportStrategies => "create_tsv_files.py",
            Stage::UpdateOpponentStrategies => "update_opponent_strats.py",
            Stage::SamplePayoffs => "get_both_payoffs_from_game.py",
            Stage::TrainDefender => "train_test_def.py",
            Stage::TrainAttacker => "train_test_att.py",
            Stage::CheckDeviation => "check_if_beneficial.py",
            Stage::ExpandColumns => "generate_new_cols.py",
            Stage::AppendStrategyNames => "append_net_names.py",
            Stage::IngestNewData => "add_new_data.py",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for one collaborator stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Script handed to the interpreter (first positional argument).
    pub script: String,

    /// Interpreter override for this stage only.
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Timeout in seconds (0 = wait indefinitely).
    #[serde(default)]
    pub timeout_secs: u64,
}

impl StageConfig {
    /// Create a stage configuration from the stage's default script.
    pub fn from_stage(stage: Stage) -> Self {
        Self {
            script: stage.default_script().to_string(),
            interpreter: None,
            timeout_secs: 0,
        }
    }

    /// Create a custom stage configuration.
    pub fn custom(script: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            script: script.into(),
            interpreter: None,
            timeout_secs,
        }
    }

    /// Run this stage with a different interpreter.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_are_unique() {
        let names: std::collections::HashSet<_> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), Stage::ALL.len());
    }

    #[test]
    fn test_stage_order_is_pipeline_order() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
        assert_eq!(Stage::ALL[0], Stage::ComputeEquilibrium);
        assert_eq!(Stage::ALL[9], Stage::IngestNewData);
    }

    #[test]
    fn test_stage_default_scripts() {
        assert_eq!(Stage::ComputeEquilibrium.default_script(), "gambit_analyze.py");
        assert_eq!(Stage::TrainDefender.default_script(), "train_test_def.py");
        assert_eq!(Stage::TrainAttacker.default_script(), "train_test_att.py");
        assert_eq!(Stage::IngestNewData.default_script(), "add_new_data.py");
    }

    #[test]
    fn test_stage_config_from_stage() {
        let config = StageConfig::from_stage(Stage::SamplePayoffs);
        assert_eq!(config.script, "get_both_payoffs_from_game.py");
        assert_eq!(config.timeout_secs, 0);
        assert!(config.interpreter.is_none());
    }

    #[test]
    fn test_stage_config_custom_with_interpreter() {
        let config = StageConfig::custom("solve.sh", 60).with_interpreter("bash");
        assert_eq!(config.script, "solve.sh");
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.interpreter.as_deref(), Some("bash"));
    }
}
