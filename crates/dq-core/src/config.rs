//! Orchestrator configuration.
//!
//! Everything here has a default matching the stock collaborator scripts, so
//! the config file is optional. A TOML file overrides individual pieces:
//!
//! ```toml
//! interpreter = "python3"
//!
//! [stages.train_defender]
//! script = "train_test_def.py"
//! timeout_secs = 172800
//!
//! [locks]
//! dir = "locks"
//!
//! [locks.poll]
//! initial_ms = 500
//! max_ms = 30000
//!
//! [ports]
//! min = 25335
//! max = 26335
//! stride = 4
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dq_state::{PollPolicy, PortRange};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::stage::{Stage, StageConfig};

/// Where lock files live and how waiting for them behaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Lock directory, relative to the working directory unless absolute.
    pub dir: PathBuf,
    pub poll: PollPolicy,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("locks"),
            poll: PollPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Program that runs collaborator scripts.
    pub interpreter: String,
    /// Per-stage overrides keyed by stage name; stages not listed use their
    /// default script.
    pub stages: HashMap<String, StageConfig>,
    pub locks: LockSettings,
    pub ports: PortRange,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            stages: HashMap::new(),
            locks: LockSettings::default(),
            ports: PortRange::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a TOML file, or return the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> OrchestratorResult<Self> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    OrchestratorError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&raw)?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> OrchestratorResult<Self> {
        toml::from_str(raw).map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.interpreter.trim().is_empty() {
            return Err(OrchestratorError::Config("interpreter must not be empty".into()));
        }
        for (stage, config) in &self.stages {
            if !Stage::ALL.iter().any(|s| s.name() == stage.as_str()) {
                return Err(OrchestratorError::Config(format!("unknown stage {stage:?}")));
            }
            if config.script.trim().is_empty() {
                return Err(OrchestratorError::Config(format!(
                    "stage {stage} has an empty script"
                )));
            }
        }
        self.ports
            .validate()
            .map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Effective configuration for `stage`.
    pub fn stage(&self, stage: Stage) -> StageConfig {
        self.stages
            .get(stage.name())
            .cloned()
            .unwrap_or_else(|| StageConfig::from_stage(stage))
    }

    /// Program used to run `stage`.
    pub fn interpreter_for(&self, stage: Stage) -> String {
        self.stage(stage)
            .interpreter
            .unwrap_or_else(|| self.interpreter.clone())
    }

    /// Lock directory resolved against `workdir`.
    pub fn lock_dir(&self, workdir: &Path) -> PathBuf {
        if self.locks.dir.is_absolute() {
            self.locks.dir.clone()
        } else {
            workdir.join(&self.locks.dir)
        }
    }
}
