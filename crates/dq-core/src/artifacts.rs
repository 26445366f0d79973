//! Artifact naming and the startup precondition check.
//!
//! The orchestrator never parses collaborator output files. It only asks
//! whether they exist: seed inputs before the first epoch, and the result
//! file of the next epoch before starting a round.

use std::path::PathBuf;

use crate::error::{OrchestratorError, OrchestratorResult, ResourceKind};

/// Working directories every collaborator expects to find.
pub const REQUIRED_DIRS: [&str; 8] = [
    "depgraphpy4jattvseither",
    "depgraphpy4jdefvseither",
    "depgraphpy4jboth",
    "dg4jattcli",
    "dg4jdefcli",
    "dg4jnonetcli",
    "graphs",
    "simspecs",
];

/// Seed files for `game` under the payoff namespace `payoffs`.
pub fn required_files(game: u32, payoffs: &str) -> Vec<String> {
    vec![
        "defaults.json".to_string(),
        format!("game_{game}.json"),
        format!("attNetStrings_{payoffs}.txt"),
        format!("defNetStrings_{payoffs}.txt"),
        format!("attStratStrings_{payoffs}.txt"),
        format!("defStratStrings_{payoffs}.txt"),
        format!("oldAttNetNames_{payoffs}.txt"),
        format!("oldDefNetNames_{payoffs}.txt"),
    ]
}

/// Deterministic artifact paths under one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Game object written by the data ingester once `epoch` is complete.
    pub fn result_file(&self, game: u32, epoch: u32, payoffs: &str) -> PathBuf {
        self.root.join(format!("game_{game}_epoch{epoch}_{payoffs}.json"))
    }

    /// Fail with the first missing directory, then the first missing file.
    pub fn check_preconditions(&self, game: u32, payoffs: &str) -> OrchestratorResult<()> {
        for dir in REQUIRED_DIRS {
            let path = self.root.join(dir);
            if !path.is_dir() {
                return Err(OrchestratorError::MissingResource {
                    kind: ResourceKind::Directory,
                    path,
                });
            }
        }
        for file in required_files(game, payoffs) {
            let path = self.root.join(file);
            if !path.exists() {
                return Err(OrchestratorError::MissingResource {
                    kind: ResourceKind::File,
                    path,
                });
            }
        }
        Ok(())
    }
}
