//! Scripted collaborators (testing only)
//!
//! `ScriptedCollaborator` and `ScriptedOracle` stand in for the external
//! stage scripts. Both write into a shared [`Journal`] so tests can assert on
//! the exact interleaving of starts, finishes and deviation checks.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dq_state::Player;

use crate::artifacts::{required_files, ArtifactLayout, REQUIRED_DIRS};
use crate::collaborator::{Collaborator, DeviationOracle, ExitStatus, Invocation};
use crate::error::OrchestratorResult;
use crate::stage::Stage;

/// One observable event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Started(Invocation),
    Finished(Stage),
    Oracle(Player),
}

/// Ordered, shared record of collaborator activity.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, entry: JournalEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Stages in the order they were started.
    pub fn started(&self) -> Vec<Stage> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Started(inv) => Some(inv.stage),
                _ => None,
            })
            .collect()
    }

    /// Invocations handed out for `stage`, in order.
    pub fn invocations(&self, stage: Stage) -> Vec<Invocation> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Started(inv) if inv.stage == stage => Some(inv),
                _ => None,
            })
            .collect()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &JournalEntry) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Collaborator that succeeds unless told otherwise.
///
/// - `fail(stage, status)`: every run of `stage` returns `status`
/// - `delay(stage, d)`: every run of `stage` sleeps `d` first
/// - `ingesting_into(layout)`: `IngestNewData` writes the result artifact for
///   the epoch it was given, the way the real ingester does
pub struct ScriptedCollaborator {
    journal: Arc<Journal>,
    statuses: HashMap<Stage, ExitStatus>,
    delays: HashMap<Stage, Duration>,
    ingest_layout: Option<ArtifactLayout>,
}

impl ScriptedCollaborator {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            statuses: HashMap::new(),
            delays: HashMap::new(),
            ingest_layout: None,
        }
    }

    pub fn fail(mut self, stage: Stage, status: ExitStatus) -> Self {
        self.statuses.insert(stage, status);
        self
    }

    pub fn delay(mut self, stage: Stage, delay: Duration) -> Self {
        self.delays.insert(stage, delay);
        self
    }

    pub fn ingesting_into(mut self, layout: ArtifactLayout) -> Self {
        self.ingest_layout = Some(layout);
        self
    }

    fn write_result_artifact(&self, invocation: &Invocation) -> OrchestratorResult<()> {
        let Some(layout) = &self.ingest_layout else {
            return Ok(());
        };
        // add_new_data.py <game> <payoffs> <epoch>
        if let [game, payoffs, epoch] = invocation.args.as_slice() {
            if let (Ok(game), Ok(epoch)) = (game.parse::<u32>(), epoch.parse::<u32>()) {
                std::fs::write(layout.result_file(game, epoch, payoffs), b"{}")?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn run(&self, invocation: &Invocation) -> OrchestratorResult<ExitStatus> {
        let stage = invocation.stage;
        self.journal.record(JournalEntry::Started(invocation.clone()));
        if let Some(delay) = self.delays.get(&stage) {
            tokio::time::sleep(*delay).await;
        }
        let status = self
            .statuses
            .get(&stage)
            .copied()
            .unwrap_or(ExitStatus::Success);
        if stage == Stage::IngestNewData && status.is_success() {
            self.write_result_artifact(invocation)?;
        }
        self.journal.record(JournalEntry::Finished(stage));
        Ok(status)
    }
}

/// Oracle answering from a per-round script. Rounds past the script answer
/// `false` for both players.
pub struct ScriptedOracle {
    journal: Arc<Journal>,
    answers: Mutex<HashMap<Player, VecDeque<bool>>>,
}

impl ScriptedOracle {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            answers: Mutex::new(HashMap::new()),
        }
    }

    /// Append one round's answers.
    pub fn round(self, defender: bool, attacker: bool) -> Self {
        {
            let mut answers = self.answers.lock().unwrap();
            answers.entry(Player::Defender).or_default().push_back(defender);
            answers.entry(Player::Attacker).or_default().push_back(attacker);
        }
        self
    }
}

#[async_trait]
impl DeviationOracle for ScriptedOracle {
    async fn is_beneficial(
        &self,
        player: Player,
        invocation: &Invocation,
    ) -> OrchestratorResult<bool> {
        self.journal.record(JournalEntry::Started(invocation.clone()));
        self.journal.record(JournalEntry::Oracle(player));
        let answer = self
            .answers
            .lock()
            .unwrap()
            .get_mut(&player)
            .and_then(VecDeque::pop_front)
            .unwrap_or(false);
        Ok(answer)
    }
}

/// Create every required directory and an empty seed file for `game`.
pub fn scaffold_workdir(root: &Path, game: u32, payoffs: &str) -> std::io::Result<()> {
    for dir in REQUIRED_DIRS {
        std::fs::create_dir_all(root.join(dir))?;
    }
    for file in required_files(game, payoffs) {
        std::fs::write(root.join(file), b"")?;
    }
    Ok(())
}
