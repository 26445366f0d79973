//! Collaborator stages as child processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dq_state::Player;
use tokio::process::Command;
use tracing::debug;

use crate::collaborator::{Collaborator, DeviationOracle, ExitStatus, Invocation};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::stage::Stage;

/// Result of one stage process.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Stage that ran.
    pub stage: Stage,

    /// How the process ended.
    pub status: ExitStatus,

    /// Captured stdout (empty unless capture was requested).
    pub stdout: String,

    /// Wall-clock start.
    pub started_at: DateTime<Utc>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageOutcome {
    /// Whether this stage passed (exit code 0, no timeout).
    pub fn passed(&self) -> bool {
        self.status.is_success()
    }
}

/// Resolved command line for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: String,
    pub script: String,
    pub timeout_secs: u64,
}

impl StageCommand {
    pub fn resolve(config: &OrchestratorConfig, stage: Stage) -> Self {
        let stage_config = config.stage(stage);
        Self {
            program: config.interpreter_for(stage),
            script: stage_config.script,
            timeout_secs: stage_config.timeout_secs,
        }
    }
}

/// Execute a single stage and return the outcome.
///
/// stdout is inherited unless `capture` is set; stderr is always inherited so
/// long trainings keep printing their progress. With a non-zero timeout the
/// stage runs in its own process group, the whole group is killed once the
/// timeout expires and the status is `TimedOut`.
pub async fn execute_stage(
    command: &StageCommand,
    invocation: &Invocation,
    workdir: &Path,
    capture: bool,
) -> OrchestratorResult<StageOutcome> {
    let started_at = Utc::now();
    let start = Instant::now();
    let stage = invocation.stage;

    let mut cmd = Command::new(&command.program);
    cmd.arg(&command.script)
        .args(&invocation.args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(if capture { Stdio::piped() } else { Stdio::inherit() })
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    // Untimed stages stay in our group so Ctrl-C still reaches them.
    #[cfg(unix)]
    {
        if command.timeout_secs > 0 {
            cmd.process_group(0);
        }
    }
    let child = cmd
        .spawn()
        .map_err(|source| OrchestratorError::Spawn { stage, source })?;
    let pid = child.id();

    debug!(
        stage = %stage,
        program = %command.program,
        script = %command.script,
        pid = ?pid,
        "spawned stage"
    );

    let output = if command.timeout_secs > 0 {
        match tokio::time::timeout(
            Duration::from_secs(command.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(output) => Some(output?),
            Err(_) => {
                // the interpreter is the group leader; its children go too
                if let Some(pid) = pid {
                    kill_process_group(stage, pid);
                }
                None
            }
        }
    } else {
        Some(child.wait_with_output().await?)
    };

    let (status, stdout) = match output {
        Some(output) => (
            ExitStatus::from(output.status),
            String::from_utf8_lossy(&output.stdout).to_string(),
        ),
        None => (ExitStatus::TimedOut, String::new()),
    };

    Ok(StageOutcome {
        stage,
        status,
        stdout,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(unix)]
fn kill_process_group(stage: Stage, pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg takes no pointers; a stale group id only yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(stage = %stage, pgid, error = %err, "failed to kill stage process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_stage: Stage, _pgid: u32) {}

/// Runs each stage as `<interpreter> <script> <args..>` inside the working
/// directory.
pub struct ProcessCollaborator {
    config: OrchestratorConfig,
    workdir: PathBuf,
}

impl ProcessCollaborator {
    pub fn new(config: OrchestratorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workdir: workdir.into(),
        }
    }

    /// Run and keep the full outcome, stdout optionally captured.
    pub async fn execute(
        &self,
        invocation: &Invocation,
        capture: bool,
    ) -> OrchestratorResult<StageOutcome> {
        let command = StageCommand::resolve(&self.config, invocation.stage);
        execute_stage(&command, invocation, &self.workdir, capture).await
    }
}

#[async_trait]
impl Collaborator for ProcessCollaborator {
    async fn run(&self, invocation: &Invocation) -> OrchestratorResult<ExitStatus> {
        let outcome = self.execute(invocation, false).await?;
        debug!(
            stage = %outcome.stage,
            status = %outcome.status,
            started_at = %outcome.started_at,
            duration_ms = outcome.duration_ms,
            "stage process exited"
        );
        Ok(outcome.status)
    }
}

/// Deviation oracle backed by the `check_deviation` stage script.
///
/// The script prints its verdict as the last non-empty line of stdout.
pub struct ProcessDeviationOracle {
    processes: ProcessCollaborator,
}

impl ProcessDeviationOracle {
    pub fn new(config: OrchestratorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            processes: ProcessCollaborator::new(config, workdir),
        }
    }
}

#[async_trait]
impl DeviationOracle for ProcessDeviationOracle {
    async fn is_beneficial(
        &self,
        player: Player,
        invocation: &Invocation,
    ) -> OrchestratorResult<bool> {
        let outcome = self.processes.execute(invocation, true).await?;
        if !outcome.passed() {
            return Err(OrchestratorError::StageFailed {
                stage: outcome.stage,
                status: outcome.status,
            });
        }
        parse_verdict(&outcome.stdout).ok_or_else(|| OrchestratorError::InvalidOracleOutput {
            player,
            output: outcome.stdout.trim().to_string(),
        })
    }
}

/// Read a boolean verdict from the last non-empty line of `stdout`.
pub fn parse_verdict(stdout: &str) -> Option<bool> {
    let last = stdout.lines().map(str::trim).rev().find(|l| !l.is_empty())?;
    match last {
        "True" | "true" | "1" => Some(true),
        "False" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_reads_last_line() {
        assert_eq!(parse_verdict("sampling...\nTrue\n"), Some(true));
        assert_eq!(parse_verdict("False"), Some(false));
        assert_eq!(parse_verdict("mean 0.3\n1\n\n"), Some(true));
        assert_eq!(parse_verdict("0"), Some(false));
    }

    #[test]
    fn test_parse_verdict_rejects_noise() {
        assert_eq!(parse_verdict(""), None);
        assert_eq!(parse_verdict("\n  \n"), None);
        assert_eq!(parse_verdict("True\nmaybe"), None);
    }

    #[test]
    fn test_stage_outcome_passed() {
        let outcome = StageOutcome {
            stage: Stage::SamplePayoffs,
            status: ExitStatus::Success,
            stdout: String::new(),
            started_at: Utc::now(),
            duration_ms: 10,
        };
        assert!(outcome.passed());

        let failed = StageOutcome {
            status: ExitStatus::Failed(2),
            ..outcome
        };
        assert!(!failed.passed());
    }

    #[test]
    fn test_stage_command_resolves_overrides() {
        let config = OrchestratorConfig::from_toml(
            r#"
            interpreter = "python3.8"

            [stages.sample_payoffs]
            script = "payoffs.py"
            timeout_secs = 90
            "#,
        )
        .unwrap();
        let command = StageCommand::resolve(&config, Stage::SamplePayoffs);
        assert_eq!(command.program, "python3.8");
        assert_eq!(command.script, "payoffs.py");
        assert_eq!(command.timeout_secs, 90);

        let default = StageCommand::resolve(&config, Stage::ComputeEquilibrium);
        assert_eq!(default.script, "gambit_analyze.py");
        assert_eq!(default.timeout_secs, 0);
    }
}
