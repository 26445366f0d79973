//! Process adapters driven by small shell scripts.
#![cfg(unix)]

use std::path::Path;

use dq_core::runner::{execute_stage, StageCommand};
use dq_core::{
    Collaborator, DeviationOracle, ExitStatus, Invocation, OrchestratorConfig,
    OrchestratorError, ProcessCollaborator, ProcessDeviationOracle, Stage, StageConfig,
};
use dq_state::Player;

fn write_script(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).unwrap();
}

fn shell_config(stage: Stage, script: &str, timeout_secs: u64) -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        interpreter: "sh".to_string(),
        ..OrchestratorConfig::default()
    };
    config
        .stages
        .insert(stage.name().to_string(), StageConfig::custom(script, timeout_secs));
    config
}

#[tokio::test]
async fn zero_exit_is_success() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "ok.sh", "exit 0\n");
    let collab =
        ProcessCollaborator::new(shell_config(Stage::SamplePayoffs, "ok.sh", 0), dir.path());

    let status = collab
        .run(&Invocation::new(Stage::SamplePayoffs))
        .await
        .unwrap();
    assert_eq!(status, ExitStatus::Success);
}

#[tokio::test]
async fn non_zero_exit_keeps_the_code() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "fail.sh", "exit 3\n");
    let collab =
        ProcessCollaborator::new(shell_config(Stage::IngestNewData, "fail.sh", 0), dir.path());

    let status = collab
        .run(&Invocation::new(Stage::IngestNewData))
        .await
        .unwrap();
    assert_eq!(status, ExitStatus::Failed(3));
}

#[tokio::test]
async fn arguments_and_working_directory_reach_the_script() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "record.sh", "echo \"$@\" > args.txt\n");
    let collab = ProcessCollaborator::new(
        shell_config(Stage::ComputeEquilibrium, "record.sh", 0),
        dir.path(),
    );

    let inv = Invocation::new(Stage::ComputeEquilibrium)
        .arg(3013)
        .arg(17)
        .arg("sl29");
    assert!(collab.run(&inv).await.unwrap().is_success());

    let recorded = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
    assert_eq!(recorded.trim(), "3013 17 sl29");
}

#[tokio::test]
async fn slow_stage_times_out() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "slow.sh", "sleep 30\n");
    let collab =
        ProcessCollaborator::new(shell_config(Stage::TrainDefender, "slow.sh", 1), dir.path());

    let status = collab
        .run(&Invocation::new(Stage::TrainDefender))
        .await
        .unwrap();
    assert_eq!(status, ExitStatus::TimedOut);
}

#[tokio::test]
async fn timeout_kills_the_stage_children_too() {
    let dir = tempfile::tempdir().unwrap();
    // the subshell is a separate process under the interpreter
    write_script(dir.path(), "spawns.sh", "(sleep 2; touch leftover)\n");
    let collab =
        ProcessCollaborator::new(shell_config(Stage::TrainAttacker, "spawns.sh", 1), dir.path());

    let status = collab
        .run(&Invocation::new(Stage::TrainAttacker))
        .await
        .unwrap();
    assert_eq!(status, ExitStatus::TimedOut);

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    assert!(!dir.path().join("leftover").exists());
}

#[tokio::test]
async fn missing_interpreter_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = OrchestratorConfig::default();
    config.stages.insert(
        Stage::ExportStrategies.name().to_string(),
        StageConfig::custom("x.py", 0).with_interpreter("/definitely/not/an/interpreter"),
    );
    let collab = ProcessCollaborator::new(config, dir.path());

    match collab.run(&Invocation::new(Stage::ExportStrategies)).await {
        Err(OrchestratorError::Spawn { stage, .. }) => assert_eq!(stage, Stage::ExportStrategies),
        other => panic!("expected Spawn, got {other:?}"),
    }
}

#[tokio::test]
async fn captured_stdout_is_kept_in_the_outcome() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "talk.sh", "echo hello\n");
    let config = shell_config(Stage::AppendStrategyNames, "talk.sh", 0);
    let command = StageCommand::resolve(&config, Stage::AppendStrategyNames);

    let outcome = execute_stage(
        &command,
        &Invocation::new(Stage::AppendStrategyNames),
        dir.path(),
        true,
    )
    .await
    .unwrap();
    assert!(outcome.passed());
    assert_eq!(outcome.stdout.trim(), "hello");
}

async fn oracle_with(body: &str) -> Result<bool, OrchestratorError> {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "check.sh", body);
    let oracle =
        ProcessDeviationOracle::new(shell_config(Stage::CheckDeviation, "check.sh", 0), dir.path());
    let inv = Invocation::new(Stage::CheckDeviation)
        .arg("sl29")
        .arg(18)
        .flag(true);
    oracle.is_beneficial(Player::Defender, &inv).await
}

#[tokio::test]
async fn oracle_reads_the_last_line() {
    assert!(oracle_with("echo 'mean payoff -12.5'\necho True\n").await.unwrap());
    assert!(!oracle_with("echo False\n").await.unwrap());
    assert!(oracle_with("echo 1\n").await.unwrap());
}

#[tokio::test]
async fn oracle_receives_the_player_flag() {
    assert!(oracle_with("[ \"$3\" = True ] && echo true || echo false\n")
        .await
        .unwrap());
}

#[tokio::test]
async fn unreadable_oracle_output_is_an_error() {
    match oracle_with("echo maybe\n").await {
        Err(OrchestratorError::InvalidOracleOutput { player, output }) => {
            assert_eq!(player, Player::Defender);
            assert_eq!(output, "maybe");
        }
        other => panic!("expected InvalidOracleOutput, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_oracle_is_a_stage_failure() {
    match oracle_with("echo True\nexit 2\n").await {
        Err(OrchestratorError::StageFailed { stage, status }) => {
            assert_eq!(stage, Stage::CheckDeviation);
            assert_eq!(status, ExitStatus::Failed(2));
        }
        other => panic!("expected StageFailed, got {other:?}"),
    }
}
