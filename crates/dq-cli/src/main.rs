//! dq-runner - double-oracle training loop
//!
//! Runs epochs of equilibrium computation, concurrent best-response training
//! and strategy-pool expansion until neither player finds a beneficial
//! deviation or `max_new_rounds` is spent.
//!
//! Every stage is an external script run inside `--workdir`. Scripts,
//! interpreters, timeouts, lock directory and port range can be overridden
//! with a TOML file passed through `--config`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dq_core::{
    ArtifactLayout, EpochRunner, LoopOutcome, Orchestrator, OrchestratorConfig,
    ProcessCollaborator, ProcessDeviationOracle, RoundBudget, RunParams,
};
use dq_state::{FsLockStore, RunIdentifier};
use tracing::{debug, Level};

mod telemetry;

#[derive(Parser, Debug)]
#[command(name = "dq-runner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Double-oracle epoch orchestrator", long_about = None)]
struct Cli {
    /// Game identifier (reads game_<n>.json)
    game_number: u32,

    /// Epoch to start from
    cur_epoch: u32,

    /// Namespace of the exported strategy tables
    env_short_name_tsv: String,

    /// Namespace of payoff files and strategy name lists
    env_short_name_payoffs: String,

    env_name_def_net: String,

    env_name_att_net: String,

    env_name_both: String,

    graph_name: String,

    /// Environment where the attacker trains against the defender mixture
    env_name_vs_mixed_def: String,

    /// Environment where the defender trains against the attacker mixture
    env_name_vs_mixed_att: String,

    /// Samples per new payoff-matrix column
    new_col_count: u32,

    def_pkl_prefix: String,

    att_pkl_prefix: String,

    /// Lock and port namespace of this run
    #[arg(value_parser = parse_run_id)]
    port_lock_name: RunIdentifier,

    max_timesteps_def: u64,

    max_timesteps_att: u64,

    /// `None` for no limit, or the number of new rounds to run
    #[arg(value_parser = parse_budget)]
    max_new_rounds: RoundBudget,

    /// TOML file overriding scripts, locks and ports
    #[arg(long, env = "DQ_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the seed inputs and collaborator scripts
    #[arg(long, env = "DQ_WORKDIR", default_value = ".")]
    workdir: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON outcome
    #[arg(long)]
    json: bool,
}

fn parse_run_id(raw: &str) -> std::result::Result<RunIdentifier, String> {
    raw.parse().map_err(|e: dq_state::LockError| e.to_string())
}

fn parse_budget(raw: &str) -> std::result::Result<RoundBudget, String> {
    raw.parse().map_err(|e: dq_core::OrchestratorError| e.to_string())
}

impl Cli {
    fn run_params(&self) -> RunParams {
        RunParams {
            game: self.game_number,
            start_epoch: self.cur_epoch,
            tsv_name: self.env_short_name_tsv.clone(),
            payoffs_name: self.env_short_name_payoffs.clone(),
            def_net_env: self.env_name_def_net.clone(),
            att_net_env: self.env_name_att_net.clone(),
            both_env: self.env_name_both.clone(),
            graph_name: self.graph_name.clone(),
            vs_mixed_def_env: self.env_name_vs_mixed_def.clone(),
            vs_mixed_att_env: self.env_name_vs_mixed_att.clone(),
            new_col_count: self.new_col_count,
            def_pkl_prefix: self.def_pkl_prefix.clone(),
            att_pkl_prefix: self.att_pkl_prefix.clone(),
            run_id: self.port_lock_name.clone(),
            def_train_steps: self.max_timesteps_def,
            att_train_steps: self.max_timesteps_att,
            max_new_rounds: self.max_new_rounds,
        }
    }
}

async fn run(cli: &Cli) -> Result<LoopOutcome> {
    let config = OrchestratorConfig::load(cli.config.as_deref())
        .context("Failed to load orchestrator config")?;
    debug!(?config, "loaded configuration");

    let workdir = cli.workdir.clone();
    let locks = FsLockStore::new(config.lock_dir(&workdir));

    let runner = EpochRunner::new(
        cli.run_params(),
        ArtifactLayout::new(&workdir),
        Arc::new(ProcessCollaborator::new(config.clone(), &workdir)),
        Arc::new(ProcessDeviationOracle::new(config.clone(), &workdir)),
        Arc::new(locks),
    )
    .context("Invalid run parameters")?
    .with_ports(config.ports)
    .context("Invalid port range")?
    .with_poll(config.locks.poll);

    Orchestrator::new(runner)
        .run()
        .await
        .context("Double-oracle run failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let outcome = run(&cli).await?;
    if cli.json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        println!("{outcome}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGS: [&str; 18] = [
        "dq-runner",
        "3013",
        "17",
        "sl29_randNoAndB",
        "sl29",
        "DepgraphJava29N-v0",
        "DepgraphJavaEnvAtt29N-v0",
        "DepgraphJavaEnvBoth29N-v0",
        "SepLayerGraph0_noAnd_B.json",
        "DepgraphJavaEnvVsMixedDef29N-v0",
        "DepgraphJavaEnvVsMixedAtt29N-v0",
        "400",
        "dg_sl29_dq_mlp_rand_epoch",
        "dg_sl29_dq_mlp_rand_epoch",
        "s29",
        "700000",
        "700000",
        "None",
    ];

    fn args_with(budget: &str) -> Vec<String> {
        let mut args: Vec<String> = ARGS.iter().map(|s| s.to_string()).collect();
        args[17] = budget.to_string();
        args
    }

    #[test]
    fn test_positional_arguments_map_to_params() {
        let cli = Cli::try_parse_from(ARGS).unwrap();
        let params = cli.run_params();
        assert_eq!(params.game, 3013);
        assert_eq!(params.start_epoch, 17);
        assert_eq!(params.payoffs_name, "sl29");
        assert_eq!(params.vs_mixed_att_env, "DepgraphJavaEnvVsMixedAtt29N-v0");
        assert_eq!(params.run_id.as_str(), "s29");
        assert_eq!(params.max_new_rounds, RoundBudget::Unbounded);
        assert!(params.validate().is_ok());
        assert_eq!(cli.workdir, PathBuf::from("."));
    }

    #[test]
    fn test_integer_budget() {
        let cli = Cli::try_parse_from(args_with("3")).unwrap();
        assert_eq!(cli.max_new_rounds, RoundBudget::Bounded(3));
    }

    #[test]
    fn test_malformed_budget_is_rejected() {
        assert!(Cli::try_parse_from(args_with("forever")).is_err());
        assert!(Cli::try_parse_from(args_with("-2")).is_err());
    }

    #[test]
    fn test_missing_positional_is_rejected() {
        assert!(Cli::try_parse_from(ARGS[..17].to_vec()).is_err());
    }

    #[test]
    fn test_bad_lock_name_is_rejected() {
        let mut args = args_with("None");
        args[14] = "a/b".to_string();
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_with("1");
        args.push("--workdir".to_string());
        args.push(dir.path().display().to_string());
        let cli = Cli::try_parse_from(args).unwrap();

        let err = run(&cli).await.unwrap_err();
        assert!(format!("{err:#}").contains("missing directory"));
        // a rejected start leaves the workdir as it found it
        assert!(!dir.path().join("locks").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_converges_with_stub_scripts() {
        let dir = tempfile::tempdir().unwrap();
        dq_core::fakes::scaffold_workdir(dir.path(), 3013, "sl29").unwrap();
        std::fs::write(dir.path().join("check.sh"), "echo False\n").unwrap();
        let config = dir.path().join("dq.toml");
        std::fs::write(
            &config,
            r#"
            interpreter = "true"

            [stages.check_deviation]
            script = "check.sh"
            interpreter = "sh"
            "#,
        )
        .unwrap();

        let mut args = args_with("1");
        args.extend([
            "--workdir".to_string(),
            dir.path().display().to_string(),
            "--config".to_string(),
            config.display().to_string(),
        ]);
        let cli = Cli::try_parse_from(args).unwrap();

        let outcome = run(&cli).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Converged { epoch: 17 });
        assert!(dir.path().join("locks").join("def_train_port_s29.txt").exists());
    }
}
