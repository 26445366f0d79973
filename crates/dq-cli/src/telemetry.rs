//! Log setup for `dq-runner`.
//!
//! Log lines go to stderr so stdout carries only the final outcome, which
//! wrappers parse (plain text, or a JSON object with `--json`). Every line is
//! timestamped; a single round can run for days.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset: `level` for the orchestrator crates,
/// warnings only for everything else.
pub fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    EnvFilter::new(format!("warn,dq_core={level},dq_state={level},dq_runner={level}"))
}

/// Install the global subscriber. Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let base = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let layer = if json {
        base.json().boxed()
    } else {
        base.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .ok();
}
