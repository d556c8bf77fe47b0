//! Tracing subscriber setup for a bridge loaded into a host process.

use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;

/// Crates whose events follow [`BridgeConfig::log_level`].
const BRIDGE_TARGETS: [&str; 3] = ["dsbridge_types", "dsbridge_engine", "dsbridge_runtime"];

/// Events from anything else linked into the host stay at this level.
const FOREIGN_LEVEL: &str = "warn";

/// `EnvFilter` directives for `config`: bridge crates at the configured
/// level, everything else at `warn`.
#[must_use]
pub fn filter_directives(config: &BridgeConfig) -> String {
    let mut directives = String::from(FOREIGN_LEVEL);
    for target in BRIDGE_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push('=');
        directives.push_str(&config.log_level);
    }
    directives
}

/// Install the global fmt subscriber described by `config`. `RUST_LOG` wins
/// over the configured directives.
///
/// Returns `false` when `install_logging` is off or a subscriber was already
/// installed, e.g. by the host process or an earlier init.
pub fn init(config: &BridgeConfig) -> bool {
    if !config.install_logging {
        return false;
    }
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.log_targets)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
