//! Tracing subscriber setup.
//!
//! Every function honours `RUST_LOG` when it is set and falls back to the
//! given level otherwise:
//!
//! ```bash
//! RUST_LOG=etude_core=trace etude --port 9006
//! ```
//!
//! Call exactly one of these, once, at process start. A second call panics
//! because the global subscriber is already set.

use crate::config::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Plain text logs at `info`.
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Plain text logs at `level` (`trace`, `debug`, `info`, `warn`, `error`).
pub fn init_logging_with_level(level: &str) {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// One JSON object per event, for log shippers.
pub fn init_logging_json(level: &str) {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Pick the format and level from `config`.
pub fn init_from_config(config: &Config) {
    if config.is_json_logs() {
        init_logging_json(&config.log_level);
    } else {
        init_logging_with_level(&config.log_level);
    }
}
