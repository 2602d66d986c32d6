//! Diagnostic logging setup.
//!
//! Diagnostics go to stderr through `tracing`; stdout carries command output only.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ZION_LOG";

fn filter_for(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            EnvFilter::try_new(format!("zion={}", default_level))
                .unwrap_or_else(|_| EnvFilter::new("zion=info"))
        })
}

/// Install the process-wide subscriber. Safe to call more than once.
pub fn init(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(default_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
