//! Tracing setup for the `pipeline` binary and embedders.
//!
//! Tool output streamed while a command runs is logged under the
//! `pipeline::interface` target, so `RUST_LOG=pipeline::interface=off`
//! silences it without hiding scheduling events.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a stderr subscriber with compact formatting.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (a filter directive
/// such as `info` or `pipeline=debug`) applies.
///
/// # Example
/// ```bash
/// RUST_LOG=pipeline=debug pipeline run preproc.toml
/// ```
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
