//! Diagnostic logging setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Map the host's verbosity (`verb`) to a log level.
pub fn level_for_verbosity(verb: u32) -> &'static str {
    match verb {
        0 => "warn",
        1..=4 => "info",
        5..=6 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides `level`. Returns `false` if a subscriber was already
/// installed, which leaves the existing one in place.
pub fn init(level: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .is_ok()
}
