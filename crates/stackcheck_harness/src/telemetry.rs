//! Logging setup for test binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "stackcheck=info,warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a subscriber that writes through the test harness's captured
/// output. Safe to call from every test; returns `false` when a subscriber
/// was already installed.
pub fn init_test_logging() -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_test_writer())
        .with(env_filter())
        .try_init()
        .is_ok()
}

/// JSON lines on stdout, for CI log collectors.
pub fn init_json_logging() -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().json().with_current_span(true))
        .with(env_filter())
        .try_init()
        .is_ok()
}
