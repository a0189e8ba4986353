//! Logging setup based on `tracing-subscriber`.
//!
//! Library code only emits `tracing` events; the application decides where
//! they go by calling [`init`] once at startup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global fmt subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// Install the global fmt subscriber unless one is already present.
///
/// Returns `true` if this call installed the subscriber. Useful in tests and
/// demos where several entry points may race to set up logging.
pub fn try_init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init()
        .is_ok()
}
