//! Logging setup with segment prefixes.
//!
//! Stowage emits `tracing` events and never installs a subscriber on its own;
//! applications call [`init`] (or bring their own subscriber).

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with stowage defaults.
///
/// Sets up tracing-subscriber with:
/// - Environment filter (RUST_LOG)
/// - Compact format suitable for terminal output
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
///
/// Panics if a global subscriber is already installed; use [`try_init`] where
/// that can happen (tests).
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Like [`init_with_filter`], but returns `false` instead of panicking when a
/// subscriber is already set.
pub fn try_init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_test_writer())
        .try_init()
        .is_ok()
}

/// Segment prefixes for log messages.
pub mod prefix {
    /// Database operations prefix
    pub const DB: &str = "⊔";
}
