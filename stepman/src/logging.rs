//! Diagnostic tracing for the `stepman` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left to
//! the binary so embedders keep control of their own output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a compact stderr subscriber filtered by `RUST_LOG` (default `info`).
///
/// ```bash
/// RUST_LOG=stepman=debug stepman activate script@1
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
