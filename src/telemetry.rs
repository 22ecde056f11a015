//! Logging setup for test binaries
//!
//! Plain `tracing` output to stderr. The harness logs resource lifecycle
//! changes at `info` and every poll iteration at `debug`, so
//! `RUST_LOG=kubetest=debug` shows exactly what a wait was looking at.
//!
//! # Example
//!
//! ```no_run
//! use kubetest::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default: info)
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        tracing::info!("logging initialised twice without panicking");
    }
}
