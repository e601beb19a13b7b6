//! Diagnostics for the simrun binary.
//!
//! Tracing output goes to stderr. Stdout carries only command results (`list`
//! names, the final `run` status) so it stays scriptable; per-run errors are
//! printed to stderr and optionally written to a summary file.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,simrun=debug" } else { "warn" }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `--verbose`, e.g. `RUST_LOG=simrun::gate=debug`.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
