//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the product output.
//! - **Run events (`events`)**: the cycle-by-cycle narrative printed to stdout
//!   and the JSON summary. Unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "fixloop=debug" } else { "warn" }
}

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to [`default_directive`].
///
/// # Example
/// ```bash
/// RUST_LOG=fixloop=trace fixloop run
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_enables_crate_debug() {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "fixloop=debug");
    }
}
