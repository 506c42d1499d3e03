//! Diagnostic tracing for the conductor CLI.
//!
//! Task records and prompt artifacts are the product output. Tracing goes to
//! stderr only and is never persisted.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber. Call once, from `main`.
///
/// Reads `RUST_LOG`; defaults to `info` so each dispatch is visible.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=debug conductor run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_installs_global_subscriber() {
        super::init();
        assert!(tracing::dispatcher::has_been_set());
    }
}
