//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber with the default `info` filter.
///
/// `RUST_LOG` overrides the default. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    init_with_filter("info");
}

/// Install the global tracing subscriber with explicit default directives.
pub fn init_with_filter(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
