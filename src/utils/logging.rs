//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "hls_batch_downloader=info";

/// Install the global subscriber. `RUST_LOG` wins over the default filter.
/// Calling this more than once is harmless.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_FILTER);
}

/// Like [`init_tracing`] but with an explicit fallback filter, e.g. from configuration
pub fn init_tracing_with(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
