use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize logging to stderr.
///
/// If RUST_LOG is not set, a default is installed that keeps dependency
/// chatter (HTTP connection pools, TLS) quiet.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var(
                    "RUST_LOG",
                    "debug,hyper_util=info,reqwest::connect=info,rustls=info",
                );
            } else {
                std::env::set_var("RUST_LOG", "info,hyper_util=warn,rustls=warn");
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::debug!(
        "Logging initialized (RUST_LOG={})",
        std::env::var("RUST_LOG").unwrap_or_default()
    );
}
