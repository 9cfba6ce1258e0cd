//! Shared tracing setup for the peerlink binaries and tests.

use std::{env::var, io};

use tracing::warn;
pub use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing at INFO unless `RUST_LOG` says otherwise
pub fn init() {
    init_with_level(LevelFilter::INFO);
}

/// Initialize tracing with `level` as the default directive.
///
/// Everything is written to stderr; stdout belongs to the supervisor
/// protocol. `RUST_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_with_level(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_filter(env_filter)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_writer(io::stderr)
            .with_filter(env_filter)
            .boxed(),
    };

    if let Err(error) = tracing_subscriber::registry().with(log_layer).try_init() {
        warn!("Tracing already initialized: {error}");
    }
}

/// Test-friendly subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
