//! Logging initialization shared by the blockfs binaries.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. The `RUST_LOG` environment variable
/// wins over the configured level when set.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
