//! Helper functions for logging

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// A `Once` instance to ensure that logging is only initialized once.
static LOGGING_INITIALIZED: Once = Once::new();

/// Helper function to setup logging for upstream crates.
///
/// Filtering follows `RUST_LOG`; `RUST_LOG_FORMAT=json` switches to json lines.
pub fn setup_logging() {
    LOGGING_INITIALIZED.call_once(|| {
        // an embedding binary may already have installed a subscriber
        let result = if std::env::var("RUST_LOG_FORMAT") == Ok("json".to_string()) {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .json()
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .try_init()
        };
        if let Err(e) = result {
            tracing::debug!("global subscriber already installed: {e}");
        }
    });
}
