//! Operator logging
//!
//! Log lines are for operators; consumers use the event stream.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber
///
/// Honors `RUST_LOG`, falling back to `default_directive` (usually `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init(default_directive: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
