//! Tracing subscriber initialization for the daemon.
//!
//! Console output filtered by `RUST_LOG` when set, falling back to the
//! configured level. Libraries in the workspace only emit events; the
//! subscriber is installed exactly once, here.

use tracing_subscriber::EnvFilter;

/// Initialize the console subscriber. Call once at start-up, before any
/// `tracing` events are emitted.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
