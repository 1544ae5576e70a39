//! Tracing setup for processes embedding the control plane.

use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "prometheus_control_plane=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or [`DEFAULT_FILTER`].
///
/// No-op when a global subscriber is already installed.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_FILTER);
}

/// [`init_tracing`] with an explicit fallback filter.
pub fn init_tracing_with(fallback: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
