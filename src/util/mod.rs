//! Shared utilities.

pub mod backoff;
pub mod clock;
pub mod telemetry;

pub use backoff::Backoff;
pub use clock::*;
pub use telemetry::*;
