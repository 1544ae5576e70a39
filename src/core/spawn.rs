//! Abstraction for spawning background work on a runtime.

use std::future::Future;

/// Spawns detached futures (job seeding, lifecycle workers).
pub trait Spawn {
    /// Spawn an async task that runs to completion in the background.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
