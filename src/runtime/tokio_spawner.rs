//! [`Spawn`] on a tokio runtime.

use std::future::Future;

use tokio::runtime::{Handle, TryCurrentError};

use crate::core::Spawn;

/// Runs detached control-plane work (default job seeding) on a tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Spawner bound to `handle`.
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Spawn for TokioSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(fut));
    }
}
