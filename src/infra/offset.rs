//! Ingestion offset stores.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use crate::core::error::{ControlPlaneError, Result};
use crate::core::router::OffsetStore;

/// Offset kept in memory; lost on restart.
#[derive(Default)]
pub struct InMemoryOffsetStore {
    offset: AtomicI64,
}

impl InMemoryOffsetStore {
    /// Store starting at 0.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn load(&self) -> Result<i64> {
        Ok(self.offset.load(Ordering::SeqCst))
    }

    async fn save(&self, offset: i64) -> Result<()> {
        self.offset.store(offset, Ordering::SeqCst);
        Ok(())
    }
}

/// Offset persisted as a decimal number in a single file.
pub struct FileOffsetStore {
    path: PathBuf,
}

impl FileOffsetStore {
    /// Store backed by `path`; the file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn load(&self) -> Result<i64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| ControlPlaneError::Backend(e.to_string()))?;
        raw.trim()
            .parse()
            .map_err(|e| ControlPlaneError::Backend(format!("corrupt offset file: {e}")))
    }

    async fn save(&self, offset: i64) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, offset.to_string()).map_err(|e| ControlPlaneError::Backend(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| ControlPlaneError::Backend(e.to_string()))
    }
}
