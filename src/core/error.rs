//! Error types for control-plane operations.

use thiserror::Error;

use crate::core::gateway::{GatewayError, GatewayErrorCategory};

/// Errors produced by control-plane components.
///
/// Callers branch on [`ControlPlaneError::kind`] rather than on message text.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Bad schedule, timezone or other definition-time input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Quota, interval or rate limit exceeded.
    #[error("limit exceeded: {0}")]
    Limit(String),
    /// Dispatch to a tenant resource failed.
    #[error("execution failed: {0}")]
    Execution(String),
    /// Provisioning or network failure that may succeed on retry.
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),
    /// Credential broker failure or forbidden cross-tenant access.
    #[error("authentication error: {0}")]
    Auth(String),
    /// Requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Storage-level uniqueness or state conflict.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Collaborator failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// Categorized gateway failure.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Discriminant of [`ControlPlaneError`] used for explicit branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ControlPlaneError::Validation`].
    Validation,
    /// See [`ControlPlaneError::Limit`].
    Limit,
    /// See [`ControlPlaneError::Execution`].
    Execution,
    /// See [`ControlPlaneError::TransientInfra`].
    TransientInfra,
    /// See [`ControlPlaneError::Auth`].
    Auth,
    /// See [`ControlPlaneError::NotFound`].
    NotFound,
    /// See [`ControlPlaneError::Conflict`].
    Conflict,
    /// See [`ControlPlaneError::Backend`].
    Backend,
}

impl ControlPlaneError {
    /// Classify the error. Gateway errors fold into the general taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Limit(_) => ErrorKind::Limit,
            Self::Execution(_) => ErrorKind::Execution,
            Self::TransientInfra(_) => ErrorKind::TransientInfra,
            Self::Auth(_) => ErrorKind::Auth,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Gateway(err) => match err.category() {
                GatewayErrorCategory::Unreachable => ErrorKind::TransientInfra,
                GatewayErrorCategory::Unauthenticated => ErrorKind::Auth,
                GatewayErrorCategory::RemoteError => ErrorKind::Execution,
            },
        }
    }

    /// Whether a queue/worker should retry the failed operation.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientInfra)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = std::result::Result<T, anyhow::Error>;
