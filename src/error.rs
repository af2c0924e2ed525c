//! Driver error taxonomy.
//!
//! Every lifecycle operation returns [`DriverError`] on failure.  The
//! variants mirror the status codes the volume-lifecycle protocol expects,
//! so the transport layer can map them one-to-one onto wire status codes.
//! Errors derive [`Serialize`]/[`Deserialize`]/`Clone` because the
//! idempotency guard caches failed outcomes and replays them to retrying
//! callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for lifecycle operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The caller supplied a malformed request (empty identifier, zero
    /// capacity, relative path, ...).  Surfaced before the guard or the
    /// backend is touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced volume or assignment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflicting volume or publish target already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A lifecycle transition guard was violated, e.g. delete while
    /// assignments are still active.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// A conflicting operation on the same volume is already in flight.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The backend could not satisfy the capacity or placement request.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transient backend or network failure.  Safe for the caller to retry;
    /// the idempotency guard makes the retry exactly-once in effect.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Unexpected backend response or internal invariant violation.
    #[error("internal: {0}")]
    Internal(String),
}

impl DriverError {
    /// Create a [`DriverError::InvalidArgument`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn invalid<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Create a [`DriverError::Unavailable`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn unavailable<E: std::fmt::Display>(e: E) -> Self {
        Self::Unavailable(e.to_string())
    }

    /// Create a [`DriverError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Whether the caller may retry the operation verbatim.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
