//! # Workflow Error Types
//!
//! The single error type workflow callers see.
//!
//! ```text
//! CoreError  ──┐
//!              ├──► CommerceError ──► category() / is_retryable()
//! DbError    ──┤
//! serde_json ──┘   (allocation snapshot encode/decode)
//! ```
//!
//! A `DbError::Domain` (a ledger rule rejected a write) is unwrapped into
//! `CommerceError::Core` so callers match one variant per business failure.

use rxstock_core::{CoreError, ErrorCategory};
use rxstock_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommerceError {
    /// A business rule rejected the request.
    #[error(transparent)]
    Core(CoreError),

    /// Persistence failed.
    #[error(transparent)]
    Db(DbError),

    /// An allocation snapshot could not be encoded or decoded.
    #[error("Allocation snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl CommerceError {
    /// Classifies the failure.
    ///
    /// Busy and conflicting transactions are `Concurrency`; every other
    /// database failure is `Infrastructure`.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CommerceError::Core(e) => e.category(),
            CommerceError::Db(e) if e.is_retryable() => ErrorCategory::Concurrency,
            CommerceError::Db(DbError::NotFound { .. }) => ErrorCategory::Validation,
            CommerceError::Db(_) | CommerceError::Snapshot(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether re-running the whole workflow may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Concurrency
    }

    /// The domain error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            CommerceError::Core(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CoreError> for CommerceError {
    fn from(err: CoreError) -> Self {
        CommerceError::Core(err)
    }
}

impl From<DbError> for CommerceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Domain(core) => CommerceError::Core(core),
            other => CommerceError::Db(other),
        }
    }
}

impl From<sqlx::Error> for CommerceError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

impl From<rxstock_core::ValidationError> for CommerceError {
    fn from(err: rxstock_core::ValidationError) -> Self {
        CommerceError::Core(err.into())
    }
}

pub type CommerceResult<T> = Result<T, CommerceError>;
