//! Error taxonomy shared by the ledger store, the group service and the hub.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures reported by a `LedgerStore` backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("not found")]
    NotFound,

    /// Uniqueness violation, e.g. a join code that is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No credential, or one the authenticator rejected.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Authenticated, but not a member of the target group.
    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Conflict(_) => "conflict",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound => Self::NotFound("resource".into()),
            LedgerError::Conflict(msg) => Self::Conflict(msg),
            LedgerError::Backend(msg) => Self::Internal(msg),
        }
    }
}
