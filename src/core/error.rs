use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a store operation.
///
/// `NotFound`, `InvalidState` and `Unauthorized` are per-request outcomes and
/// guarantee that nothing was written. The remaining kinds come from the
/// storage layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("failed to format timestamp: {0}")]
    TimestampFormat(#[from] time::error::Format),

    #[error("failed to parse stored timestamp: {0}")]
    TimestampParse(#[from] time::error::Parse),
}

impl Error {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub(crate) fn invalid_state(what: impl Into<String>) -> Self {
        Error::InvalidState(what.into())
    }

    pub(crate) fn unauthorized(what: impl Into<String>) -> Self {
        Error::Unauthorized(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}
