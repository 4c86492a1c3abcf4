//! Error types for the repository engine

use thiserror::Error;

/// Repository error type
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Missing path or identifier
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Duplicate create or move target
    #[error("Item already exists: {0}")]
    ItemExists(String),

    /// Privilege check failed
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Missing or foreign lock token, or an already locked node
    #[error("Lock error: {0}")]
    Lock(String),

    /// Abstract/protected type, referenced node removal, invalid mixin change
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Unconvertible value or unresolved reference/path
    #[error("Value format error: {0}")]
    ValueFormat(String),

    /// Write against a checked-in node or one checked out by another user
    #[error("Version error: {0}")]
    Version(String),

    /// Session budget exhausted for longer than the login timeout
    #[error("Login timed out: {0}")]
    LoginTimedOut(String),

    /// Unknown or unmappable namespace
    #[error("Namespace error: {0}")]
    Namespace(String),

    /// Operation against a closed session or a removed item
    #[error("Invalid item state: {0}")]
    InvalidItemState(String),

    /// Connection pool exhausted or closed
    #[error("Pool error: {0}")]
    Pool(String),

    /// Schema/migration error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Background work interrupted by shutdown
    #[error("Cancelled")]
    Cancelled,

    /// Blob or lock file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration failed to load
    #[error("Config error: {0}")]
    Config(#[from] arbor_config::ConfigError),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl RepositoryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn exists(what: impl Into<String>) -> Self {
        Self::ItemExists(what.into())
    }

    pub fn access_denied(what: impl Into<String>) -> Self {
        Self::AccessDenied(what.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    pub fn value_format(msg: impl Into<String>) -> Self {
        Self::ValueFormat(msg.into())
    }

    pub fn version(msg: impl Into<String>) -> Self {
        Self::Version(msg.into())
    }

    pub fn namespace(msg: impl Into<String>) -> Self {
        Self::Namespace(msg.into())
    }

    /// Check if the operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pool(_) | Self::LoginTimedOut(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = RepositoryError::not_found("/a/b");
        assert_eq!(err.to_string(), "Item not found: /a/b");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RepositoryError::Pool("exhausted".into()).is_retryable());
        assert!(!RepositoryError::lock("held").is_retryable());

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(RepositoryError::from(busy).is_retryable());
    }
}
