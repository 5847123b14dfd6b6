//! Error types for pagegraph-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Entity not found
    NotFound,
    /// Unique / check constraint violated
    Constraint,
    /// Delete rejected while the entity is still referenced
    ReferentialIntegrity,
    /// Transaction errors
    Transaction,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Constraint => "constraint",
            ErrorKind::ReferentialIntegrity => "referential_integrity",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
///
/// Every error raised by [`crate::RecordStore::commit`] is raised before the
/// transaction commits, so the store is unchanged when one is returned.
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn not_found(entity: &str, id: i64) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found: {}", entity, id))
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Constraint, message)
    }

    pub fn still_referenced(entity: &str, id: i64, referrers: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ReferentialIntegrity,
            format!("{} {} is still referenced by {}", entity, id, referrers),
        )
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    /// Errors caused by the request itself (HTTP 4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NotFound | ErrorKind::Constraint | ErrorKind::ReferentialIntegrity
        )
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        let kind = match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ErrorKind::Constraint
            }
            _ => ErrorKind::Database,
        };
        StorageError::new(kind, format!("SQLite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    // ═══════════════════════════════════════════════════════════════════════
    // Error Construction Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_database_error() {
        let err = StorageError::database("Connection failed");
        assert_eq!(err.kind, ErrorKind::Database);
        assert_eq!(err.message, "Connection failed");
        assert!(err.source.is_none());

        let msg = format!("{}", err);
        assert_eq!(msg, "[database] Connection failed");
    }

    #[test]
    fn test_not_found() {
        let err = StorageError::not_found("function_impl", 42);
        assert_eq!(err.kind, ErrorKind::NotFound);

        let msg = format!("{}", err);
        assert_eq!(msg, "[not_found] function_impl not found: 42");
    }

    #[test]
    fn test_still_referenced() {
        let err = StorageError::still_referenced("dataset", 3, "2 benchmark(s)");
        assert_eq!(err.kind, ErrorKind::ReferentialIntegrity);
        assert!(err.message.contains("dataset 3"));
        assert!(err.message.contains("2 benchmark(s)"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(StorageError::not_found("dev", 1).is_client_error());
        assert!(StorageError::constraint("duplicate slug").is_client_error());
        assert!(StorageError::still_referenced("dataset", 1, "x").is_client_error());
        assert!(!StorageError::database("disk I/O error").is_client_error());
        assert!(!StorageError::transaction("busy").is_client_error());
    }

    #[test]
    fn test_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = StorageError::database("DB file missing").with_source(io_err);

        let source = err.source().unwrap();
        assert!(source.to_string().contains("file not found"));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Conversion Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_from_rusqlite_error() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();

        assert_eq!(err.kind, ErrorKind::Database);
        assert!(err.message.contains("SQLite error"));
        assert!(err.source.is_some());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json")
            .err()
            .unwrap();
        let err: StorageError = json_err.into();

        assert_eq!(err.kind, ErrorKind::Serialization);
        assert!(err.message.contains("JSON error"));
    }

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(
            ErrorKind::ReferentialIntegrity.as_str(),
            "referential_integrity"
        );
        assert_eq!(ErrorKind::Constraint.as_str(), "constraint");
        assert_eq!(ErrorKind::IO.as_str(), "io");
    }
}
