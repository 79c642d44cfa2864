//! Error types for simple-db.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants that callers commonly hit carry an actionable suggestion.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection pool exhausted: all {capacity} connections checked out (waited {waited_ms}ms)")]
    PoolExhausted { capacity: usize, waited_ms: u64 },

    #[error("Invalid release: connection belongs to pool #{origin_pool}, not pool #{target_pool}")]
    InvalidRelease { origin_pool: u64, target_pool: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Malformed query: no leading SQL verb in {sql:?}")]
    MalformedQuery { sql: String },

    #[error("INSERT produced no generated key")]
    NoGeneratedKey,

    #[error("Query returned no rows")]
    EmptyResult,

    #[error("Unexpected statement outcome: expected {expected}, got {actual}")]
    UnexpectedOutcome {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Schema mismatch on table '{table}': {message}")]
    SchemaMismatch { table: String, message: String },

    #[error("Field '{field}' of entity '{entity}' has no SQL type mapping")]
    UnmappedFieldType { entity: String, field: String },

    #[error("Execution error: {message}")]
    Execution {
        message: String,
        /// e.g., "42S02" for unknown table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl DbError {
    /// Create a pool exhausted error.
    pub fn pool_exhausted(capacity: usize, waited_ms: u64) -> Self {
        Self::PoolExhausted {
            capacity,
            waited_ms,
        }
    }

    /// Create a malformed query error.
    pub fn malformed_query(sql: impl Into<String>) -> Self {
        Self::MalformedQuery { sql: sql.into() }
    }

    /// Create an unexpected outcome error.
    pub fn unexpected_outcome(expected: &'static str, actual: &'static str) -> Self {
        Self::UnexpectedOutcome { expected, actual }
    }

    /// Create a schema mismatch error.
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an unmapped field type error.
    pub fn unmapped_field_type(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnmappedFieldType {
            entity: entity.into(),
            field: field.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Release connections sooner or raise pool_capacity")
            }
            Self::UnmappedFieldType { .. } => {
                Some("Give the field a FieldKind that has a SQL type mapping")
            }
            _ => None,
        }
    }

    /// SQL state reported by the engine, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Execution { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// True for failures raised by the server or the link to it while a
    /// statement was prepared, bound or executed. Only these abort an open
    /// transaction.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Connection { .. })
    }

    /// Check if this error is retryable. The client never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PoolExhausted { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, bound parameters and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::EmptyResult,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::decode(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(source.to_string()),
            other => DbError::execution(
                format!("Driver error: {}", other),
                None,
                "Check database driver configuration",
            ),
        }
    }
}

/// Structural mapping failures surface as decode errors.
impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::decode(format!("Cannot map row onto target type: {}", err))
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));

        let err = DbError::pool_exhausted(10, 250);
        assert!(err.to_string().contains("all 10 connections"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::execution(
            "Syntax error",
            Some("42000".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(err.sql_state(), Some("42000"));
        assert!(DbError::EmptyResult.suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::pool_exhausted(1, 0).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::malformed_query("").is_retryable());
        assert!(!DbError::schema_mismatch("article", "missing column").is_retryable());
    }

    #[test]
    fn test_execution_failure_classification() {
        assert!(DbError::execution("Unknown column", None, "fix it").is_execution_failure());
        assert!(DbError::connection("reset", "retry").is_execution_failure());
        assert!(!DbError::NoGeneratedKey.is_execution_failure());
        assert!(!DbError::EmptyResult.is_execution_failure());
        assert!(!DbError::decode("bad date").is_execution_failure());
        assert!(!DbError::unexpected_outcome("rows", "affected count").is_execution_failure());
    }

    #[test]
    fn test_row_not_found_maps_to_empty_result() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::EmptyResult));
    }

    #[test]
    fn test_serde_error_maps_to_decode() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err: DbError = err.into();
        assert!(matches!(err, DbError::Decode { .. }));
    }
}
