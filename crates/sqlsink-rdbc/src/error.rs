//! Error types for sqlsink-rdbc
//!
//! Every error maps to an [`ErrorCategory`]. The sink backs off on
//! transient categories (a dead connection, an exhausted pool) and treats
//! the rest as a problem with the batch or the configuration.

use std::fmt;
use thiserror::Error;

/// Result type for sqlsink-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Underlying driver error
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Opening or using the network connection failed
    Connection,
    /// The database rejected a statement
    Query,
    /// BEGIN, COMMIT, ROLLBACK or an auto-commit switch failed
    Transaction,
    /// A connect or validation deadline passed
    Timeout,
    /// Invalid driver, URL, dialect or pool setting
    Configuration,
    /// No connection could be borrowed in time
    PoolExhausted,
    /// A pooled connection failed its health check
    Validation,
    /// Catalog lookups
    Schema,
    /// Broken internal invariant
    Internal,
}

impl ErrorCategory {
    /// Whether retrying the same work later can succeed
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Timeout | Self::PoolExhausted | Self::Validation
        )
    }

    /// Stable lowercase name, used as a log field
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Transaction => "transaction",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::PoolExhausted => "pool_exhausted",
            Self::Validation => "validation",
            Self::Schema => "schema",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by connections, factories and the pool
#[derive(Error, Debug)]
pub enum Error {
    /// Connecting failed or the connection is gone
    #[error("connection error: {message}")]
    Connection {
        /// What failed
        message: String,
        /// Driver error
        #[source]
        source: Option<BoxError>,
    },

    /// A statement failed
    #[error("statement failed: {message}")]
    Query {
        /// Driver message
        message: String,
        /// Offending statement, when known
        sql: Option<String>,
        /// Driver error
        #[source]
        source: Option<BoxError>,
    },

    /// Transaction control failed
    #[error("transaction error: {message}")]
    Transaction {
        /// What failed
        message: String,
        /// Driver error
        #[source]
        source: Option<BoxError>,
    },

    /// A deadline passed
    #[error("timed out: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No connection was available within `maxWait`, or the pool is closed
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    /// A connection failed validation
    #[error("connection validation failed: {0}")]
    Validation(String),

    /// The configured table is not in the catalog
    #[error("table not found: {table}")]
    TableNotFound {
        /// Name as configured
        table: String,
    },

    /// Broken internal invariant
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classification used for retry decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::PoolExhausted(_) => ErrorCategory::PoolExhausted,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::TableNotFound { .. } => ErrorCategory::Schema,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Shorthand for `self.category().is_retriable()`
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Statement attached to a query error
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Connection error without a driver cause
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Connection error wrapping a driver cause
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Statement error carrying the SQL text
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Statement error from a driver failure on `sql`
    pub fn statement(sql: &str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Query {
            message: source.to_string(),
            sql: Some(sql.to_string()),
            source: Some(Box::new(source)),
        }
    }

    /// Transaction control error wrapping a driver cause
    pub fn transaction_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Deadline error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Pool exhaustion or shutdown
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted(message.into())
    }

    /// Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
