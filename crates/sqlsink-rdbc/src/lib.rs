//! # sqlsink-rdbc
//!
//! Relational database connectivity for the sqlsink event sink.
//!
//! ## Features
//!
//! - **Connections**: async `Connection` trait with JDBC-style auto-commit,
//!   explicit commit/rollback and batched execution
//! - **Connection Pooling**: DBCP-style pool with validation and idle eviction
//! - **SQL Dialects**: identifier quoting, placeholders and multi-row INSERTs
//! - **Schema Discovery**: catalog lookups with case-insensitive table
//!   resolution
//! - **Driver Registry**: JDBC driver class names mapped to native backends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqlsink_rdbc::prelude::*;
//!
//! let registry = DriverRegistry::with_default_drivers();
//! let factory = registry.resolve("org.postgresql.Driver")?;
//!
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("jdbc:postgresql://localhost/db").with_max_active(4),
//!     factory,
//! )
//! .await?;
//!
//! let conn = pool.get().await?;
//! let table = conn.resolve_table("events").await?;
//! let sql = Dialect::Postgres.insert_sql(table.schema.as_deref(), &table.name, &["id"], 1);
//! conn.execute(&sql, &[Value::Int32(1)]).await?;
//! conn.commit().await?;
//! conn.release().await;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `mysql` - MySQL/MariaDB support via mysql_async
//! - `full` - All backends

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod pool;
pub mod schema;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::types::{ColumnMetadata, Row, SemanticType, TableMetadata, Value};

    pub use crate::connection::{AffectedRows, Connection, ConnectionConfig, ConnectionFactory};

    pub use crate::pool::{
        AtomicPoolStats, ConnectionPool, PoolConfig, PoolStats, PooledConnection,
        SimpleConnectionPool,
    };

    pub use crate::dialect::Dialect;

    pub use crate::driver::DriverRegistry;

    pub use crate::schema::SchemaProvider;
}

pub use error::{Error, Result};
pub use types::Value;
