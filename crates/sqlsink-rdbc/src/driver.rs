//! Driver registry
//!
//! Maps configured driver identifiers to connection factories. JDBC class
//! names and short names are both accepted, so `org.postgresql.Driver` and
//! `postgres` resolve to the same factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::connection::ConnectionFactory;
use crate::error::{Error, Result};

/// Identifiers registered for the PostgreSQL backend
pub const POSTGRES_DRIVER_NAMES: &[&str] = &["org.postgresql.Driver", "postgres", "postgresql"];

/// Identifiers registered for the MySQL/MariaDB backend
pub const MYSQL_DRIVER_NAMES: &[&str] = &[
    "com.mysql.jdbc.Driver",
    "com.mysql.cj.jdbc.Driver",
    "org.mariadb.jdbc.Driver",
    "mysql",
    "mariadb",
];

/// Registry of available database drivers
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn ConnectionFactory>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every backend compiled into this build
    pub fn with_default_drivers() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "postgres")]
        registry.register_aliases(
            POSTGRES_DRIVER_NAMES,
            Arc::new(crate::postgres::PgConnectionFactory),
        );

        #[cfg(feature = "mysql")]
        registry.register_aliases(
            MYSQL_DRIVER_NAMES,
            Arc::new(crate::mysql::MySqlConnectionFactory),
        );

        registry
    }

    /// Register a factory under one identifier (case-insensitive)
    pub fn register(&mut self, name: impl AsRef<str>, factory: Arc<dyn ConnectionFactory>) {
        self.drivers
            .insert(name.as_ref().to_ascii_lowercase(), factory);
    }

    /// Register a factory under several identifiers
    pub fn register_aliases(&mut self, names: &[&str], factory: Arc<dyn ConnectionFactory>) {
        for name in names {
            self.register(name, Arc::clone(&factory));
        }
    }

    /// Look up the factory for a driver identifier
    pub fn resolve(&self, driver: &str) -> Result<Arc<dyn ConnectionFactory>> {
        self.drivers
            .get(&driver.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                Error::config(format!(
                    "no driver registered for '{}' (available: {})",
                    driver,
                    self.names().join(", ")
                ))
            })
    }

    /// Registered identifiers, sorted
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Strip a leading `jdbc:` so JDBC-style connection strings can be used
/// with the native drivers.
pub fn normalize_url(url: &str) -> &str {
    let trimmed = url.trim();
    match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionConfig};
    use async_trait::async_trait;

    struct NullFactory;

    #[async_trait]
    impl ConnectionFactory for NullFactory {
        async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
            Err(Error::connection("not connectable"))
        }

        fn name(&self) -> &'static str {
            "null"
        }
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let mut registry = DriverRegistry::new();
        registry.register_aliases(POSTGRES_DRIVER_NAMES, Arc::new(NullFactory));

        assert!(registry.resolve("org.postgresql.Driver").is_ok());
        assert!(registry.resolve("POSTGRES").is_ok());
        assert!(registry.resolve("mysql").is_err());
    }

    #[test]
    fn test_resolve_error_lists_drivers() {
        let mut registry = DriverRegistry::new();
        registry.register("mock", Arc::new(NullFactory));
        let err = registry.resolve("nope").err().map(|e| e.to_string());
        assert!(err.is_some_and(|m| m.contains("mock")));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("jdbc:postgresql://localhost:5432/db"),
            "postgresql://localhost:5432/db"
        );
        assert_eq!(normalize_url("JDBC:mysql://h/db"), "mysql://h/db");
        assert_eq!(normalize_url("postgres://h/db"), "postgres://h/db");
        assert_eq!(normalize_url("jdb"), "jdb");
    }
}
