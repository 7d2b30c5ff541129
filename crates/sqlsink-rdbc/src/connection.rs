//! Connections and their factories
//!
//! A [`Connection`] follows the JDBC auto-commit model: with auto-commit
//! off, every statement joins one open transaction until `commit` or
//! `rollback` is called on the same connection. Pooled connections are
//! always handed out with auto-commit off.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::error::Result;
use crate::schema::SchemaProvider;
use crate::types::{Row, Value};

/// Default bound on establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Affected-row count reported for one statement of a batch.
///
/// Some drivers cannot report a count for batched statements; those rows
/// report [`AffectedRows::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffectedRows {
    /// The driver reported this many rows
    Count(u64),
    /// The statement ran but the driver gave no count
    Unknown,
}

impl AffectedRows {
    /// At least one row touched, or no count available
    #[inline]
    pub fn is_success(self) -> bool {
        match self {
            Self::Count(n) => n >= 1,
            Self::Unknown => true,
        }
    }
}

/// An open database session
#[async_trait]
pub trait Connection: SchemaProvider + Send + Sync {
    /// Run a statement returning rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement, returning the affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run one statement once per parameter row.
    ///
    /// Stops at the first failing row. Drivers with native batching
    /// override this.
    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<Vec<AffectedRows>> {
        let mut results = Vec::with_capacity(rows.len());
        for params in rows {
            results.push(AffectedRows::Count(self.execute(sql, params).await?));
        }
        Ok(results)
    }

    /// Switch auto-commit; enabling it commits any open transaction
    async fn set_auto_commit(&self, enabled: bool) -> Result<()>;

    /// Current auto-commit mode
    fn auto_commit(&self) -> bool;

    /// Commit the open transaction
    async fn commit(&self) -> Result<()>;

    /// Discard the open transaction
    async fn rollback(&self) -> Result<()>;

    /// Cheap liveness probe
    async fn is_valid(&self) -> bool;

    /// Close the session
    async fn close(&self) -> Result<()>;
}

/// Where and how to connect
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Database URL; a leading `jdbc:` is accepted
    pub url: String,
    /// User name, overrides any user in the URL
    pub username: Option<String>,
    /// Password, overrides any password in the URL
    pub password: Option<SecretString>,
    /// Bound on establishing the session
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &redact_url(&self.url))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Mask the password of a URL so it can be logged.
///
/// Unparsable input is masked entirely.
pub fn redact_url(raw: &str) -> String {
    let stripped = crate::driver::normalize_url(raw);
    let Ok(mut parsed) = url::Url::parse(stripped) else {
        return "***".to_string();
    };
    if parsed.password().is_some() {
        let _ = parsed.set_password(Some("***"));
    }
    if stripped.len() == raw.len() {
        parsed.to_string()
    } else {
        format!("jdbc:{}", parsed)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Config for `url` without credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the user name
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Password in clear text, for handing to a driver
    pub fn expose_password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }
}

/// Opens connections for one backend
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a session
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
