//! Pool manager
//!
//! Owns the connection pool shared by sinks. The pool is created from the
//! connection keys of a [`SinkContext`] and tuned through `dbcp.*` keys,
//! which are applied through [`POOL_SETTERS`].

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use sqlsink_rdbc::connection::{redact_url, ConnectionConfig};
use sqlsink_rdbc::driver::DriverRegistry;
use sqlsink_rdbc::error::ErrorCategory;
use sqlsink_rdbc::pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection, SimpleConnectionPool};

use crate::config::{self, SinkContext};
use crate::error::{Result, SinkError};

/// How a pool parameter is parsed and applied
#[derive(Clone, Copy)]
pub enum PoolSetter {
    /// 32-bit integer
    Int(fn(&mut PoolConfig, i32)),
    /// 64-bit integer, usually milliseconds
    Long(fn(&mut PoolConfig, i64)),
    /// `true` / `false`
    Bool(fn(&mut PoolConfig, bool)),
    /// Free text
    Str(fn(&mut PoolConfig, String)),
}

impl PoolSetter {
    /// Type name used in logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Bool(_) => "boolean",
            Self::Str(_) => "string",
        }
    }

    fn apply(&self, config: &mut PoolConfig, raw: &str) -> std::result::Result<(), String> {
        let raw = raw.trim();
        match self {
            Self::Int(set) => raw.parse().map(|v| set(config, v)).map_err(|e| format!("{}", e)),
            Self::Long(set) => raw.parse().map(|v| set(config, v)).map_err(|e| format!("{}", e)),
            Self::Bool(set) => raw
                .to_ascii_lowercase()
                .parse()
                .map(|v| set(config, v))
                .map_err(|e| format!("{}", e)),
            Self::Str(set) => {
                set(config, raw.to_string());
                Ok(())
            }
        }
    }
}

fn bounded(v: i64) -> Option<usize> {
    usize::try_from(v).ok()
}

fn positive_millis(v: i64) -> Option<Duration> {
    u64::try_from(v)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Pool parameters accepted under the `dbcp.` prefix.
///
/// Negative sizes mean unbounded; a `maxWait` of zero or less waits forever.
pub static POOL_SETTERS: &[(&str, PoolSetter)] = &[
    ("maxActive", PoolSetter::Int(|c, v| c.max_active = bounded(v.into()))),
    ("maxIdle", PoolSetter::Int(|c, v| c.max_idle = bounded(v.into()))),
    ("minIdle", PoolSetter::Int(|c, v| c.min_idle = bounded(v.into()).unwrap_or(0))),
    ("initialSize", PoolSetter::Int(|c, v| c.initial_size = bounded(v.into()).unwrap_or(0))),
    ("maxWait", PoolSetter::Long(|c, v| c.max_wait = positive_millis(v))),
    ("testOnBorrow", PoolSetter::Bool(|c, v| c.test_on_borrow = v)),
    ("testOnReturn", PoolSetter::Bool(|c, v| c.test_on_return = v)),
    ("testWhileIdle", PoolSetter::Bool(|c, v| c.test_while_idle = v)),
    (
        "validationQuery",
        PoolSetter::Str(|c, v| c.validation_query = Some(v).filter(|q| !q.is_empty())),
    ),
    (
        "validationQueryTimeout",
        PoolSetter::Int(|c, v| {
            c.validation_timeout = u64::try_from(v)
                .ok()
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
        }),
    ),
    (
        "minEvictableIdleTimeMillis",
        PoolSetter::Long(|c, v| c.min_evictable_idle_time = positive_millis(v).unwrap_or(Duration::MAX)),
    ),
    (
        "timeBetweenEvictionRunsMillis",
        PoolSetter::Long(|c, v| c.time_between_eviction_runs = positive_millis(v)),
    ),
    (
        "numTestsPerEvictionRun",
        PoolSetter::Int(|c, v| c.num_tests_per_eviction_run = bounded(v.into()).unwrap_or(usize::MAX)),
    ),
    (
        "maxConnLifetimeMillis",
        PoolSetter::Long(|c, v| c.max_conn_lifetime = positive_millis(v)),
    ),
    (
        "defaultAutoCommit",
        PoolSetter::Bool(|c, v| {
            if v {
                warn!("Ignoring dbcp.defaultAutoCommit=true, sink connections never auto-commit");
            }
            c.default_auto_commit = false;
        }),
    ),
];

/// Look up a pool setter, exact name first, then case-insensitively
pub fn pool_setter(key: &str) -> Option<&'static PoolSetter> {
    POOL_SETTERS
        .iter()
        .find(|(name, _)| *name == key)
        .or_else(|| POOL_SETTERS.iter().find(|(name, _)| name.eq_ignore_ascii_case(key)))
        .map(|(_, setter)| setter)
}

/// Apply `dbcp.` parameters (prefix already stripped) to `config`.
///
/// Unknown keys and unparsable values are logged and skipped. Returns the
/// number of parameters applied.
pub fn apply_pool_properties(config: &mut PoolConfig, props: &SinkContext) -> usize {
    let mut applied = 0;
    for (key, value) in props.iter() {
        let Some(setter) = pool_setter(key) else {
            warn!(key = %key, "Unknown pool parameter, ignoring it");
            continue;
        };
        match setter.apply(config, value) {
            Ok(()) => {
                debug!(key = %key, value = %value, "Applied pool parameter");
                applied += 1;
            }
            Err(e) => warn!(
                key = %key,
                value = %value,
                expected = setter.type_name(),
                error = %e,
                "Invalid pool parameter, ignoring it"
            ),
        }
    }
    // Sink transactions depend on manual commit
    config.default_auto_commit = false;
    applied
}

/// Build the pool configuration described by a context
pub fn pool_config_from_context(ctx: &SinkContext) -> Result<PoolConfig> {
    let url = ctx.get_non_empty(config::CONNECTION_STRING).ok_or_else(|| {
        SinkError::config(format!("'{}' is required", config::CONNECTION_STRING))
    })?;

    let mut connection = ConnectionConfig::new(url);
    if let Some(user) = ctx.get_non_empty(config::USERNAME) {
        connection = connection.with_username(user);
    }
    if let Some(password) = ctx.get_string(config::PASSWORD).filter(|p| !p.is_empty()) {
        connection = connection.with_password(password);
    }

    let mut pool = PoolConfig::from_connection(connection);
    apply_pool_properties(&mut pool, &ctx.sub_properties(config::POOL_PREFIX));
    Ok(pool)
}

/// Owner of the live connection pool
pub struct PoolManager {
    registry: DriverRegistry,
    pool: RwLock<Option<Arc<SimpleConnectionPool>>>,
    // Held across initialize and close so pool swaps never interleave
    lifecycle: tokio::sync::Mutex<()>,
}

impl PoolManager {
    /// Create a manager resolving drivers through `registry`
    pub fn new(registry: DriverRegistry) -> Self {
        Self {
            registry,
            pool: RwLock::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a manager with every backend compiled into this build
    pub fn with_default_drivers() -> Self {
        Self::new(DriverRegistry::with_default_drivers())
    }

    /// Create the pool described by `ctx`.
    ///
    /// A pool created by an earlier call is closed first. Concurrent calls
    /// run one after the other.
    pub async fn initialize(&self, ctx: &SinkContext) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let driver = ctx
            .get_non_empty(config::DRIVER)
            .ok_or_else(|| SinkError::config(format!("'{}' is required", config::DRIVER)))?;
        let pool_config = pool_config_from_context(ctx)?;
        let factory = self
            .registry
            .resolve(driver)
            .map_err(|e| SinkError::config(e.to_string()))?;

        let factory_name = factory.name();

        let previous = self.pool.write().take();
        if let Some(previous) = previous {
            info!("Closing previous connection pool");
            if let Err(e) = previous.close().await {
                warn!(error = %e, "Error closing previous connection pool");
            }
        }

        let pool = SimpleConnectionPool::new(pool_config.clone(), factory)
            .await
            .map_err(|e| match e.category() {
                ErrorCategory::Configuration => SinkError::config(e.to_string()),
                _ => SinkError::Database(e),
            })?;

        info!(
            driver = %driver,
            backend = factory_name,
            url = %redact_url(&pool_config.connection.url),
            max_active = ?pool_config.max_active,
            max_idle = ?pool_config.max_idle,
            max_wait_ms = ?pool_config.max_wait.map(|d| d.as_millis()),
            "Connection pool initialized"
        );

        *self.pool.write() = Some(pool);
        Ok(())
    }

    /// Whether a pool is live
    pub fn is_initialized(&self) -> bool {
        self.pool.read().is_some()
    }

    fn current(&self) -> Result<Arc<SimpleConnectionPool>> {
        self.pool.read().clone().ok_or(SinkError::NotInitialized)
    }

    /// Borrow a connection with auto-commit disabled
    pub async fn borrow(&self) -> Result<PooledConnection> {
        let pool = self.current()?;
        Ok(pool.get().await?)
    }

    /// Return a borrowed connection.
    ///
    /// Connections of a pool that was closed meanwhile are closed instead.
    pub async fn release(&self, conn: PooledConnection) {
        conn.release().await;
    }

    /// Close the pool; later borrows fail with [`SinkError::NotInitialized`]
    pub async fn close(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await?;
            info!("Connection pool closed");
        }
        Ok(())
    }

    /// Statistics of the live pool
    pub fn stats(&self) -> Option<PoolStats> {
        self.pool.read().as_ref().map(|p| p.stats())
    }

    /// Open connections of the live pool as `(total, idle)`
    pub fn size(&self) -> Option<(usize, usize)> {
        self.pool.read().as_ref().map(|p| (p.size(), p.idle()))
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("registry", &self.registry)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
