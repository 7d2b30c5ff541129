//! Connection pool for sqlsink-rdbc
//!
//! A DBCP-style pool:
//! - `max_active` bounds concurrently borrowed connections
//! - `max_idle` / `min_idle` bound the idle set
//! - validation on borrow, on return and while idle
//! - background idle eviction
//! - uncommitted work is rolled back when a connection comes back
//!
//! ```rust,ignore
//! let factory = DriverRegistry::with_default_drivers().resolve("org.postgresql.Driver")?;
//! let config = PoolConfig::new("jdbc:postgresql://db/logs").with_max_active(4);
//! let pool = SimpleConnectionPool::new(config, factory).await?;
//!
//! let conn = pool.get().await?;
//! conn.execute("INSERT INTO t VALUES ($1)", &[Value::Int32(1)]).await?;
//! conn.commit().await?;
//! conn.release().await;
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// Borrow/return interface of a pool
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Borrow a connection from the pool
    async fn get(&self) -> Result<PooledConnection>;

    /// Hand back a connection opened at `created_at`
    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant);

    /// Total open connections (borrowed and idle)
    fn size(&self) -> usize;

    /// Number of idle connections
    fn idle(&self) -> usize;

    /// Number of borrowed connections
    fn in_use(&self) -> usize {
        self.size().saturating_sub(self.idle())
    }

    /// Counter snapshot
    fn stats(&self) -> PoolStats;

    /// Close idle connections and refuse further borrows
    async fn close(&self) -> Result<()>;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

/// A connection borrowed from the pool.
///
/// Call [`PooledConnection::release`] to hand it back. Dropping the handle
/// without releasing returns the connection from a spawned task.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    /// Wrap a connection borrowed from `pool`
    pub fn new(conn: Box<dyn Connection>, created_at: Instant, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            pool,
        }
    }

    /// Borrowed connection
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        self.conn
            .as_deref()
            .expect("pooled connection used after release")
    }

    /// When the underlying connection was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Return the connection to the pool
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn, self.created_at).await;
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.conn.is_none())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let created_at = self.created_at;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        pool.return_connection(conn, created_at).await;
                    });
                }
                Err(_) => warn!("pooled connection dropped outside a runtime, discarding it"),
            }
        }
    }
}

/// Pool sizing, validation and eviction settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How to open connections
    pub connection: ConnectionConfig,
    /// Maximum borrowed connections, `None` for unbounded
    pub max_active: Option<usize>,
    /// Maximum idle connections kept on return, `None` for unbounded
    pub max_idle: Option<usize>,
    /// Idle floor maintained by the evictor
    pub min_idle: usize,
    /// Connections opened when the pool is created
    pub initial_size: usize,
    /// Borrow wait limit, `None` to wait indefinitely
    pub max_wait: Option<Duration>,
    /// Validate connections on borrow
    pub test_on_borrow: bool,
    /// Validate connections on return
    pub test_on_return: bool,
    /// Validate idle connections during eviction runs
    pub test_while_idle: bool,
    /// Query used for validation; the driver ping is used when unset
    pub validation_query: Option<String>,
    /// Bound on a single validation
    pub validation_timeout: Option<Duration>,
    /// Idle age after which a connection may be evicted
    pub min_evictable_idle_time: Duration,
    /// Period of the eviction task, `None` disables it
    pub time_between_eviction_runs: Option<Duration>,
    /// Idle connections examined per eviction run
    pub num_tests_per_eviction_run: usize,
    /// Lifetime after which a connection is closed instead of reused
    pub max_conn_lifetime: Option<Duration>,
    /// Auto-commit applied to every borrowed connection
    pub default_auto_commit: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_active: Some(8),
            max_idle: Some(8),
            min_idle: 0,
            initial_size: 0,
            max_wait: None,
            test_on_borrow: true,
            test_on_return: false,
            test_while_idle: false,
            validation_query: None,
            validation_timeout: None,
            min_evictable_idle_time: Duration::from_secs(30 * 60),
            time_between_eviction_runs: None,
            num_tests_per_eviction_run: 3,
            max_conn_lifetime: None,
            default_auto_commit: false,
        }
    }
}

impl PoolConfig {
    /// Defaults for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Defaults around an existing connection config
    pub fn from_connection(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }

    /// Set the borrowed-connection limit
    pub fn with_max_active(mut self, size: usize) -> Self {
        self.max_active = Some(size);
        self
    }

    /// Set the idle-connection limit
    pub fn with_max_idle(mut self, size: usize) -> Self {
        self.max_idle = Some(size);
        self
    }

    /// Set the idle floor
    pub fn with_min_idle(mut self, size: usize) -> Self {
        self.min_idle = size;
        self
    }

    /// Set the number of connections opened up front
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the borrow wait limit
    pub fn with_max_wait(mut self, timeout: Duration) -> Self {
        self.max_wait = Some(timeout);
        self
    }

    /// Toggle validation on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Toggle validation on return
    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }

    /// Set the validation query
    pub fn with_validation_query(mut self, sql: impl Into<String>) -> Self {
        self.validation_query = Some(sql.into());
        self
    }

    /// Set the eviction period
    pub fn with_eviction_interval(mut self, period: Duration) -> Self {
        self.time_between_eviction_runs = Some(period);
        self
    }
}

/// Counters reported by [`ConnectionPool::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened over the pool's life
    pub opened: u64,
    /// Connections closed over the pool's life
    pub closed: u64,
    /// Successful borrows
    pub borrowed: u64,
    /// Borrows that gave up after `max_wait`
    pub exhausted: u64,
    /// Time spent waiting for a permit, summed over all borrows
    pub wait_total: Duration,
    /// Connections that failed a validation
    pub validation_failures: u64,
    /// Idle connections removed by the evictor
    pub evictions: u64,
}

impl PoolStats {
    /// Mean permit wait per borrow
    pub fn mean_wait(&self) -> Duration {
        if self.borrowed == 0 {
            return Duration::ZERO;
        }
        let nanos = self.wait_total.as_nanos() / u128::from(self.borrowed);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Lock-free counters behind [`PoolStats`]
#[derive(Debug, Default)]
pub struct AtomicPoolStats {
    opened: AtomicU64,
    closed: AtomicU64,
    borrowed: AtomicU64,
    exhausted: AtomicU64,
    wait_micros: AtomicU64,
    validation_failures: AtomicU64,
    evictions: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl AtomicPoolStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection was opened
    pub fn opened(&self) {
        bump(&self.opened);
    }

    /// A connection was closed
    pub fn closed(&self) {
        bump(&self.closed);
    }

    /// A borrow succeeded after waiting `waited`
    pub fn borrowed(&self, waited: Duration) {
        bump(&self.borrowed);
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.wait_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// A borrow timed out
    pub fn exhausted(&self) {
        bump(&self.exhausted);
    }

    /// A connection failed validation
    pub fn validation_failed(&self) {
        bump(&self.validation_failures);
    }

    /// The evictor removed a connection
    pub fn evicted(&self) {
        bump(&self.evictions);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> PoolStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PoolStats {
            opened: load(&self.opened),
            closed: load(&self.closed),
            borrowed: load(&self.borrowed),
            exhausted: load(&self.exhausted),
            wait_total: Duration::from_micros(load(&self.wait_micros)),
            validation_failures: load(&self.validation_failures),
            evictions: load(&self.evictions),
        }
    }
}

// ============================================================================
// SimpleConnectionPool
// ============================================================================

/// Semaphore-bounded connection pool.
///
/// A permit is held for every borrowed connection and handed back when the
/// connection returns. Idle connections are kept LIFO so the most recently
/// used connection is reused first, and the evictor examines the oldest.
pub struct SimpleConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections, oldest first
    idle: Mutex<Vec<PoolEntry>>,
    /// Limits borrowed connections
    semaphore: Semaphore,
    total_connections: AtomicUsize,
    stats: Arc<AtomicPoolStats>,
    shutdown: AtomicBool,
    self_ref: Weak<Self>,
}

struct PoolEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

impl SimpleConnectionPool {
    /// Create a new connection pool.
    ///
    /// Opens `initial_size` connections eagerly and starts the evictor when
    /// an eviction period is configured. Failures to open initial
    /// connections are logged, not returned.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        let permits = config
            .max_active
            .unwrap_or(Semaphore::MAX_PERMITS)
            .min(Semaphore::MAX_PERMITS);
        if permits == 0 {
            return Err(Error::config("maxActive must be non-zero"));
        }

        let pool = Arc::new_cyclic(|weak| Self {
            semaphore: Semaphore::new(permits),
            config: config.clone(),
            factory,
            idle: Mutex::new(Vec::new()),
            total_connections: AtomicUsize::new(0),
            stats: Arc::new(AtomicPoolStats::new()),
            shutdown: AtomicBool::new(false),
            self_ref: weak.clone(),
        });

        for _ in 0..config.initial_size {
            match pool.create_connection().await {
                Ok(conn) => pool.push_idle(conn, Instant::now()),
                Err(e) => {
                    warn!(error = %e, "Failed to open initial pool connection");
                    break;
                }
            }
        }

        if let Some(period) = config.time_between_eviction_runs {
            spawn_evictor(Arc::downgrade(&pool), period);
        }

        Ok(pool)
    }

    /// Settings the pool was built with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection).await?;
        self.total_connections.fetch_add(1, Ordering::AcqRel);
        self.stats.opened();
        Ok(conn)
    }

    async fn destroy(&self, conn: Box<dyn Connection>) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Error closing pooled connection");
        }
        self.total_connections.fetch_sub(1, Ordering::AcqRel);
        self.stats.closed();
    }

    fn push_idle(&self, conn: Box<dyn Connection>, created_at: Instant) {
        self.idle.lock().push(PoolEntry {
            conn,
            created_at,
            last_used: Instant::now(),
        });
    }

    fn is_expired(&self, created_at: Instant) -> bool {
        self.config
            .max_conn_lifetime
            .is_some_and(|max| created_at.elapsed() > max)
    }

    /// Run the configured validation against `conn`
    async fn validate(&self, conn: &dyn Connection) -> bool {
        let check = async {
            match &self.config.validation_query {
                Some(sql) => conn.query(sql, &[]).await.is_ok(),
                None => conn.is_valid().await,
            }
        };
        let valid = match self.config.validation_timeout {
            Some(limit) => tokio::time::timeout(limit, check).await.unwrap_or(false),
            None => check.await,
        };
        if !valid {
            self.stats.validation_failed();
        }
        valid
    }

    /// Take an idle connection that passes lifetime and borrow checks
    async fn take_idle(&self) -> Option<(Box<dyn Connection>, Instant)> {
        loop {
            let entry = self.idle.lock().pop()?;
            if self.is_expired(entry.created_at) {
                debug!("Closing pooled connection past its lifetime");
                self.destroy(entry.conn).await;
                continue;
            }
            if self.config.test_on_borrow && !self.validate(&*entry.conn).await {
                warn!("Idle connection failed validation on borrow, discarding it");
                self.destroy(entry.conn).await;
                continue;
            }
            return Some((entry.conn, entry.created_at));
        }
    }

    /// Open a fresh connection and validate it
    async fn open_validated(&self) -> Result<(Box<dyn Connection>, Instant)> {
        let conn = self.create_connection().await?;
        if self.config.test_on_borrow && !self.validate(&*conn).await {
            self.destroy(conn).await;
            return Err(Error::validation(
                "newly created connection failed validation",
            ));
        }
        Ok((conn, Instant::now()))
    }

    /// Examine idle connections once: evict the stale or invalid ones, then
    /// top the idle set up to `min_idle`.
    pub async fn evict(&self) {
        if self.is_closed() {
            return;
        }

        let batch: Vec<PoolEntry> = {
            let mut idle = self.idle.lock();
            let n = self.config.num_tests_per_eviction_run.min(idle.len());
            idle.drain(..n).collect()
        };

        let mut kept = Vec::with_capacity(batch.len());
        for entry in batch {
            let too_old = entry.last_used.elapsed() > self.config.min_evictable_idle_time
                || self.is_expired(entry.created_at);
            if too_old {
                self.stats.evicted();
                self.destroy(entry.conn).await;
                continue;
            }
            if self.config.test_while_idle && !self.validate(&*entry.conn).await {
                self.stats.evicted();
                self.destroy(entry.conn).await;
                continue;
            }
            kept.push(entry);
        }

        {
            let mut idle = self.idle.lock();
            let rest = std::mem::take(&mut *idle);
            idle.extend(kept);
            idle.extend(rest);
        }

        self.ensure_min_idle().await;
    }

    async fn ensure_min_idle(&self) {
        loop {
            let idle = self.idle();
            let below_floor = idle < self.config.min_idle;
            let under_cap = self.config.max_idle.is_none_or(|max| idle < max);
            if !below_floor || !under_cap || self.is_closed() {
                return;
            }
            match self.create_connection().await {
                Ok(conn) => self.push_idle(conn, Instant::now()),
                Err(e) => {
                    warn!(error = %e, "Failed to open connection for idle floor");
                    return;
                }
            }
        }
    }
}

fn spawn_evictor(pool: Weak<SimpleConnectionPool>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else { break };
            if pool.is_closed() {
                break;
            }
            pool.evict().await;
        }
        debug!("Pool evictor stopped");
    });
}

#[async_trait]
impl ConnectionPool for SimpleConnectionPool {
    async fn get(&self) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(Error::pool_exhausted("pool is shut down"));
        }

        let start = Instant::now();

        let acquired = match self.config.max_wait {
            Some(limit) => tokio::time::timeout(limit, self.semaphore.acquire())
                .await
                .map_err(|_| {
                    self.stats.exhausted();
                    Error::pool_exhausted(format!(
                        "timeout waiting for connection ({}ms)",
                        limit.as_millis()
                    ))
                })?,
            None => self.semaphore.acquire().await,
        };
        let permit = acquired.map_err(|_| Error::pool_exhausted("pool is shut down"))?;

        let (conn, created_at) = match self.take_idle().await {
            Some(found) => found,
            None => self.open_validated().await?,
        };

        if conn.auto_commit() != self.config.default_auto_commit {
            if let Err(e) = conn.set_auto_commit(self.config.default_auto_commit).await {
                self.destroy(conn).await;
                return Err(e);
            }
        }

        self.stats.borrowed(start.elapsed());

        let pool: Arc<dyn ConnectionPool> = match self.self_ref.upgrade() {
            Some(pool) => pool,
            None => {
                self.destroy(conn).await;
                return Err(Error::internal("pool has been dropped"));
            }
        };

        // Handed back in return_connection
        permit.forget();

        Ok(PooledConnection::new(conn, created_at, pool))
    }

    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant) {
        self.put_back(conn, created_at).await;
        self.semaphore.add_permits(1);
    }

    fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        self.semaphore.close();

        let drained: Vec<PoolEntry> = self.idle.lock().drain(..).collect();
        for entry in drained {
            self.destroy(entry.conn).await;
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl SimpleConnectionPool {
    async fn put_back(&self, conn: Box<dyn Connection>, created_at: Instant) {
        if self.is_closed() || self.is_expired(created_at) {
            self.destroy(conn).await;
            return;
        }

        if !conn.auto_commit() {
            if let Err(e) = conn.rollback().await {
                warn!(error = %e, "Rollback on return failed, discarding connection");
                self.destroy(conn).await;
                return;
            }
        }

        if self.config.test_on_return && !self.validate(&*conn).await {
            self.destroy(conn).await;
            return;
        }

        let over_cap = self
            .config
            .max_idle
            .is_some_and(|max| self.idle() >= max);
        if over_cap {
            self.destroy(conn).await;
            return;
        }

        self.push_idle(conn, created_at);
    }
}
