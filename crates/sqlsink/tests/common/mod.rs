//! Shared test doubles: an in-memory database behind the connection traits

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use sqlsink::prelude::*;
use sqlsink_rdbc::connection::{AffectedRows, Connection, ConnectionConfig, ConnectionFactory};
use sqlsink_rdbc::driver::DriverRegistry;
use sqlsink_rdbc::error::{Error as DbError, Result as DbResult};
use sqlsink_rdbc::schema::SchemaProvider;
use sqlsink_rdbc::types::{ColumnMetadata, Row, TableMetadata, Value};

/// One executed statement
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Scripted in-memory database
#[derive(Default)]
pub struct MockDatabase {
    tables: Mutex<Vec<TableMetadata>>,
    committed: Mutex<Vec<Executed>>,
    /// Statements binding this value fail
    reject_value: Mutex<Option<Value>>,
    /// Reported count for every `execute`
    affected_override: Mutex<Option<u64>>,
    /// `execute_batch` reports unknown counts
    batch_unknown: AtomicBool,
    /// `execute` panics
    panic_on_execute: AtomicBool,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub statements: AtomicUsize,
}

impl MockDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_table(self: Arc<Self>, table: TableMetadata) -> Arc<Self> {
        self.tables.lock().push(table);
        self
    }

    pub fn reject_value(&self, value: Value) {
        *self.reject_value.lock() = Some(value);
    }

    pub fn override_affected(&self, count: u64) {
        *self.affected_override.lock() = Some(count);
    }

    pub fn report_unknown_batch_counts(&self) {
        self.batch_unknown.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_execute(&self) {
        self.panic_on_execute.store(true, Ordering::SeqCst);
    }

    /// Statements that reached a commit
    pub fn committed(&self) -> Vec<Executed> {
        self.committed.lock().clone()
    }

    /// Bound rows of committed statements, split by column count
    pub fn committed_rows(&self, columns: usize) -> Vec<Vec<Value>> {
        self.committed()
            .into_iter()
            .flat_map(|e| {
                e.params
                    .chunks(columns.max(1))
                    .map(<[Value]>::to_vec)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    fn check(&self, sql: &str, params: &[Value]) -> DbResult<()> {
        if self.panic_on_execute.load(Ordering::SeqCst) {
            panic!("driver blew up");
        }
        self.statements.fetch_add(1, Ordering::SeqCst);
        if let Some(bad) = self.reject_value.lock().as_ref() {
            if params.contains(bad) {
                return Err(DbError::query_with_sql("constraint violation", sql));
            }
        }
        Ok(())
    }
}

/// Rows in a rendered INSERT
fn rows_in(sql: &str) -> u64 {
    if sql.contains("UNION ALL") {
        sql.matches("UNION ALL").count() as u64 + 1
    } else {
        sql.matches("), (").count() as u64 + 1
    }
}

pub struct MockConnection {
    db: Arc<MockDatabase>,
    staged: Mutex<Vec<Executed>>,
    auto_commit: AtomicBool,
}

impl MockConnection {
    fn record(&self, sql: &str, params: &[Value]) {
        let executed = Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        if self.auto_commit.load(Ordering::SeqCst) {
            self.db.committed.lock().push(executed);
        } else {
            self.staged.lock().push(executed);
        }
    }
}

#[async_trait]
impl SchemaProvider for MockConnection {
    async fn list_tables(&self, _schema: Option<&str>) -> DbResult<Vec<String>> {
        Ok(self.db.tables.lock().iter().map(|t| t.name.clone()).collect())
    }

    async fn get_table(&self, _schema: Option<&str>, table: &str) -> DbResult<Option<TableMetadata>> {
        Ok(self.db.tables.lock().iter().find(|t| t.name == table).cloned())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, _sql: &str, _params: &[Value]) -> DbResult<Vec<Row>> {
        Ok(vec![Row::new(vec!["1".into()], vec![Value::Int32(1)])])
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.db.check(sql, params)?;
        self.record(sql, params);
        Ok(self.db.affected_override.lock().unwrap_or_else(|| rows_in(sql)))
    }

    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> DbResult<Vec<AffectedRows>> {
        let mut results = Vec::with_capacity(rows.len());
        for params in rows {
            self.db.check(sql, params)?;
            self.record(sql, params);
            results.push(if self.db.batch_unknown.load(Ordering::SeqCst) {
                AffectedRows::Unknown
            } else {
                AffectedRows::Count(self.db.affected_override.lock().unwrap_or(1))
            });
        }
        Ok(results)
    }

    async fn set_auto_commit(&self, enabled: bool) -> DbResult<()> {
        if enabled {
            self.commit().await?;
        }
        self.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    async fn commit(&self) -> DbResult<()> {
        let staged: Vec<Executed> = self.staged.lock().drain(..).collect();
        self.db.committed.lock().extend(staged);
        self.db.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        self.staged.lock().clear();
        self.db.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> DbResult<()> {
        self.db.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockFactory {
    pub db: Arc<MockDatabase>,
    pub refuse: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> DbResult<Box<dyn Connection>> {
        // Suspend once like a network handshake would
        tokio::task::yield_now().await;
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DbError::connection("connection refused"));
        }
        self.db.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            db: Arc::clone(&self.db),
            staged: Mutex::new(Vec::new()),
            auto_commit: AtomicBool::new(true),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Pool manager whose `mock` driver opens connections to `db`
pub fn pool_manager(db: &Arc<MockDatabase>) -> Arc<PoolManager> {
    pool_manager_with_switch(db, Arc::new(AtomicBool::new(false)))
}

/// Like [`pool_manager`], with a switch that makes connects fail
pub fn pool_manager_with_switch(db: &Arc<MockDatabase>, refuse: Arc<AtomicBool>) -> Arc<PoolManager> {
    let mut registry = DriverRegistry::new();
    registry.register(
        "mock",
        Arc::new(MockFactory {
            db: Arc::clone(db),
            refuse,
        }),
    );
    Arc::new(PoolManager::new(registry))
}

/// Connection keys for the mock driver
pub fn base_context() -> SinkContext {
    SinkContext::new()
        .with("driver", "mock")
        .with("connectionString", "mock://localhost/test")
        .with("sqlDialect", "H2")
}

/// `T(a INT, b VARCHAR)`
pub fn table_t() -> TableMetadata {
    TableMetadata::new("T")
        .with_column(ColumnMetadata::new("a", "INT").with_ordinal(1))
        .with_column(ColumnMetadata::new("b", "VARCHAR(32)").with_ordinal(2))
}

/// `LOGS(LOG_TIME TIMESTAMP, SEQ VARCHAR)`
pub fn table_logs() -> TableMetadata {
    TableMetadata::new("LOGS")
        .with_column(ColumnMetadata::new("LOG_TIME", "TIMESTAMP").with_ordinal(1))
        .with_column(ColumnMetadata::new("SEQ", "VARCHAR(16)").with_ordinal(2))
}

/// Configured and started sink over a fresh channel
pub async fn running_sink(
    db: &Arc<MockDatabase>,
    ctx: SinkContext,
) -> (SqlSink, MemoryChannel, Arc<PoolManager>) {
    let channel = MemoryChannel::new("test");
    let pool = pool_manager(db);
    let sink = SqlSink::new("test-sink", Arc::new(channel.clone()), Arc::clone(&pool));
    sink.configure(&ctx).await.expect("configure");
    sink.start().await.expect("start");
    (sink, channel, pool)
}

pub fn offer(channel: &MemoryChannel, bodies: &[&str]) {
    for body in bodies {
        channel.offer(Event::with_body(body.to_string())).expect("offer");
    }
}
