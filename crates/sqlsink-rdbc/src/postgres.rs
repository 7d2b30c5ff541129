//! PostgreSQL backend implementation for sqlsink-rdbc
//!
//! Provides:
//! - Connection with JDBC-style auto-commit and explicit commit/rollback
//! - Parameter binding that adapts values to the server-inferred type
//! - Catalog access through `information_schema`

use async_trait::async_trait;
use bytes::BytesMut;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};
use tracing::{debug, warn};

use crate::connection::{AffectedRows, Connection, ConnectionConfig, ConnectionFactory};
use crate::driver::normalize_url;
use crate::error::{BoxError, Error, Result};
use crate::schema::SchemaProvider;
use crate::types::{ColumnMetadata, Row, TableMetadata, Value};

/// Binds a [`Value`] to whatever type the server inferred for the parameter.
///
/// Integers are narrowed or widened to the target integer width, floats to
/// the target float width, and NULL is accepted for every type. Text bound
/// to a type without a binary `String` encoding (uuid, json, jsonb, timetz,
/// interval, enums, numbers) is sent in text format for the server to parse.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql_checked(ty, out),
            Value::Int16(n) => int_to_sql(i64::from(*n), ty, out),
            Value::Int32(n) => int_to_sql(i64::from(*n), ty, out),
            Value::Int64(n) => int_to_sql(*n, ty, out),
            Value::Float32(n) => match *ty {
                Type::FLOAT8 => f64::from(*n).to_sql_checked(ty, out),
                _ => n.to_sql_checked(ty, out),
            },
            Value::Float64(n) => match *ty {
                Type::FLOAT4 => (*n as f32).to_sql_checked(ty, out),
                _ => n.to_sql_checked(ty, out),
            },
            Value::Decimal(d) => d.to_sql_checked(ty, out),
            Value::String(s) if sent_as_text(ty) => {
                out.extend_from_slice(s.as_bytes());
                Ok(IsNull::No)
            }
            Value::String(s) => s.to_sql_checked(ty, out),
            Value::Bytes(b) => b.to_sql_checked(ty, out),
            Value::Date(d) => d.to_sql_checked(ty, out),
            Value::Time(t) => t.to_sql_checked(ty, out),
            Value::DateTime(dt) => match *ty {
                Type::TIMESTAMPTZ => dt.and_utc().to_sql_checked(ty, out),
                _ => dt.to_sql_checked(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, ty: &Type) -> Format {
        match self.0 {
            Value::String(_) if sent_as_text(ty) => Format::Text,
            _ => Format::Binary,
        }
    }

    to_sql_checked!();
}

fn sent_as_text(ty: &Type) -> bool {
    !<String as ToSql>::accepts(ty)
}

fn int_to_sql(n: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(n)?.to_sql_checked(ty, out),
        Type::INT4 => i32::try_from(n)?.to_sql_checked(ty, out),
        Type::NUMERIC => Decimal::from(n).to_sql_checked(ty, out),
        _ => n.to_sql_checked(ty, out),
    }
}

fn bind(params: &[Value]) -> Vec<PgParam<'_>> {
    params.iter().map(PgParam).collect()
}

fn as_refs<'a>(params: &'a [PgParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Read column `idx` as `T`; decode failures read as NULL
fn read<'a, T>(row: &'a tokio_postgres::Row, idx: usize, wrap: impl FnOnce(T) -> Value) -> Value
where
    T: tokio_postgres::types::FromSql<'a>,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => Value::Null,
        Err(e) => {
            debug!(column = idx, error = %e, "undecodable column read as NULL");
            Value::Null
        }
    }
}

fn decode_column(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    match *ty {
        Type::BOOL => read(row, idx, Value::Bool),
        Type::INT2 => read(row, idx, Value::Int16),
        Type::INT4 => read(row, idx, Value::Int32),
        Type::INT8 => read(row, idx, Value::Int64),
        Type::FLOAT4 => read(row, idx, Value::Float32),
        Type::FLOAT8 => read(row, idx, Value::Float64),
        Type::NUMERIC => read(row, idx, Value::Decimal),
        Type::BYTEA => read(row, idx, Value::Bytes),
        Type::DATE => read(row, idx, Value::Date),
        Type::TIME => read(row, idx, Value::Time),
        Type::TIMESTAMP => read(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => read(row, idx, |ts: chrono::DateTime<chrono::Utc>| {
            Value::DateTime(ts.naive_utc())
        }),
        _ => read(row, idx, Value::String),
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Row {
    let (names, values) = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| (col.name().to_string(), decode_column(row, idx, col.type_())))
        .unzip();
    Row::new(names, values)
}

/// Session on a tokio-postgres client.
///
/// With auto-commit off, a `BEGIN` is sent lazily before the first
/// statement and ended by `commit` or `rollback`.
pub struct PgConnection {
    client: tokio_postgres::Client,
    closed: AtomicBool,
    auto_commit: AtomicBool,
    /// A BEGIN has been sent and not yet ended
    in_transaction: AtomicBool,
}

impl PgConnection {
    /// Wrap a connected client; auto-commit starts on
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
            auto_commit: AtomicBool::new(true),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Driver client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }

    /// Open a transaction before the first statement when auto-commit is off
    async fn begin_if_needed(&self) -> Result<()> {
        if self.auto_commit.load(Ordering::Acquire) || self.in_transaction.load(Ordering::Acquire)
        {
            return Ok(());
        }
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::transaction_with_source("failed to begin transaction", e))?;
        self.in_transaction.store(true, Ordering::Release);
        Ok(())
    }

    async fn end_transaction(&self, statement: &str) -> Result<()> {
        if !self.in_transaction.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| Error::transaction_with_source(format!("{} failed", statement), e))
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        self.begin_if_needed().await?;

        let bound = bind(params);
        let pg_rows = self
            .client
            .query(sql, &as_refs(&bound))
            .await
            .map_err(|e| Error::statement(sql, e))?;

        Ok(pg_rows.iter().map(decode_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        self.begin_if_needed().await?;

        let bound = bind(params);
        self.client
            .execute(sql, &as_refs(&bound))
            .await
            .map_err(|e| Error::statement(sql, e))
    }

    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<Vec<AffectedRows>> {
        self.ensure_open()?;
        self.begin_if_needed().await?;

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| Error::statement(sql, e))?;

        let mut results = Vec::with_capacity(rows.len());
        for params in rows {
            let bound = bind(params);
            let affected = self
                .client
                .execute(&statement, &as_refs(&bound))
                .await
                .map_err(|e| Error::statement(sql, e))?;
            results.push(AffectedRows::Count(affected));
        }
        Ok(results)
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        if enabled && self.in_transaction.load(Ordering::Acquire) {
            self.end_transaction("COMMIT").await?;
        }
        self.auto_commit.store(enabled, Ordering::Release);
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Acquire)
    }

    async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        self.end_transaction("ROLLBACK").await
    }

    async fn is_valid(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        if self.in_transaction.load(Ordering::Acquire) && !self.client.is_closed() {
            if let Err(e) = self.end_transaction("ROLLBACK").await {
                debug!(error = %e, "Rollback on close failed");
            }
        }
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

const LIST_TABLES_SQL: &str = "SELECT table_name::text AS table_name \
     FROM information_schema.tables \
     WHERE table_schema::text = COALESCE($1::text, current_schema()::text) \
       AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

const LIST_COLUMNS_SQL: &str = r#"SELECT
        c.table_schema::text AS table_schema,
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        (c.is_nullable = 'YES') AS nullable,
        c.ordinal_position::int4 AS ordinal_position
    FROM information_schema.columns c
    WHERE c.table_schema::text = COALESCE($1::text, current_schema()::text)
      AND c.table_name::text = $2::text
    ORDER BY c.ordinal_position"#;

#[async_trait]
impl SchemaProvider for PgConnection {
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = Value::from(schema.map(str::to_string));
        Ok(self
            .query(LIST_TABLES_SQL, &[schema])
            .await?
            .iter()
            .filter_map(|r| r.text("table_name"))
            .collect())
    }

    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>> {
        let params = [Value::from(schema.map(str::to_string)), Value::from(table)];
        let rows = self.query(LIST_COLUMNS_SQL, &params).await?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let mut meta = TableMetadata::new(table);
        meta.schema = first.text("table_schema");
        meta.columns = rows
            .iter()
            .map(|row| {
                ColumnMetadata::new(
                    row.text("column_name").unwrap_or_default(),
                    row.text("data_type").unwrap_or_default(),
                )
                .with_nullable(row.flag("nullable").unwrap_or(true))
                .with_ordinal(row.integer("ordinal_position").unwrap_or(0) as u32)
            })
            .collect();
        Ok(Some(meta))
    }
}

/// Opens [`PgConnection`]s without TLS
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut settings: tokio_postgres::Config = normalize_url(&config.url)
            .parse()
            .map_err(|e| Error::config(format!("bad PostgreSQL URL: {}", e)))?;
        settings
            .application_name("sqlsink")
            .connect_timeout(config.connect_timeout);
        if let Some(user) = config.username.as_deref() {
            settings.user(user);
        }
        if let Some(password) = config.expose_password() {
            settings.password(password);
        }

        let connecting = settings.connect(tokio_postgres::NoTls);
        let (client, driver) = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(Error::connection_with_source("PostgreSQL connect failed", e)),
            Err(_) => {
                return Err(Error::timeout(format!(
                    "PostgreSQL connect exceeded {:?}",
                    config.connect_timeout
                )))
            }
        };

        // The driver half owns the socket and must be polled
        tokio::spawn(async move {
            if let Err(e) = driver.await {
                warn!(error = %e, "PostgreSQL session ended with error");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
