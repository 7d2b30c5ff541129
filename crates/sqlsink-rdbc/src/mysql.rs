//! MySQL/MariaDB backend implementation for sqlsink-rdbc
//!
//! Provides:
//! - Connection with server-side `autocommit` control
//! - Prepared batch execution
//! - Catalog access through `INFORMATION_SCHEMA`

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Value as MyValue};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::connection::{AffectedRows, Connection, ConnectionConfig, ConnectionFactory};
use crate::driver::normalize_url;
use crate::error::{Error, Result};
use crate::schema::SchemaProvider;
use crate::types::{ColumnMetadata, Row, TableMetadata, Value};

fn wire_date(date: chrono::NaiveDate, time: chrono::NaiveTime) -> MyValue {
    MyValue::Date(
        date.year() as u16,
        date.month() as u8,
        date.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.nanosecond() / 1_000,
    )
}

/// Parameter encoding; DECIMAL travels as text to keep its precision
fn to_param(value: &Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(i64::from(*b)),
        Value::Int16(n) => MyValue::Int(i64::from(*n)),
        Value::Int32(n) => MyValue::Int(i64::from(*n)),
        Value::Int64(n) => MyValue::Int(*n),
        Value::Float32(n) => MyValue::Float(*n),
        Value::Float64(n) => MyValue::Double(*n),
        Value::Decimal(d) => MyValue::Bytes(d.to_string().into_bytes()),
        Value::String(s) => MyValue::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => MyValue::Bytes(b.clone()),
        Value::Date(d) => wire_date(*d, chrono::NaiveTime::MIN),
        Value::Time(t) => MyValue::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::DateTime(dt) => wire_date(dt.date(), dt.time()),
    }
}

fn bind(values: &[Value]) -> Vec<MyValue> {
    values.iter().map(to_param).collect()
}

fn from_wire(raw: MyValue) -> Value {
    match raw {
        MyValue::NULL => Value::Null,
        MyValue::Bytes(bytes) => String::from_utf8(bytes)
            .map(Value::String)
            .unwrap_or_else(|e| Value::Bytes(e.into_bytes())),
        MyValue::Int(n) => Value::Int64(n),
        MyValue::UInt(n) => match i64::try_from(n) {
            Ok(n) => Value::Int64(n),
            Err(_) => Value::String(n.to_string()),
        },
        MyValue::Float(f) => Value::Float32(f),
        MyValue::Double(d) => Value::Float64(d),
        MyValue::Date(y, mo, d, h, mi, s, us) => {
            let date = chrono::NaiveDate::from_ymd_opt(i32::from(y), u32::from(mo), u32::from(d));
            let time = chrono::NaiveTime::from_hms_micro_opt(
                u32::from(h),
                u32::from(mi),
                u32::from(s),
                us,
            );
            match (date, time) {
                (Some(date), Some(time)) if time == chrono::NaiveTime::MIN => Value::Date(date),
                (Some(date), Some(time)) => Value::DateTime(date.and_time(time)),
                _ => Value::Null,
            }
        }
        // TIME columns outside 00:00..24:00 have no NaiveTime form
        MyValue::Time(negative, days, h, mi, s, _) if negative || days > 0 => Value::String(format!(
            "{}{}:{:02}:{:02}",
            if negative { "-" } else { "" },
            days * 24 + u32::from(h),
            mi,
            s
        )),
        MyValue::Time(_, _, h, mi, s, us) => {
            chrono::NaiveTime::from_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
                .map_or(Value::Null, Value::Time)
        }
    }
}

fn decode_row(row: mysql_async::Row) -> Row {
    let names = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();
    let values = row
        .unwrap_raw()
        .into_iter()
        .map(|v| v.map_or(Value::Null, from_wire))
        .collect();
    Row::new(names, values)
}

/// Session on a mysql_async connection; auto-commit is a server setting
pub struct MySqlConnection {
    conn: Mutex<Option<Conn>>,
    auto_commit: AtomicBool,
}

impl MySqlConnection {
    /// Wrap an established connection, which starts in auto-commit mode
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            auto_commit: AtomicBool::new(true),
        }
    }

    /// Connect within `config.connect_timeout`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = driver_opts(config)?;
        match tokio::time::timeout(config.connect_timeout, Conn::new(opts)).await {
            Ok(Ok(conn)) => Ok(Self::new(conn)),
            Ok(Err(e)) => Err(Error::connection_with_source("MySQL connect failed", e)),
            Err(_) => Err(Error::timeout(format!(
                "MySQL connect exceeded {:?}",
                config.connect_timeout
            ))),
        }
    }

    async fn session(&self) -> Result<MappedMutexGuard<'_, Conn>> {
        MutexGuard::try_map(self.conn.lock().await, Option::as_mut)
            .map_err(|_| Error::connection("MySQL connection is closed"))
    }

    async fn control(&self, statement: &str) -> Result<()> {
        self.session()
            .await?
            .query_drop(statement)
            .await
            .map_err(|e| Error::transaction_with_source(format!("{} failed", statement), e))
    }
}

/// Driver options; `jdbc:` and `mariadb://` URLs are accepted
fn driver_opts(config: &ConnectionConfig) -> Result<Opts> {
    let url = normalize_url(&config.url);
    let url = url
        .strip_prefix("mariadb://")
        .map_or_else(|| url.to_string(), |rest| format!("mysql://{}", rest));
    let parsed =
        Opts::from_url(&url).map_err(|e| Error::config(format!("bad MySQL URL: {}", e)))?;

    let mut builder = OptsBuilder::from_opts(parsed);
    if let Some(user) = config.username.as_deref() {
        builder = builder.user(Some(user));
    }
    if let Some(password) = config.expose_password() {
        builder = builder.pass(Some(password));
    }
    Ok(builder.into())
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut conn = self.session().await?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, bind(params))
            .await
            .map_err(|e| Error::statement(sql, e))?;
        Ok(rows.into_iter().map(decode_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut conn = self.session().await?;
        conn.exec_drop(sql, bind(params))
            .await
            .map_err(|e| Error::statement(sql, e))?;
        Ok(conn.affected_rows())
    }

    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<Vec<AffectedRows>> {
        let mut conn = self.session().await?;
        let prepared = conn.prep(sql).await.map_err(|e| Error::statement(sql, e))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            conn.exec_drop(&prepared, bind(row))
                .await
                .map_err(|e| Error::statement(sql, e))?;
            counts.push(AffectedRows::Count(conn.affected_rows()));
        }
        Ok(counts)
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let statement = if enabled { "SET autocommit=1" } else { "SET autocommit=0" };
        self.control(statement).await?;
        self.auto_commit.store(enabled, Ordering::Release);
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Acquire)
    }

    async fn commit(&self) -> Result<()> {
        self.control("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.control("ROLLBACK").await
    }

    async fn is_valid(&self) -> bool {
        match self.session().await {
            Ok(mut conn) => conn.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        conn.disconnect()
            .await
            .map_err(|e| Error::connection_with_source("MySQL disconnect failed", e))
    }
}

const LIST_TABLES_SQL: &str = "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

const LIST_COLUMNS_SQL: &str = "SELECT TABLE_SCHEMA, COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, \
     ORDINAL_POSITION FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

#[async_trait]
impl SchemaProvider for MySqlConnection {
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = Value::from(schema.map(str::to_string));
        Ok(self
            .query(LIST_TABLES_SQL, &[schema])
            .await?
            .iter()
            .filter_map(|r| r.text("TABLE_NAME"))
            .collect())
    }

    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>> {
        let params = [Value::from(schema.map(str::to_string)), Value::from(table)];
        let rows = self.query(LIST_COLUMNS_SQL, &params).await?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let mut meta = TableMetadata::new(table);
        meta.schema = first.text("TABLE_SCHEMA");
        for row in &rows {
            meta.columns.push(
                ColumnMetadata::new(
                    row.text("COLUMN_NAME").unwrap_or_default(),
                    row.text("COLUMN_TYPE").unwrap_or_default(),
                )
                .with_nullable(row.flag("IS_NULLABLE").unwrap_or(true))
                .with_ordinal(row.integer("ORDINAL_POSITION").unwrap_or(0) as u32),
            );
        }
        Ok(Some(meta))
    }
}

/// Opens [`MySqlConnection`]s; also serves MariaDB
#[derive(Debug, Clone, Default)]
pub struct MySqlConnectionFactory;

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MySqlConnection::connect(config).await?))
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}
