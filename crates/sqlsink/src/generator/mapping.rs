//! Schema-reflective INSERT generation
//!
//! Each event body is parsed into fields, fields are matched to the columns
//! of the target table and converted to the column types. Rows are written
//! with multi-row INSERTs, one statement per run of consecutive rows that
//! fill the same columns. Runs too large for the dialect's bind-parameter
//! limit are split over several statements.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use sqlsink_rdbc::connection::Connection;
use sqlsink_rdbc::dialect::Dialect;
use sqlsink_rdbc::error::Error as RdbcError;
use sqlsink_rdbc::types::{TableMetadata, Value};

use super::QueryGenerator;
use crate::coerce::coerce;
use crate::error::{Result, SinkError};
use crate::event::Event;
use crate::parser::EventParser;

/// Column index (ordinal order) to bound value
type MappedRow = BTreeMap<usize, Value>;

/// Inserts key/value events into a reflected table
#[derive(Debug, Clone)]
pub struct MappingQueryGenerator {
    dialect: Dialect,
    table: TableMetadata,
    parser: EventParser,
}

impl MappingQueryGenerator {
    /// Resolve `table` through the catalog of `conn`.
    ///
    /// The name is matched case-insensitively; an unknown table is a
    /// configuration error.
    pub async fn new(
        conn: &dyn Connection,
        dialect: Dialect,
        table: &str,
        parser: EventParser,
    ) -> Result<Self> {
        let metadata = conn.resolve_table(table).await.map_err(|e| match e {
            RdbcError::TableNotFound { .. } => SinkError::config(e.to_string()),
            other => SinkError::Database(other),
        })?;

        if metadata.columns.is_empty() {
            warn!(table = %metadata.qualified_name(), "Target table reports no columns");
        }
        debug!(
            table = %metadata.qualified_name(),
            columns = ?metadata.column_names(),
            "Resolved target table"
        );

        Ok(Self::from_table(dialect, metadata, parser))
    }

    /// Build from already reflected metadata
    pub fn from_table(dialect: Dialect, table: TableMetadata, parser: EventParser) -> Self {
        Self {
            dialect,
            table,
            parser,
        }
    }

    /// The resolved table
    pub fn table(&self) -> &TableMetadata {
        &self.table
    }

    fn map_event(&self, event: &Event) -> MappedRow {
        let mut row = MappedRow::new();
        for (key, raw) in self.parser.parse(event.body()) {
            let Some(index) = self.table.column_index(&key) else {
                trace!(field = %key, table = %self.table.name, "No column for field, skipping it");
                continue;
            };
            let column = &self.table.columns[index];
            let value = match coerce(&raw, column.semantic_type()) {
                Ok(value) => value,
                Err(e) => {
                    warn!(column = %column.name, error = %e, "Binding NULL for unconvertible field");
                    Value::Null
                }
            };
            row.insert(index, value);
        }
        row
    }

    async fn insert_run(&self, conn: &dyn Connection, rows: &[MappedRow]) -> Result<u64> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let columns: Vec<&str> = first
            .keys()
            .map(|&i| self.table.columns[i].name.as_str())
            .collect();
        let sql = self.dialect.insert_sql(
            self.table.schema.as_deref(),
            &self.table.name,
            &columns,
            rows.len(),
        );
        let params: Vec<Value> = rows
            .iter()
            .flat_map(|row| row.values().cloned())
            .collect();

        trace!(sql = %sql, rows = rows.len(), "Executing insert");
        Ok(conn.execute(&sql, &params).await?)
    }
}

#[async_trait]
impl QueryGenerator for MappingQueryGenerator {
    async fn execute_batch(&self, conn: &dyn Connection, events: &[Event]) -> Result<bool> {
        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            let row = self.map_event(event);
            if row.is_empty() {
                debug!(table = %self.table.name, "Event maps to no columns, skipping it");
                continue;
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Ok(true);
        }

        let mapped = rows.len() as u64;
        let mut inserted = 0;
        let mut start = 0;
        while start < rows.len() {
            let mut end = start + 1;
            while end < rows.len() && rows[end].keys().eq(rows[start].keys()) {
                end += 1;
            }
            let per_statement = self.dialect.rows_per_statement(rows[start].len());
            for chunk in rows[start..end].chunks(per_statement) {
                inserted += self.insert_run(conn, chunk).await?;
            }
            start = end;
        }

        if mapped != inserted {
            warn!(
                table = %self.table.qualified_name(),
                mapped,
                inserted,
                "Inserted row count does not match mapped events"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("mapping into {}", self.table.qualified_name())
    }
}
