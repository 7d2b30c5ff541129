//! Schema discovery for sqlsink-rdbc
//!
//! Provides:
//! - SchemaProvider: read-only catalog access
//! - Case-insensitive table resolution against the catalog

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, TableMetadata};

/// Schema provider for read-only schema discovery
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// List all base tables in a schema (`None` = the connection's default)
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>>;

    /// Get table metadata, `None` if the table does not exist
    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>>;

    /// Check if a table exists
    async fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool> {
        Ok(self.get_table(schema, table).await?.is_some())
    }

    /// Get all columns for a table
    async fn get_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnMetadata>> {
        let meta = self.get_table(schema, table).await?;
        Ok(meta.map(|t| t.columns).unwrap_or_default())
    }

    /// Resolve a configured table name against the catalog.
    ///
    /// `name` may be qualified as `schema.table`. The catalog entry with the
    /// exact name wins; otherwise the first case-insensitive match is used.
    async fn resolve_table(&self, name: &str) -> Result<TableMetadata> {
        let (schema, wanted) = split_qualified(name);
        let tables = self.list_tables(schema).await?;

        let found = tables
            .iter()
            .find(|t| t.as_str() == wanted)
            .or_else(|| tables.iter().find(|t| t.eq_ignore_ascii_case(wanted)))
            .ok_or_else(|| Error::TableNotFound {
                table: name.to_string(),
            })?;

        self.get_table(schema, found)
            .await?
            .ok_or_else(|| Error::TableNotFound {
                table: name.to_string(),
            })
    }
}

/// Split `schema.table` into its parts; an unqualified name has no schema.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => (Some(schema), table),
        _ => (None, name),
    }
}
