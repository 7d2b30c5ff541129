//! Values, rows and catalog metadata
//!
//! [`Value`] is what the sink binds into statements. Catalog reflection
//! produces [`TableMetadata`]; each column's vendor type name is classified
//! into a [`SemanticType`], which decides how event text is converted.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bindable SQL value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// BOOLEAN
    Bool(bool),
    /// SMALLINT
    Int16(i16),
    /// INTEGER
    Int32(i32),
    /// BIGINT
    Int64(i64),
    /// REAL
    Float32(f32),
    /// DOUBLE PRECISION
    Float64(f64),
    /// NUMERIC / DECIMAL
    Decimal(Decimal),
    /// Character data
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// DATE
    Date(NaiveDate),
    /// TIME
    Time(NaiveTime),
    /// TIMESTAMP without time zone
    DateTime(NaiveDateTime),
}

impl Value {
    /// Whether this is SQL NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow character data
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of any integral value
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int16(n) => Some(n.into()),
            Self::Int32(n) => Some(n.into()),
            Self::Int64(n) => Some(n),
            Self::String(ref s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view; catalogs report flags as booleans or `YES`/`NO`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s.eq_ignore_ascii_case("yes") => Some(true),
            Self::String(s) if s.eq_ignore_ascii_case("no") => Some(false),
            other => other.as_i64().map(|n| n != 0),
        }
    }

    /// Owned text of character or UTF-8 binary data
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bytes(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    Decimal => Decimal,
    String => String,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Vendor-neutral column type used to pick a text conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    /// BOOLEAN, BIT
    Bool,
    /// SMALLINT, TINYINT
    Int16,
    /// INTEGER, MEDIUMINT
    Int32,
    /// BIGINT
    Int64,
    /// REAL, FLOAT
    Float32,
    /// DOUBLE PRECISION
    Float64,
    /// NUMERIC, DECIMAL
    Decimal,
    /// Character, UUID, JSON, INTERVAL, TIMETZ and anything unrecognised
    String,
    /// DATE
    Date,
    /// TIME
    Time,
    /// TIMESTAMP, DATETIME
    Timestamp,
    /// BYTEA, BLOB, BINARY
    Blob,
}

impl SemanticType {
    /// Classify a vendor type name as reported by the catalog.
    ///
    /// Length/precision suffixes and `UNSIGNED` are ignored, so
    /// `VARCHAR(255)` and `INT UNSIGNED` classify like their base types.
    pub fn from_native(type_name: &str) -> Self {
        let lowered = type_name.trim().to_ascii_lowercase();
        let base = lowered
            .split('(')
            .next()
            .unwrap_or_default()
            .trim_end_matches(" unsigned")
            .trim();

        match base {
            "bool" | "boolean" | "bit" => Self::Bool,
            "smallint" | "int2" | "tinyint" | "smallserial" => Self::Int16,
            "integer" | "int" | "int4" | "mediumint" | "serial" => Self::Int32,
            "bigint" | "int8" | "bigserial" => Self::Int64,
            "real" | "float4" | "float" => Self::Float32,
            "double" | "double precision" | "float8" => Self::Float64,
            "numeric" | "decimal" | "number" => Self::Decimal,
            "date" => Self::Date,
            "time" | "time without time zone" => Self::Time,
            "timestamp"
            | "timestamp without time zone"
            | "timestamp with time zone"
            | "timestamptz"
            | "datetime" => Self::Timestamp,
            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary"
            | "varbinary" => Self::Blob,
            // Bound as text; the PostgreSQL backend lets the server parse it
            "uuid" | "json" | "jsonb" | "interval" | "timetz" | "time with time zone" => {
                Self::String
            }
            _ => Self::String,
        }
    }

    /// Lowercase name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Blob => "blob",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One result row, columns in select-list order
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Pair column labels with values
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Number of columns
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column labels
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value at a position
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value of a column, label compared case-insensitively
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    /// Text of a catalog column
    pub fn text(&self, name: &str) -> Option<String> {
        self.get_by_name(name).and_then(Value::to_text)
    }

    /// Integer of a catalog column
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get_by_name(name).and_then(Value::as_i64)
    }

    /// Flag of a catalog column
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get_by_name(name).and_then(Value::as_bool)
    }
}

/// A column as reported by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    /// Name as stored in the catalog
    pub name: String,
    /// Vendor type name, e.g. `character varying` or `INT UNSIGNED`
    pub type_name: String,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// 1-based position in the table
    pub ordinal: u32,
}

impl ColumnMetadata {
    /// Nullable column at ordinal 0
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            ordinal: 0,
        }
    }

    /// Set the position
    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Conversion target for event text
    #[inline]
    pub fn semantic_type(&self) -> SemanticType {
        SemanticType::from_native(&self.type_name)
    }
}

/// A table as reported by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    /// Owning schema (the database on MySQL)
    pub schema: Option<String>,
    /// Name as stored in the catalog
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Table without schema or columns
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Set the owning schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column; columns stay sorted by ordinal
    pub fn with_column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self.columns.sort_by_key(|c| c.ordinal);
        self
    }

    /// `schema.name`, or `name` without a schema
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }

    /// Position of a column in `columns`.
    ///
    /// An exact name match wins; otherwise the first case-insensitive match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    /// Column by name, same matching as [`Self::column_index`]
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Column names in ordinal order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_flags() {
        assert_eq!(Value::from("YES").as_bool(), Some(true));
        assert_eq!(Value::from("no").as_bool(), Some(false));
        assert_eq!(Value::Bool(false).as_bool(), Some(false));
        assert_eq!(Value::Int16(1).as_bool(), Some(true));
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn test_catalog_integers() {
        assert_eq!(Value::Int32(42).as_i64(), Some(42));
        assert_eq!(Value::from(" 7 ").as_i64(), Some(7));
        assert_eq!(Value::Float64(1.0).as_i64(), None);
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::from("a").to_text(), Some("a".into()));
        assert_eq!(Value::Bytes(b"utf8".to_vec()).to_text(), Some("utf8".into()));
        assert_eq!(Value::Bytes(vec![0xff]).to_text(), None);
        assert_eq!(Value::Int32(1).to_text(), None);
    }

    #[test]
    fn test_row_catalog_accessors() {
        let row = Row::new(
            vec!["COLUMN_NAME".into(), "ORDINAL_POSITION".into(), "IS_NULLABLE".into()],
            vec![Value::from("id"), Value::Int64(1), Value::from("NO")],
        );

        assert_eq!(row.text("column_name").as_deref(), Some("id"));
        assert_eq!(row.integer("ordinal_position"), Some(1));
        assert_eq!(row.flag("is_nullable"), Some(false));
        assert_eq!(row.text("missing"), None);
    }

    #[test]
    fn test_column_lookup_prefers_exact_case() {
        let table = TableMetadata::new("events")
            .with_column(ColumnMetadata::new("Id", "integer").with_ordinal(1))
            .with_column(ColumnMetadata::new("id", "bigint").with_ordinal(2));

        assert_eq!(table.column("id").map(|c| c.ordinal), Some(2));
        assert_eq!(table.column("ID").map(|c| c.ordinal), Some(1));
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_qualified_name() {
        let table = TableMetadata::new("events").with_schema("public");
        assert_eq!(table.qualified_name(), "public.events");
        assert_eq!(TableMetadata::new("events").qualified_name(), "events");
    }
}
