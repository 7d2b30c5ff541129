//! Sink configuration
//!
//! Configuration arrives as a flat string map ([`SinkContext`]), the shape a
//! host agent hands to its sinks. The binary builds one from a YAML file;
//! nested YAML mappings are flattened into dotted keys, so
//!
//! ```yaml
//! driver: org.postgresql.Driver
//! connectionString: jdbc:postgresql://localhost:5432/logs
//! sqlDialect: POSTGRES
//! table: access_log
//! batchSize: 100
//! dbcp:
//!   maxActive: 4
//!   maxWait: 5000
//! ```
//!
//! yields `dbcp.maxActive = "4"` and `dbcp.maxWait = "5000"`.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde_yaml::Value as YamlValue;
use sqlsink_rdbc::dialect::Dialect;

use crate::error::{Result, SinkError};
use crate::parser::{EventParser, DEFAULT_DELIMITER, DEFAULT_KEY_VALUE_SEPARATOR};

/// Required: driver identifier
pub const DRIVER: &str = "driver";
/// Required: database URL
pub const CONNECTION_STRING: &str = "connectionString";
/// Optional: user name
pub const USERNAME: &str = "username";
/// Optional: password
pub const PASSWORD: &str = "password";
/// Required: SQL dialect name
pub const SQL_DIALECT: &str = "sqlDialect";
/// Mapping mode target table
pub const TABLE: &str = "table";
/// Template mode statement
pub const SQL: &str = "sql";
/// Maximum events per batch
pub const BATCH_SIZE: &str = "batchSize";
/// Primary delimiter of mapped event bodies
pub const PARSER_DELIMITER: &str = "parser.delimiter";
/// Key/value separator of mapped event bodies
pub const PARSER_KEY_VALUE_SEPARATOR: &str = "parser.keyValueSeparator";
/// Prefix of pool tuning parameters
pub const POOL_PREFIX: &str = "dbcp.";

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Flat key/value configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkContext {
    params: BTreeMap<String, String>,
}

impl SinkContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    /// Insert or replace a parameter
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Raw string value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Trimmed value, `None` when absent or blank
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get_string(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Integer value; a present but unparsable value is a configuration error
    pub fn get_integer(&self, key: &str) -> Result<Option<i64>> {
        self.get_parsed(key)
    }

    /// Boolean value; a present but unparsable value is a configuration error
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_parsed(key)
    }

    fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_non_empty(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e| {
                SinkError::config(format!("invalid value '{}' for '{}': {}", raw, key, e))
            }),
        }
    }

    /// Parameters under `prefix`, with the prefix stripped
    pub fn sub_properties(&self, prefix: &str) -> SinkContext {
        let params = self
            .params
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect();
        SinkContext { params }
    }

    /// Iterate over all parameters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the context is empty
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Build a context from YAML text.
    ///
    /// The document must be a mapping. Scalars are stringified, nested
    /// mappings flatten into dotted keys and nulls are skipped.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let doc: YamlValue = serde_yaml::from_str(text)
            .map_err(|e| SinkError::config(format!("invalid YAML: {}", e)))?;
        let mut ctx = SinkContext::new();
        match doc {
            YamlValue::Mapping(_) => flatten_yaml(&mut ctx, "", &doc)?,
            YamlValue::Null => {}
            _ => return Err(SinkError::config("configuration must be a YAML mapping")),
        }
        Ok(ctx)
    }

    /// Build a context from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SinkError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SinkContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let params = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        SinkContext { params }
    }
}

fn flatten_yaml(ctx: &mut SinkContext, prefix: &str, value: &YamlValue) -> Result<()> {
    match value {
        YamlValue::Mapping(map) => {
            for (k, v) in map {
                let key = scalar_to_string(k)
                    .ok_or_else(|| SinkError::config("YAML keys must be scalars"))?;
                let full = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_yaml(ctx, &full, v)?;
            }
        }
        YamlValue::Null => {}
        YamlValue::Sequence(_) => {
            return Err(SinkError::config(format!(
                "sequence values are not supported ('{}')",
                prefix
            )))
        }
        YamlValue::Tagged(tagged) => flatten_yaml(ctx, prefix, &tagged.value)?,
        scalar => {
            if let Some(text) = scalar_to_string(scalar) {
                ctx.put(prefix, text);
            }
        }
    }
    Ok(())
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// How statements are produced for a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMode {
    /// Parse bodies and map fields onto this table's columns
    Mapping {
        /// Configured table name, resolved against the catalog
        table: String,
    },
    /// Bind placeholders of a user statement
    Template {
        /// SQL with `${...}` placeholders
        sql: String,
    },
}

/// Validated sink settings
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// SQL dialect used to render statements
    pub dialect: Dialect,
    /// Mapping or template mode
    pub mode: QueryMode,
    /// Maximum events per batch
    pub batch_size: usize,
    /// Body parser for mapping mode
    pub parser: EventParser,
}

impl SinkConfig {
    /// Validate the sink keys of a context.
    ///
    /// Connection keys are validated by the pool manager.
    pub fn from_context(ctx: &SinkContext) -> Result<Self> {
        let dialect_name = ctx
            .get_non_empty(SQL_DIALECT)
            .ok_or_else(|| SinkError::config(format!("'{}' is required", SQL_DIALECT)))?;
        let dialect = Dialect::from_str(dialect_name).map_err(|e| SinkError::config(e.to_string()))?;

        let mode = match (ctx.get_non_empty(SQL), ctx.get_non_empty(TABLE)) {
            (Some(sql), table) => {
                if table.is_some() {
                    tracing::warn!("Both '{}' and '{}' are set, using '{}'", SQL, TABLE, SQL);
                }
                QueryMode::Template {
                    sql: sql.to_string(),
                }
            }
            (None, Some(table)) => QueryMode::Mapping {
                table: table.to_string(),
            },
            (None, None) => {
                return Err(SinkError::config(format!(
                    "one of '{}' or '{}' is required",
                    TABLE, SQL
                )))
            }
        };

        let batch_size = match ctx.get_integer(BATCH_SIZE)? {
            None => DEFAULT_BATCH_SIZE,
            Some(n) if n >= 1 => usize::try_from(n)
                .map_err(|_| SinkError::config(format!("'{}' is too large", BATCH_SIZE)))?,
            Some(n) => {
                return Err(SinkError::config(format!(
                    "'{}' must be at least 1, got {}",
                    BATCH_SIZE, n
                )))
            }
        };

        // Delimiters are taken verbatim so that a single space is usable
        let delimiter = ctx.get_string(PARSER_DELIMITER).unwrap_or(DEFAULT_DELIMITER);
        let separator = ctx
            .get_string(PARSER_KEY_VALUE_SEPARATOR)
            .unwrap_or(DEFAULT_KEY_VALUE_SEPARATOR);
        if delimiter.is_empty() || separator.is_empty() {
            return Err(SinkError::config("parser delimiters must not be empty"));
        }
        if delimiter == separator {
            return Err(SinkError::config(
                "parser delimiter and key/value separator must differ",
            ));
        }

        Ok(Self {
            dialect,
            mode,
            batch_size,
            parser: EventParser::new(delimiter, separator),
        })
    }
}
