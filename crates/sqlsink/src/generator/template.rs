//! Templated statements
//!
//! A template is ordinary SQL with typed placeholders:
//!
//! ```text
//! INSERT INTO t (msg, id) VALUES (${body:string}, ${header.id:integer})
//! ```
//!
//! Placeholders are parsed once and rewritten to the dialect's positional
//! parameters; each event then supplies one parameter row.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{trace, warn};

use sqlsink_rdbc::connection::Connection;
use sqlsink_rdbc::dialect::Dialect;
use sqlsink_rdbc::types::{SemanticType, Value};

use super::QueryGenerator;
use crate::coerce::coerce;
use crate::error::{Result, SinkError};
use crate::event::Event;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern is valid")
});

/// Where a placeholder reads its text from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderSource {
    /// The event body as UTF-8 text
    Body,
    /// A named event header
    Header(String),
}

/// A parsed `${source:type}` placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Value source
    pub source: PlaceholderSource,
    /// Declared type
    pub semantic_type: SemanticType,
}

impl Placeholder {
    fn parse(spec: &str) -> Result<Self> {
        let malformed = || {
            SinkError::config(format!(
                "malformed placeholder '${{{}}}', expected ${{body:<type>}} or ${{header.<name>:<type>}}",
                spec
            ))
        };

        let (source, type_name) = spec.rsplit_once(':').ok_or_else(malformed)?;
        let source = source.trim();
        let source = if source.eq_ignore_ascii_case("body") {
            PlaceholderSource::Body
        } else {
            match source.split_once('.') {
                Some((prefix, name)) if prefix.eq_ignore_ascii_case("header") && !name.is_empty() => {
                    PlaceholderSource::Header(name.to_string())
                }
                _ => return Err(malformed()),
            }
        };

        let semantic_type = template_type(type_name.trim()).ok_or_else(|| {
            SinkError::config(format!(
                "unknown type '{}' in placeholder '${{{}}}'",
                type_name.trim(),
                spec
            ))
        })?;

        Ok(Self {
            source,
            semantic_type,
        })
    }

    fn bind(&self, event: &Event) -> Value {
        let raw = match &self.source {
            PlaceholderSource::Body => event.body_text(),
            PlaceholderSource::Header(name) => match event.header(name) {
                Some(value) => value.to_string(),
                None => {
                    trace!(header = %name, "Header missing, binding NULL");
                    return Value::Null;
                }
            },
        };
        coerce(&raw, self.semantic_type).unwrap_or_else(|e| {
            warn!(source = ?self.source, error = %e, "Binding NULL for unconvertible value");
            Value::Null
        })
    }
}

/// Type names accepted in placeholders (case-insensitive)
pub fn template_type(name: &str) -> Option<SemanticType> {
    let ty = match name.to_ascii_lowercase().as_str() {
        "string" | "varchar" | "text" | "char" => SemanticType::String,
        "integer" | "int" => SemanticType::Int32,
        "long" | "bigint" => SemanticType::Int64,
        "smallint" | "short" => SemanticType::Int16,
        "boolean" | "bool" => SemanticType::Bool,
        "float" | "real" => SemanticType::Float32,
        "double" => SemanticType::Float64,
        "decimal" | "numeric" => SemanticType::Decimal,
        "timestamp" | "datetime" => SemanticType::Timestamp,
        "date" => SemanticType::Date,
        "time" => SemanticType::Time,
        "binary" | "varbinary" | "blob" | "bytes" => SemanticType::Blob,
        _ => return None,
    };
    Some(ty)
}

/// Executes a user statement once per event
#[derive(Debug, Clone)]
pub struct TemplateQueryGenerator {
    template: String,
    sql: String,
    placeholders: Vec<Placeholder>,
}

impl TemplateQueryGenerator {
    /// Parse `template` and render it for `dialect`
    pub fn new(dialect: Dialect, template: &str) -> Result<Self> {
        let mut placeholders = Vec::new();
        let mut failure = None;

        let sql = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
            match Placeholder::parse(&caps[1]) {
                Ok(p) => placeholders.push(p),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
            dialect.placeholder(placeholders.len())
        });
        if let Some(e) = failure {
            return Err(e);
        }
        if sql.contains("${") {
            return Err(SinkError::config(format!(
                "unterminated placeholder in statement '{}'",
                template
            )));
        }

        Ok(Self {
            template: template.to_string(),
            sql: sql.into_owned(),
            placeholders,
        })
    }

    /// The statement as configured
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The statement with positional parameters
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parsed placeholders, in parameter order
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Parameter row for one event
    pub fn bind(&self, event: &Event) -> Vec<Value> {
        self.placeholders.iter().map(|p| p.bind(event)).collect()
    }
}

#[async_trait]
impl QueryGenerator for TemplateQueryGenerator {
    async fn execute_batch(&self, conn: &dyn Connection, events: &[Event]) -> Result<bool> {
        if events.is_empty() {
            return Ok(true);
        }

        let rows: Vec<Vec<Value>> = events.iter().map(|e| self.bind(e)).collect();
        trace!(sql = %self.sql, rows = rows.len(), "Executing templated batch");
        let results = conn.execute_batch(&self.sql, &rows).await?;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        if results.len() != rows.len() || failed > 0 {
            warn!(
                expected = rows.len(),
                reported = results.len(),
                failed,
                "Templated batch did not affect every row"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("template '{}'", self.template)
    }
}
