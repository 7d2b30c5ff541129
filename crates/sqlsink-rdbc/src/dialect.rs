//! SQL dialects for sqlsink-rdbc
//!
//! The dialect is configuration-driven and only affects SQL rendering:
//! identifier quoting, positional placeholders and multi-row INSERT syntax.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// CUBRID
    Cubrid,
    /// Apache Derby
    Derby,
    /// Firebird
    Firebird,
    /// H2
    H2,
    /// HSQLDB
    Hsqldb,
    /// MariaDB
    MariaDb,
    /// MySQL
    MySql,
    /// PostgreSQL
    Postgres,
    /// SQLite
    Sqlite,
}

impl Dialect {
    /// All dialects, in configuration-name order
    pub const ALL: [Dialect; 9] = [
        Self::Cubrid,
        Self::Derby,
        Self::Firebird,
        Self::H2,
        Self::Hsqldb,
        Self::MariaDb,
        Self::MySql,
        Self::Postgres,
        Self::Sqlite,
    ];

    /// Configuration name (upper case)
    pub fn name(self) -> &'static str {
        match self {
            Self::Cubrid => "CUBRID",
            Self::Derby => "DERBY",
            Self::Firebird => "FIREBIRD",
            Self::H2 => "H2",
            Self::Hsqldb => "HSQLDB",
            Self::MariaDb => "MARIADB",
            Self::MySql => "MYSQL",
            Self::Postgres => "POSTGRES",
            Self::Sqlite => "SQLITE",
        }
    }

    /// Quote an identifier (table, column name)
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Self::MySql | Self::MariaDb | Self::Cubrid => format!("`{}`", name.replace('`', "``")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Quote a possibly schema-qualified table name
    pub fn quote_table(self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote_identifier(s), self.quote_identifier(table)),
            None => self.quote_identifier(table),
        }
    }

    /// Placeholder for the 1-based parameter `index`
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    /// Most bind parameters one statement may carry.
    ///
    /// PostgreSQL and MySQL encode the count as a `u16`; SQLite builds
    /// default to 999 host parameters.
    pub fn max_bind_params(self) -> usize {
        match self {
            Self::Postgres | Self::MySql | Self::MariaDb => 65_535,
            Self::Sqlite => 999,
            Self::Cubrid | Self::Derby | Self::Firebird | Self::H2 | Self::Hsqldb => 32_767,
        }
    }

    /// Rows of `columns` values that fit into one statement, at least one
    pub fn rows_per_statement(self, columns: usize) -> usize {
        (self.max_bind_params() / columns.max(1)).max(1)
    }

    /// Render a multi-row INSERT for `rows` rows of `columns`.
    ///
    /// Placeholders are numbered row-major, so parameters are bound as the
    /// rows concatenated in order. Firebird has no multi-row VALUES and gets
    /// a `UNION ALL` select instead.
    pub fn insert_sql(
        self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        rows: usize,
    ) -> String {
        let column_list = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let target = self.quote_table(schema, table);

        let mut index = 0;
        let mut tuples = Vec::with_capacity(rows);
        for _ in 0..rows {
            let params = columns
                .iter()
                .map(|_| {
                    index += 1;
                    self.placeholder(index)
                })
                .collect::<Vec<_>>()
                .join(", ");
            tuples.push(params);
        }

        match self {
            Self::Firebird => {
                let selects = tuples
                    .iter()
                    .map(|p| format!("SELECT {} FROM RDB$DATABASE", p))
                    .collect::<Vec<_>>()
                    .join(" UNION ALL ");
                format!("INSERT INTO {} ({}) {}", target, column_list, selects)
            }
            _ => {
                let values = tuples
                    .iter()
                    .map(|p| format!("({})", p))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("INSERT INTO {} ({}) VALUES {}", target, column_list, values)
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|d| d.name() == wanted)
            .ok_or_else(|| {
                Error::config(format!(
                    "unsupported SQL dialect '{}', expected one of: {}",
                    s,
                    Self::ALL.map(Dialect::name).join(", ")
                ))
            })
    }
}
