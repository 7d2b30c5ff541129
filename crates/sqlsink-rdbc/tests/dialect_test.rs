//! Tests for sqlsink-rdbc dialect module

use sqlsink_rdbc::prelude::*;

// ==================== Parsing Tests ====================

#[test]
fn test_every_dialect_round_trips_its_name() {
    for dialect in Dialect::ALL {
        let parsed: Dialect = dialect.name().parse().unwrap();
        assert_eq!(parsed, dialect);
        assert_eq!(dialect.to_string(), dialect.name());
    }
}

#[test]
fn test_unknown_dialect_lists_choices() {
    let err = "ORACLE".parse::<Dialect>().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    let message = err.to_string();
    assert!(message.contains("ORACLE"));
    assert!(message.contains("POSTGRES"));
    assert!(message.contains("SQLITE"));
}

// ==================== Quoting Tests ====================

#[test]
fn test_backtick_dialects() {
    for dialect in [Dialect::MySql, Dialect::MariaDb, Dialect::Cubrid] {
        assert_eq!(dialect.quote_identifier("order"), "`order`");
    }
}

#[test]
fn test_double_quote_dialects() {
    for dialect in [
        Dialect::Derby,
        Dialect::Firebird,
        Dialect::H2,
        Dialect::Hsqldb,
        Dialect::Postgres,
        Dialect::Sqlite,
    ] {
        assert_eq!(dialect.quote_identifier("order"), "\"order\"");
    }
}

#[test]
fn test_quote_table_with_schema() {
    assert_eq!(
        Dialect::Postgres.quote_table(Some("public"), "events"),
        "\"public\".\"events\""
    );
    assert_eq!(Dialect::Sqlite.quote_table(None, "events"), "\"events\"");
}

// ==================== Placeholder Tests ====================

#[test]
fn test_placeholders() {
    assert_eq!(Dialect::Postgres.placeholder(1), "$1");
    assert_eq!(Dialect::Postgres.placeholder(12), "$12");
    assert_eq!(Dialect::MySql.placeholder(3), "?");
    assert_eq!(Dialect::H2.placeholder(3), "?");
}

// ==================== INSERT Rendering Tests ====================

#[test]
fn test_single_row_insert() {
    let sql = Dialect::H2.insert_sql(None, "EVENTS", &["ID", "NAME"], 1);
    assert_eq!(sql, "INSERT INTO \"EVENTS\" (\"ID\", \"NAME\") VALUES (?, ?)");
}

#[test]
fn test_multi_row_insert_is_row_major() {
    let sql = Dialect::Postgres.insert_sql(Some("s"), "t", &["a", "b", "c"], 2);
    assert_eq!(
        sql,
        "INSERT INTO \"s\".\"t\" (\"a\", \"b\", \"c\") VALUES ($1, $2, $3), ($4, $5, $6)"
    );
}

#[test]
fn test_mariadb_multi_row_insert() {
    let sql = Dialect::MariaDb.insert_sql(None, "t", &["a"], 3);
    assert_eq!(sql, "INSERT INTO `t` (`a`) VALUES (?), (?), (?)");
}

// ==================== Statement Size Tests ====================

#[test]
fn test_rows_per_statement_respects_bind_limit() {
    assert_eq!(Dialect::Postgres.rows_per_statement(2), 32_767);
    assert_eq!(Dialect::MySql.rows_per_statement(10), 6_553);
    assert_eq!(Dialect::Sqlite.rows_per_statement(2), 499);
    assert_eq!(Dialect::Sqlite.rows_per_statement(2_000), 1);
    assert_eq!(Dialect::H2.rows_per_statement(0), Dialect::H2.max_bind_params());
}
