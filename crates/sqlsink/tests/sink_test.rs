//! Batch driver tests against the in-memory database

mod common;

use chrono::NaiveDate;
use common::*;
use sqlsink::prelude::*;
use sqlsink_rdbc::types::Value;
use std::sync::atomic::Ordering;

fn mapping_context(table: &str, batch_size: usize) -> SinkContext {
    base_context()
        .with("table", table)
        .with("batchSize", batch_size.to_string())
}

fn assert_no_leak(pool: &PoolManager) {
    let (total, idle) = pool.size().expect("pool initialized");
    assert_eq!(total, idle, "every borrowed connection is returned");
}

// ==================== Mapping Batch Tests ====================

#[tokio::test]
async fn test_single_event_inserted() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, pool) = running_sink(&db, mapping_context("T", 1)).await;
    offer(&channel, &["a=7|b=hi"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    assert_eq!(
        db.committed_rows(2),
        vec![vec![Value::Int32(7), Value::String("hi".into())]]
    );
    assert!(channel.is_empty());
    let counters = sink.counters().snapshot();
    assert_eq!(counters.drain_success, 1);
    assert_eq!(counters.batch_complete, 1);
    assert_no_leak(&pool);
}

#[tokio::test]
async fn test_unconvertible_field_binds_null() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, _pool) = running_sink(&db, mapping_context("T", 5)).await;
    offer(&channel, &["a=notanumber|b=x"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    assert_eq!(
        db.committed_rows(2),
        vec![vec![Value::Null, Value::String("x".into())]]
    );
    let counters = sink.counters().snapshot();
    assert_eq!(counters.batch_underflow, 1);
    assert_eq!(counters.connection_failed, 0);
}

#[tokio::test]
async fn test_compact_timestamp_column() {
    let db = MockDatabase::new().with_table(table_logs());
    let (sink, channel, _pool) = running_sink(&db, mapping_context("logs", 1)).await;
    offer(&channel, &["LOG_TIME=20150730140458|SEQ=1"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    let expected = NaiveDate::from_ymd_opt(2015, 7, 30)
        .unwrap()
        .and_hms_milli_opt(14, 4, 58, 0)
        .unwrap();
    assert_eq!(
        db.committed_rows(2),
        vec![vec![Value::DateTime(expected), Value::String("1".into())]]
    );
}

#[tokio::test]
async fn test_batch_uses_one_multi_row_insert() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, _pool) = running_sink(&db, mapping_context("T", 3)).await;
    offer(&channel, &["a=1|b=x", "a=2|b=y", "a=3|b=z"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    let committed = db.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(
        committed[0].sql,
        "INSERT INTO \"T\" (\"a\", \"b\") VALUES (?, ?), (?, ?), (?, ?)"
    );
    assert_eq!(db.commits(), 1);
    assert_eq!(sink.counters().snapshot().batch_complete, 1);
}

#[tokio::test]
async fn test_batch_size_limits_take() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, _pool) = running_sink(&db, mapping_context("T", 2)).await;
    offer(&channel, &["a=1", "a=2", "a=3"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert_eq!(channel.len(), 1);
    assert_eq!(db.committed_rows(1).len(), 2);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert!(channel.is_empty());

    let counters = sink.counters().snapshot();
    assert_eq!(counters.drain_success, 3);
    assert_eq!(counters.batch_complete, 1);
    assert_eq!(counters.batch_underflow, 1);
}

#[tokio::test]
async fn test_batch_larger_than_default_transaction_capacity() {
    let db = MockDatabase::new().with_table(table_t());
    let channel = MemoryChannel::for_batch_size("test", 5_000, 1_500);
    let pool = pool_manager(&db);
    let sink = SqlSink::new("test-sink", Arc::new(channel.clone()), Arc::clone(&pool));
    sink.configure(&mapping_context("T", 1_500)).await.unwrap();
    sink.start().await.unwrap();

    for i in 0..1_500 {
        channel.offer(Event::with_body(format!("a={}", i))).unwrap();
    }

    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert!(channel.is_empty());
    assert_eq!(db.committed_rows(1).len(), 1_500);
    assert_no_leak(&pool);
}

#[tokio::test]
async fn test_events_without_columns_are_skipped() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, _pool) = running_sink(&db, mapping_context("T", 5)).await;
    offer(&channel, &["unknown=1", "a=4|b=k"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    assert_eq!(
        db.committed_rows(2),
        vec![vec![Value::Int32(4), Value::String("k".into())]]
    );
    assert_eq!(sink.counters().snapshot().drain_success, 2);
}

// ==================== Failure Tests ====================

#[tokio::test]
async fn test_rejected_row_rolls_back_whole_batch() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, pool) = running_sink(&db, mapping_context("T", 2)).await;
    offer(&channel, &["a=1|b=ok", "a=2|b=bad"]);
    db.reject_value(Value::String("bad".into()));
    let rollbacks = db.rollbacks();

    assert_eq!(sink.process().await.unwrap(), Status::Backoff);

    assert!(db.committed().is_empty());
    assert_eq!(db.commits(), 0);
    assert!(db.rollbacks() > rollbacks);
    let pending: Vec<String> = channel.snapshot().iter().map(Event::body_text).collect();
    assert_eq!(pending, vec!["a=1|b=ok", "a=2|b=bad"]);

    let counters = sink.counters().snapshot();
    assert_eq!(counters.connection_failed, 1);
    assert_eq!(counters.drain_success, 0);
    assert_no_leak(&pool);
}

#[tokio::test]
async fn test_batch_retried_after_backoff() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, _pool) = running_sink(&db, mapping_context("T", 2)).await;
    offer(&channel, &["a=1|b=ok", "a=2|b=bad"]);
    db.reject_value(Value::String("bad".into()));
    assert_eq!(sink.process().await.unwrap(), Status::Backoff);

    db.reject_value(Value::String("never".into()));
    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    assert!(channel.is_empty());
    assert_eq!(db.committed_rows(2).len(), 2);
}

#[tokio::test]
async fn test_row_count_mismatch_rolls_back() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, _pool) = running_sink(&db, mapping_context("T", 2)).await;
    offer(&channel, &["a=1|b=x", "a=2|b=y"]);
    db.override_affected(1);

    assert_eq!(sink.process().await.unwrap(), Status::Backoff);

    assert!(db.committed().is_empty());
    assert_eq!(channel.len(), 2);
}

#[tokio::test]
async fn test_panic_is_fatal_and_rolled_back() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, pool) = running_sink(&db, mapping_context("T", 1)).await;
    offer(&channel, &["a=1|b=x"]);
    db.panic_on_execute();

    let err = sink.process().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(err.to_string().contains("driver blew up"));
    assert_eq!(channel.len(), 1);
    assert!(db.committed().is_empty());
    assert_no_leak(&pool);
}

// ==================== Template Tests ====================

#[tokio::test]
async fn test_template_binds_body_and_header() {
    let db = MockDatabase::new();
    let ctx = base_context()
        .with("sql", "INSERT INTO t VALUES(${body:string}, ${header.id:integer})")
        .with("batchSize", "1");
    let (sink, channel, _pool) = running_sink(&db, ctx).await;
    channel
        .offer(Event::with_body("hello").with_header("id", "42"))
        .unwrap();

    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    let committed = db.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].sql, "INSERT INTO t VALUES(?, ?)");
    assert_eq!(
        committed[0].params,
        vec![Value::String("hello".into()), Value::Int32(42)]
    );
}

#[tokio::test]
async fn test_template_unknown_counts_accepted() {
    let db = MockDatabase::new();
    db.report_unknown_batch_counts();
    let ctx = base_context().with("sql", "INSERT INTO t VALUES(${body:string})");
    let (sink, channel, _pool) = running_sink(&db, ctx).await;
    offer(&channel, &["one", "two"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert_eq!(db.committed().len(), 2);
}

#[tokio::test]
async fn test_template_missing_header_binds_null() {
    let db = MockDatabase::new();
    let ctx = base_context().with("sql", "INSERT INTO t VALUES(${header.id:integer})");
    let (sink, channel, _pool) = running_sink(&db, ctx).await;
    offer(&channel, &["no headers"]);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert_eq!(db.committed()[0].params, vec![Value::Null]);
}

// ==================== Lifecycle Tests ====================

#[tokio::test]
async fn test_configure_without_table_or_sql_fails() {
    let db = MockDatabase::new();
    let sink = SqlSink::new(
        "test-sink",
        Arc::new(MemoryChannel::new("test")),
        pool_manager(&db),
    );

    let err = sink.configure(&base_context()).await.unwrap_err();

    assert!(err.is_config());
    assert_eq!(sink.state().await, SinkState::Unconfigured);
}

#[tokio::test]
async fn test_configure_unknown_table_fails() {
    let db = MockDatabase::new().with_table(table_t());
    let sink = SqlSink::new(
        "test-sink",
        Arc::new(MemoryChannel::new("test")),
        pool_manager(&db),
    );

    let err = sink
        .configure(&mapping_context("missing", 1))
        .await
        .unwrap_err();

    assert!(err.is_config());
}

#[tokio::test]
async fn test_failed_reconfigure_leaves_sink_unconfigured() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, _channel, _pool) = running_sink(&db, mapping_context("T", 1)).await;
    sink.stop().await;

    let err = sink
        .configure(&mapping_context("missing", 1))
        .await
        .unwrap_err();

    assert!(err.is_config());
    assert_eq!(sink.state().await, SinkState::Unconfigured);
    assert!(matches!(
        sink.start().await,
        Err(SinkError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_bad_template_keeps_pool_and_pipeline() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, pool) = running_sink(&db, mapping_context("T", 1)).await;
    sink.stop().await;
    let opened = db.opened.load(Ordering::SeqCst);

    let err = sink
        .configure(&base_context().with("sql", "INSERT INTO t VALUES(${body:uuid})"))
        .await
        .unwrap_err();

    assert!(err.is_config());
    assert_eq!(db.opened.load(Ordering::SeqCst), opened);
    assert_eq!(db.closed.load(Ordering::SeqCst), 0);
    assert_eq!(sink.state().await, SinkState::Stopped);

    sink.start().await.unwrap();
    offer(&channel, &["a=1"]);
    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert_eq!(db.committed_rows(1), vec![vec![Value::Int32(1)]]);
    assert_no_leak(&pool);
}

#[tokio::test]
async fn test_start_before_configure_is_illegal() {
    let db = MockDatabase::new();
    let sink = SqlSink::new(
        "test-sink",
        Arc::new(MemoryChannel::new("test")),
        pool_manager(&db),
    );

    assert!(matches!(
        sink.start().await,
        Err(SinkError::IllegalState(_))
    ));
    assert!(matches!(
        sink.process().await,
        Err(SinkError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, _channel, _pool) = running_sink(&db, mapping_context("T", 1)).await;

    sink.start().await.unwrap();
    assert_eq!(sink.state().await, SinkState::Running);

    sink.stop().await;
    sink.stop().await;
    assert_eq!(sink.state().await, SinkState::Stopped);
    assert!(matches!(
        sink.process().await,
        Err(SinkError::IllegalState(_))
    ));

    sink.start().await.unwrap();
    assert_eq!(sink.state().await, SinkState::Running);
}

#[tokio::test]
async fn test_configure_while_running_is_illegal() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, _channel, _pool) = running_sink(&db, mapping_context("T", 1)).await;

    let err = sink.configure(&mapping_context("T", 2)).await.unwrap_err();
    assert!(matches!(err, SinkError::IllegalState(_)));
}

#[tokio::test]
async fn test_empty_channel_is_ready_without_commit() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, _channel, pool) = running_sink(&db, mapping_context("T", 4)).await;

    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    assert_eq!(db.commits(), 0);
    assert_eq!(db.statements(), 0);
    let counters = sink.counters().snapshot();
    assert_eq!(counters.batch_empty, 1);
    assert_eq!(counters.drain_attempt, 1);
    assert_no_leak(&pool);
}

#[tokio::test]
async fn test_closed_pool_backs_off() {
    let db = MockDatabase::new().with_table(table_t());
    let (sink, channel, pool) = running_sink(&db, mapping_context("T", 1)).await;
    pool.close().await.unwrap();
    offer(&channel, &["a=1|b=x"]);

    assert_eq!(sink.process().await.unwrap(), Status::Backoff);
    assert_eq!(channel.len(), 1);
    assert_eq!(sink.counters().snapshot().connection_failed, 1);
}
