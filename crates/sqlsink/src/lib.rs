//! sqlsink - transactional batch sink from an event channel into SQL
//!
//! # Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────────────────────────────────┐   ┌──────────┐
//! │ Channel │──▶│ SqlSink (batch driver)                   │──▶│ Database │
//! │  (tx)   │   │  parser → coercer → mapping | template   │   │  (tx)    │
//! └─────────┘   │  PoolManager ── SimpleConnectionPool     │   └──────────┘
//!               └──────────────────────────────────────────┘
//! ```
//!
//! Each `process` call takes up to `batchSize` events inside a channel
//! transaction, writes them on one pooled connection, commits the database
//! and then the channel. Any failure rolls both back.
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use sqlsink::prelude::*;
//!
//! let channel = Arc::new(MemoryChannel::new("logs"));
//! let pool = Arc::new(PoolManager::with_default_drivers());
//! let sink = SqlSink::new("logs-sink", channel.clone(), pool);
//!
//! let ctx = SinkContext::new()
//!     .with("driver", "org.postgresql.Driver")
//!     .with("connectionString", "jdbc:postgresql://localhost/logs")
//!     .with("sqlDialect", "POSTGRES")
//!     .with("table", "access_log");
//! sink.configure(&ctx).await?;
//! sink.start().await?;
//!
//! channel.offer(Event::with_body("host=web1|status=200"))?;
//! assert_eq!(sink.process().await?, Status::Ready);
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! tail -F access.log | sqlsink --config sink.yaml
//! ```

pub mod channel;
pub mod coerce;
pub mod config;
pub mod counters;
pub mod error;
pub mod event;
pub mod generator;
pub mod parser;
pub mod pool;
pub mod sink;

pub use error::{Result, SinkError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::{Channel, ChannelTransaction, MemoryChannel};
    pub use crate::coerce::{coerce, CoercionError};
    pub use crate::config::{QueryMode, SinkConfig, SinkContext};
    pub use crate::counters::{CountersSnapshot, SinkCounters};
    pub use crate::error::{Result, SinkError};
    pub use crate::event::Event;
    pub use crate::generator::{MappingQueryGenerator, QueryGenerator, TemplateQueryGenerator};
    pub use crate::parser::{EventParser, ParsedEvent};
    pub use crate::pool::PoolManager;
    pub use crate::sink::{SinkState, SqlSink, Status};

    pub use std::sync::Arc;
}
