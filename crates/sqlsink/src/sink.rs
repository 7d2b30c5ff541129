//! Transactional batch driver
//!
//! One call to [`SqlSink::process`] moves at most `batchSize` events from
//! the channel into the database:
//!
//! ```text
//! channel tx begin → borrow → take* → generator → db commit → channel commit
//!                       └──────── any failure ────────→ db rollback, channel rollback
//! ```
//!
//! The database commit always happens before the channel commit. A crash
//! between the two replays the batch, so delivery is at-least-once.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use sqlsink_rdbc::pool::PooledConnection;

use crate::channel::{Channel, ChannelTransaction};
use crate::config::{QueryMode, SinkConfig, SinkContext};
use crate::counters::SinkCounters;
use crate::error::{Result, SinkError};
use crate::generator::{MappingQueryGenerator, QueryGenerator, TemplateQueryGenerator};
use crate::pool::PoolManager;

/// Outcome of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The sink may be called again right away
    Ready,
    /// The batch failed; the caller should wait before retrying
    Backoff,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("READY"),
            Self::Backoff => f.write_str("BACKOFF"),
        }
    }
}

/// Lifecycle of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// `configure` has not succeeded yet
    Unconfigured,
    /// Configured, not running
    Configured,
    /// Accepting `process` calls
    Running,
    /// Stopped; `start` resumes
    Stopped,
}

#[derive(Clone)]
struct Pipeline {
    batch_size: usize,
    generator: Arc<dyn QueryGenerator>,
}

struct Inner {
    state: SinkState,
    pipeline: Option<Pipeline>,
}

/// Generator ready before the pool exists, or a table to reflect after
enum Planned<'a> {
    Ready(Arc<dyn QueryGenerator>),
    Reflect(&'a str),
}

/// Drains a channel into a database in transactional batches
pub struct SqlSink {
    name: String,
    channel: Arc<dyn Channel>,
    pool: Arc<PoolManager>,
    counters: Arc<SinkCounters>,
    inner: Mutex<Inner>,
}

impl SqlSink {
    /// Create an unconfigured sink
    pub fn new(name: impl Into<String>, channel: Arc<dyn Channel>, pool: Arc<PoolManager>) -> Self {
        Self {
            name: name.into(),
            channel,
            pool,
            counters: Arc::new(SinkCounters::new()),
            inner: Mutex::new(Inner {
                state: SinkState::Unconfigured,
                pipeline: None,
            }),
        }
    }

    /// Sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Batch counters
    pub fn counters(&self) -> Arc<SinkCounters> {
        Arc::clone(&self.counters)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SinkState {
        self.inner.lock().await.state
    }

    /// Validate `ctx`, initialize the pool and build the query generator.
    ///
    /// Fails with [`SinkError::Config`] on missing or invalid keys, an
    /// unknown table or a malformed template. Keys and templates are checked
    /// before the pool is touched; a failure after the pool was replaced
    /// leaves the sink unconfigured.
    pub async fn configure(&self, ctx: &SinkContext) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == SinkState::Running {
            return Err(SinkError::IllegalState(
                "cannot configure a running sink".into(),
            ));
        }

        let config = SinkConfig::from_context(ctx)?;
        let planned = match &config.mode {
            QueryMode::Template { sql } => {
                Planned::Ready(Arc::new(TemplateQueryGenerator::new(config.dialect, sql)?))
            }
            QueryMode::Mapping { table } => Planned::Reflect(table),
        };

        // The previous pipeline is bound to the pool about to be replaced
        inner.pipeline = None;
        inner.state = SinkState::Unconfigured;
        self.pool.initialize(ctx).await?;

        let generator: Arc<dyn QueryGenerator> = match planned {
            Planned::Ready(generator) => generator,
            Planned::Reflect(table) => {
                let conn = self.pool.borrow().await?;
                let built =
                    MappingQueryGenerator::new(&*conn, config.dialect, table, config.parser.clone())
                        .await;
                self.pool.release(conn).await;
                Arc::new(built?)
            }
        };

        info!(
            sink = %self.name,
            dialect = %config.dialect,
            batch_size = config.batch_size,
            generator = %generator.describe(),
            "Sink configured"
        );

        inner.pipeline = Some(Pipeline {
            batch_size: config.batch_size,
            generator,
        });
        inner.state = SinkState::Configured;
        Ok(())
    }

    /// Start accepting `process` calls. Starting a running sink is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SinkState::Unconfigured => Err(SinkError::IllegalState(
                "sink must be configured before it is started".into(),
            )),
            SinkState::Running => Ok(()),
            SinkState::Configured | SinkState::Stopped => {
                inner.state = SinkState::Running;
                self.counters.mark_started();
                info!(sink = %self.name, channel = %self.channel.name(), "Sink started");
                Ok(())
            }
        }
    }

    /// Stop accepting `process` calls. Waits for an in-flight batch.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SinkState::Running {
            inner.state = SinkState::Stopped;
            self.counters.mark_stopped();
            info!(sink = %self.name, counters = ?self.counters.snapshot(), "Sink stopped");
        }
    }

    /// Move one batch from the channel to the database.
    ///
    /// Batch failures are rolled back on both sides and reported as
    /// [`Status::Backoff`]. A panic is rolled back the same way and then
    /// returned as [`SinkError::Fatal`].
    pub async fn process(&self) -> Result<Status> {
        let inner = self.inner.lock().await;
        if inner.state != SinkState::Running {
            return Err(SinkError::IllegalState(format!(
                "process called on a sink that is {:?}",
                inner.state
            )));
        }
        let pipeline = inner
            .pipeline
            .clone()
            .ok_or_else(|| SinkError::IllegalState("sink has no query generator".into()))?;

        let mut tx = match self.channel.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(sink = %self.name, error = %e, "Could not open channel transaction");
                self.counters.inc_connection_failed();
                return Ok(Status::Backoff);
            }
        };

        let mut conn: Option<PooledConnection> = None;
        let outcome = AssertUnwindSafe(self.run_batch(&pipeline, &mut *tx, &mut conn))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(delivered)) => {
                debug!(sink = %self.name, delivered, "Batch delivered");
                Ok(Status::Ready)
            }
            Ok(Err(e)) => {
                warn!(sink = %self.name, error = %e, "Batch failed, rolling back");
                self.rollback(&mut *tx, conn.as_ref()).await;
                self.counters.inc_connection_failed();
                Ok(Status::Backoff)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(sink = %self.name, panic = %message, "Batch panicked, rolling back");
                self.rollback(&mut *tx, conn.as_ref()).await;
                self.counters.inc_connection_failed();
                Err(SinkError::Fatal(message))
            }
        };

        if let Err(e) = tx.close().await {
            warn!(sink = %self.name, error = %e, "Error closing channel transaction");
        }
        if let Some(conn) = conn.take() {
            self.pool.release(conn).await;
        }
        result
    }

    /// Steps between borrow and channel commit. The borrowed connection is
    /// left in `slot` so the caller can roll back and release it.
    async fn run_batch(
        &self,
        pipeline: &Pipeline,
        tx: &mut dyn ChannelTransaction,
        slot: &mut Option<PooledConnection>,
    ) -> Result<usize> {
        let conn = slot.insert(self.pool.borrow().await?);

        let mut events = Vec::with_capacity(pipeline.batch_size);
        while events.len() < pipeline.batch_size {
            self.counters.add_drain_attempt(1);
            match tx.take().await? {
                Some(event) => events.push(event),
                None => break,
            }
        }

        match events.len() {
            0 => self.counters.inc_batch_empty(),
            n if n == pipeline.batch_size => self.counters.inc_batch_complete(),
            _ => self.counters.inc_batch_underflow(),
        }

        if !events.is_empty() {
            let accepted = pipeline.generator.execute_batch(&**conn, &events).await?;
            if !accepted {
                return Err(SinkError::QueryFailed(format!(
                    "{} did not accept all {} events",
                    pipeline.generator.describe(),
                    events.len()
                )));
            }
            conn.commit().await?;
        }

        tx.commit().await?;
        self.counters.add_drain_success(events.len() as u64);
        Ok(events.len())
    }

    async fn rollback(&self, tx: &mut dyn ChannelTransaction, conn: Option<&PooledConnection>) {
        if let Some(conn) = conn {
            if let Err(e) = conn.rollback().await {
                warn!(sink = %self.name, error = %e, "Database rollback failed");
            }
        }
        if let Err(e) = tx.rollback().await {
            warn!(sink = %self.name, error = %e, "Channel rollback failed");
        }
    }
}

impl fmt::Debug for SqlSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlSink")
            .field("name", &self.name)
            .field("channel", &self.channel.name())
            .field("pool", &self.pool)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
