//! Upstream channel abstraction
//!
//! A channel is a transactional queue. Events taken inside a transaction are
//! only consumed once the transaction commits; a rollback puts them back at
//! the head of the queue in their original order.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SinkError};
use crate::event::Event;

/// Default queue capacity of [`MemoryChannel`]
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default per-transaction capacity of [`MemoryChannel`]
pub const DEFAULT_TRANSACTION_CAPACITY: usize = 1_000;

/// Source of events for a sink
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name used in logs
    fn name(&self) -> &str;

    /// Open a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn ChannelTransaction>>;
}

/// A unit of work against a channel
#[async_trait]
pub trait ChannelTransaction: Send {
    /// Take the next event, `None` when the channel is drained.
    ///
    /// Never waits for events to arrive.
    async fn take(&mut self) -> Result<Option<Event>>;

    /// Stage an event for the channel, visible after commit
    async fn put(&mut self, event: Event) -> Result<()>;

    /// Consume taken events and publish staged ones
    async fn commit(&mut self) -> Result<()>;

    /// Return taken events to the channel and drop staged ones
    async fn rollback(&mut self) -> Result<()>;

    /// End the transaction; an uncommitted transaction is rolled back
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug)]
struct Queue {
    events: VecDeque<Event>,
    capacity: usize,
}

/// Bounded in-memory channel
#[derive(Clone)]
pub struct MemoryChannel {
    name: String,
    queue: Arc<Mutex<Queue>>,
    transaction_capacity: usize,
}

impl MemoryChannel {
    /// Create a channel with default capacities
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY, DEFAULT_TRANSACTION_CAPACITY)
    }

    /// Create a channel with explicit capacities
    pub fn with_capacity(
        name: impl Into<String>,
        capacity: usize,
        transaction_capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            queue: Arc::new(Mutex::new(Queue {
                events: VecDeque::new(),
                capacity,
            })),
            transaction_capacity,
        }
    }

    /// Create a channel whose transactions can hold a whole sink batch
    pub fn for_batch_size(name: impl Into<String>, capacity: usize, batch_size: usize) -> Self {
        Self::with_capacity(
            name,
            capacity,
            batch_size.max(DEFAULT_TRANSACTION_CAPACITY),
        )
    }

    /// Most events one transaction may take or stage
    pub fn transaction_capacity(&self) -> usize {
        self.transaction_capacity
    }

    /// Append an event outside any transaction
    pub fn offer(&self, event: Event) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.events.len() >= queue.capacity {
            return Err(SinkError::channel(format!(
                "channel '{}' is full ({} events)",
                self.name, queue.capacity
            )));
        }
        queue.events.push_back(event);
        Ok(())
    }

    /// Events currently queued
    pub fn len(&self) -> usize {
        self.queue.lock().events.len()
    }

    /// Whether no events are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the queued events, head first
    pub fn snapshot(&self) -> Vec<Event> {
        self.queue.lock().events.iter().cloned().collect()
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("transaction_capacity", &self.transaction_capacity)
            .finish()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin_transaction(&self) -> Result<Box<dyn ChannelTransaction>> {
        Ok(Box::new(MemoryTransaction {
            channel: self.clone(),
            taken: Vec::new(),
            staged: Vec::new(),
            state: TxState::Open,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
    Closed,
}

struct MemoryTransaction {
    channel: MemoryChannel,
    taken: Vec<Event>,
    staged: Vec<Event>,
    state: TxState,
}

impl MemoryTransaction {
    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.state == TxState::Open {
            Ok(())
        } else {
            Err(SinkError::channel(format!(
                "cannot {} in a transaction that is {:?}",
                op, self.state
            )))
        }
    }

    fn restore(&mut self) {
        let mut queue = self.channel.queue.lock();
        for event in self.taken.drain(..).rev() {
            queue.events.push_front(event);
        }
        self.staged.clear();
    }
}

#[async_trait]
impl ChannelTransaction for MemoryTransaction {
    async fn take(&mut self) -> Result<Option<Event>> {
        self.ensure_open("take")?;
        if self.taken.len() >= self.channel.transaction_capacity {
            return Err(SinkError::channel(format!(
                "transaction capacity {} of channel '{}' exceeded",
                self.channel.transaction_capacity, self.channel.name
            )));
        }
        let next = self.channel.queue.lock().events.pop_front();
        if let Some(event) = &next {
            self.taken.push(event.clone());
        }
        Ok(next)
    }

    async fn put(&mut self, event: Event) -> Result<()> {
        self.ensure_open("put")?;
        if self.staged.len() >= self.channel.transaction_capacity {
            return Err(SinkError::channel(format!(
                "transaction capacity {} of channel '{}' exceeded",
                self.channel.transaction_capacity, self.channel.name
            )));
        }
        self.staged.push(event);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open("commit")?;
        {
            let mut queue = self.channel.queue.lock();
            let room = queue.capacity.saturating_sub(queue.events.len());
            if self.staged.len() > room {
                return Err(SinkError::channel(format!(
                    "channel '{}' has room for {} events, {} staged",
                    self.channel.name,
                    room,
                    self.staged.len()
                )));
            }
            queue.events.extend(self.staged.drain(..));
        }
        self.taken.clear();
        self.state = TxState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open("rollback")?;
        debug!(
            channel = %self.channel.name,
            returned = self.taken.len(),
            "Rolling back channel transaction"
        );
        self.restore();
        self.state = TxState::RolledBack;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == TxState::Open {
            warn!(
                channel = %self.channel.name,
                "Closing a transaction that was neither committed nor rolled back"
            );
            self.restore();
        }
        self.state = TxState::Closed;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state == TxState::Open && !self.taken.is_empty() {
            warn!(channel = %self.channel.name, "Channel transaction dropped while open, restoring events");
            self.restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_with(bodies: &[&str]) -> MemoryChannel {
        let channel = MemoryChannel::new("test");
        for body in bodies {
            channel.offer(Event::with_body(body.to_string())).unwrap();
        }
        channel
    }

    fn bodies(channel: &MemoryChannel) -> Vec<String> {
        channel.snapshot().iter().map(Event::body_text).collect()
    }

    #[tokio::test]
    async fn test_commit_consumes() {
        let channel = channel_with(&["a", "b", "c"]);
        let mut tx = channel.begin_transaction().await.unwrap();
        assert_eq!(tx.take().await.unwrap().map(|e| e.body_text()), Some("a".into()));
        assert_eq!(tx.take().await.unwrap().map(|e| e.body_text()), Some("b".into()));
        tx.commit().await.unwrap();
        tx.close().await.unwrap();
        assert_eq!(bodies(&channel), vec!["c"]);
    }

    #[tokio::test]
    async fn test_rollback_restores_order() {
        let channel = channel_with(&["a", "b", "c"]);
        let mut tx = channel.begin_transaction().await.unwrap();
        tx.take().await.unwrap();
        tx.take().await.unwrap();
        tx.rollback().await.unwrap();
        tx.close().await.unwrap();
        assert_eq!(bodies(&channel), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_take_on_empty_channel() {
        let channel = MemoryChannel::new("empty");
        let mut tx = channel.begin_transaction().await.unwrap();
        assert!(tx.take().await.unwrap().is_none());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_commit_rolls_back() {
        let channel = channel_with(&["a"]);
        let mut tx = channel.begin_transaction().await.unwrap();
        tx.take().await.unwrap();
        tx.close().await.unwrap();
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_restores_events() {
        let channel = channel_with(&["a", "b"]);
        {
            let mut tx = channel.begin_transaction().await.unwrap();
            tx.take().await.unwrap();
        }
        assert_eq!(bodies(&channel), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_put_visible_after_commit() {
        let channel = MemoryChannel::new("puts");
        let mut tx = channel.begin_transaction().await.unwrap();
        tx.put(Event::with_body("x")).await.unwrap();
        assert!(channel.is_empty());
        tx.commit().await.unwrap();
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_capacity() {
        let channel = MemoryChannel::with_capacity("small", 10, 1);
        channel.offer(Event::with_body("a")).unwrap();
        channel.offer(Event::with_body("b")).unwrap();
        let mut tx = channel.begin_transaction().await.unwrap();
        tx.take().await.unwrap();
        assert!(matches!(tx.take().await, Err(SinkError::Channel(_))));
    }

    #[tokio::test]
    async fn test_offer_respects_capacity() {
        let channel = MemoryChannel::with_capacity("tiny", 1, 1);
        channel.offer(Event::with_body("a")).unwrap();
        assert!(channel.offer(Event::with_body("b")).is_err());
    }

    #[tokio::test]
    async fn test_commit_after_commit_fails() {
        let channel = MemoryChannel::new("twice");
        let mut tx = channel.begin_transaction().await.unwrap();
        tx.commit().await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(tx.take().await.is_err());
    }

    #[tokio::test]
    async fn test_batch_sized_transactions() {
        assert_eq!(
            MemoryChannel::for_batch_size("small", 100, 20).transaction_capacity(),
            DEFAULT_TRANSACTION_CAPACITY
        );

        let channel = MemoryChannel::for_batch_size("large", 5_000, 1_500);
        for i in 0..1_500 {
            channel.offer(Event::with_body(i.to_string())).unwrap();
        }
        let mut tx = channel.begin_transaction().await.unwrap();
        for _ in 0..1_500 {
            assert!(tx.take().await.unwrap().is_some());
        }
        tx.commit().await.unwrap();
        tx.close().await.unwrap();
        assert!(channel.is_empty());
    }
}
