//! Query generators
//!
//! A generator turns a batch of events into statements on a connection the
//! caller owns. Generators never commit; the batch driver does.
//!
//! - [`MappingQueryGenerator`] parses key/value bodies and inserts them into
//!   a reflected table
//! - [`TemplateQueryGenerator`] binds event bodies and headers into a user
//!   statement

mod mapping;
mod template;

pub use mapping::MappingQueryGenerator;
pub use template::{Placeholder, PlaceholderSource, TemplateQueryGenerator};

use async_trait::async_trait;
use sqlsink_rdbc::connection::Connection;

use crate::error::Result;
use crate::event::Event;

/// Writes a batch of events through a connection
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    /// Execute the statements for `events`.
    ///
    /// Returns `false` when the database did not accept every row; the
    /// caller is expected to roll back.
    async fn execute_batch(&self, conn: &dyn Connection, events: &[Event]) -> Result<bool>;

    /// Short description for logs
    fn describe(&self) -> String;
}
