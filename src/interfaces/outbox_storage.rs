//! Outbox storage interface.

use async_trait::async_trait;

use crate::error::Result;
use crate::outbox::{OutboxMessage, OutboxRecord, OutboxTransaction};

/// Interface for outbox deduplication records.
///
/// A record is stored in the same transaction as the unit of work that
/// produced its operations, then marked dispatched once they are sent.
///
/// Implementations:
/// - `OutboxPersister`: document store backed, with TTL cleanup
#[async_trait]
pub trait OutboxStorage: Send + Sync {
    /// Start the transaction a unit of work stores its outbox record in.
    async fn begin_transaction(&self) -> Result<OutboxTransaction>;

    /// Store the record for a processed message.
    ///
    /// Storing the same message id twice fails with a duplicate-key error.
    async fn store(&self, message: OutboxMessage, transaction: &mut OutboxTransaction) -> Result<()>;

    /// Mark the message's operations as sent and drop them.
    async fn set_as_dispatched(&self, message_id: &str) -> Result<()>;

    /// Returns `None` if no record exists (never processed, or expired).
    async fn get(&self, message_id: &str) -> Result<Option<OutboxRecord>>;
}
