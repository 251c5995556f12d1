//! Outbox deduplication records.
//!
//! A unit of work stores the transport operations it produced, keyed by the
//! incoming message id, in the same transaction as its saga changes. After
//! dispatch the operations are cleared and the record only remains as a
//! deduplication marker until the TTL index removes it.

mod cleanup;
mod persister;
mod record;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use cleanup::{ensure_cleanup_index, CleanupIndex, CLEANUP_INDEX_NAME};
pub use persister::OutboxPersister;

use crate::error::Result;
use crate::session::StorageSession;

/// Default outbox collection.
pub const OUTBOX_COLLECTION: &str = "outboxrecord";

/// Default time dispatched records are kept for deduplication: 7 days.
pub const DEFAULT_DEDUPLICATION_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// One outgoing message produced by a unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOperation {
    pub message_id: String,
    pub destination: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub options: BTreeMap<String, String>,
}

/// Operations produced while processing one incoming message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxMessage {
    pub message_id: String,
    pub transport_operations: Vec<TransportOperation>,
}

impl OutboxMessage {
    pub fn new(message_id: impl Into<String>, transport_operations: Vec<TransportOperation>) -> Self {
        Self {
            message_id: message_id.into(),
            transport_operations,
        }
    }
}

/// Stored outbox record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub message_id: String,
    /// Empty once dispatched.
    pub transport_operations: Vec<TransportOperation>,
    pub dispatched: bool,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Transaction an outbox record is stored in.
///
/// Saga operations of the same unit of work go through
/// [`session_mut`](Self::session_mut) so they commit together.
#[derive(Debug)]
pub struct OutboxTransaction {
    session: StorageSession,
}

impl OutboxTransaction {
    pub(crate) fn new(session: StorageSession) -> Self {
        Self { session }
    }

    pub fn session_mut(&mut self) -> &mut StorageSession {
        &mut self.session
    }

    pub async fn commit(mut self) -> Result<()> {
        self.session.complete().await
    }

    pub async fn dispose(mut self) {
        self.session.dispose().await;
    }
}
