//! Outbox persister.

use std::sync::Arc;

use async_trait::async_trait;
use bson::doc;
use tracing::debug;

use super::record::StoredRecord;
use super::{OutboxMessage, OutboxRecord, OutboxTransaction, OUTBOX_COLLECTION};
use crate::error::{PersistenceError, Result};
use crate::interfaces::OutboxStorage;
use crate::session::StorageSessionFactory;
use crate::storage::DocumentStore;

/// Document store backed [`OutboxStorage`].
///
/// Requires a session factory with transactions enabled: the record must
/// commit atomically with the unit of work that produced it.
#[derive(Debug, Clone)]
pub struct OutboxPersister {
    factory: StorageSessionFactory,
    collection: String,
}

impl OutboxPersister {
    pub fn new(factory: StorageSessionFactory) -> Result<Self> {
        Self::with_collection(factory, OUTBOX_COLLECTION)
    }

    pub fn with_collection(factory: StorageSessionFactory, collection: impl Into<String>) -> Result<Self> {
        if !factory.use_transactions() {
            return Err(PersistenceError::Configuration(
                "The outbox requires transactions; set 'persistence.use_transactions' to true \
                 or disable the outbox with 'persistence.outbox.enabled'"
                    .to_string(),
            ));
        }
        Ok(Self {
            factory,
            collection: collection.into(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn documents(&self) -> &Arc<dyn DocumentStore> {
        self.factory.store()
    }
}

#[async_trait]
impl OutboxStorage for OutboxPersister {
    async fn begin_transaction(&self) -> Result<OutboxTransaction> {
        Ok(OutboxTransaction::new(self.factory.open().await?))
    }

    async fn store(&self, message: OutboxMessage, transaction: &mut OutboxTransaction) -> Result<()> {
        let message_id = message.message_id.clone();
        let operations = message.transport_operations.len();
        let document = bson::to_document(&StoredRecord::from(message))?;

        transaction
            .session_mut()
            .insert_one(&self.collection, document)
            .await?;

        debug!(message_id = %message_id, operations, "Outbox record stored");
        Ok(())
    }

    async fn set_as_dispatched(&self, message_id: &str) -> Result<()> {
        let update = doc! {
            "$set": {
                "dispatched": true,
                "dispatched_at": bson::DateTime::now(),
                "transport_operations": [],
            }
        };
        let outcome = self
            .documents()
            .update_one(&self.collection, doc! { "_id": message_id }, update, false)
            .await?;

        debug!(
            message_id,
            matched = outcome.matched_count,
            "Outbox record marked dispatched"
        );
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<OutboxRecord>> {
        let found = self
            .documents()
            .find_one(&self.collection, doc! { "_id": message_id })
            .await?;
        match found {
            Some(document) => {
                let record: StoredRecord = bson::from_document(document)?;
                Ok(Some(record.into()))
            }
            None => Ok(None),
        }
    }
}
