//! Session-bound MongoDB operations.

use async_trait::async_trait;
use mongodb::bson::Document;
use mongodb::options::{ReadConcern, TransactionOptions, UpdateOptions};
use mongodb::{ClientSession, Collection, Database};

use super::{classify, majority_write_concern, primary};
use crate::storage::{StoreError, StoreResult, StoreSession, TransactionSettings, UpdateOutcome};

/// A MongoDB client session.
///
/// The driver aborts an open transaction when the session is dropped.
pub struct MongoStoreSession {
    database: Database,
    session: ClientSession,
    in_transaction: bool,
}

impl MongoStoreSession {
    pub(crate) fn new(database: Database, session: ClientSession) -> Self {
        Self {
            database,
            session,
            in_transaction: false,
        }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

#[async_trait]
impl StoreSession for MongoStoreSession {
    async fn start_transaction(&mut self, settings: TransactionSettings) -> StoreResult<()> {
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::majority())
            .write_concern(majority_write_concern())
            .selection_criteria(primary())
            .max_commit_time(settings.max_commit_time)
            .build();
        self.session
            .start_transaction()
            .with_options(options)
            .await
            .map_err(|e| classify(e, ""))?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        self.session
            .commit_transaction()
            .await
            .map_err(|e| classify(e, ""))
    }

    async fn abort_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        self.session
            .abort_transaction()
            .await
            .map_err(|e| classify(e, ""))
    }

    async fn insert_one(&mut self, collection: &str, document: Document) -> StoreResult<()> {
        self.collection(collection)
            .insert_one(document)
            .session(&mut self.session)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(())
    }

    async fn find_one(&mut self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        self.collection(collection)
            .find_one(filter)
            .session(&mut self.session)
            .await
            .map_err(|e| classify(e, collection))
    }

    async fn replace_one(
        &mut self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<UpdateOutcome> {
        let result = self
            .collection(collection)
            .replace_one(filter, replacement)
            .session(&mut self.session)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&mut self, collection: &str, filter: Document) -> StoreResult<u64> {
        let result = self
            .collection(collection)
            .delete_one(filter)
            .session(&mut self.session)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(result.deleted_count)
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = self
            .collection(collection)
            .update_one(filter, update)
            .with_options(options)
            .session(&mut self.session)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }
}
