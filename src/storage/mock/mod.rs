//! Mock document store for testing.
//!
//! Keeps collections in memory with the same atomicity guarantees the
//! persisters rely on: every single-document operation is atomic, unique
//! indexes are enforced, and transactions work on private snapshots whose
//! writes are applied all-or-nothing at commit. A transaction whose written
//! documents were changed by someone else since it first touched them fails
//! with [`StoreError::WriteConflict`].

mod collection;
mod matcher;


use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::{doc, Document};
use tokio::sync::RwLock;

use self::collection::{CollectionState, StoredDocument};
use super::{
    DeploymentInfo, DocumentStore, IndexDefinition, StoreError, StoreResult, StoreSession,
    TransactionSettings, UpdateOutcome,
};

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, CollectionState>,
    revision: u64,
}

impl StoreState {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn collection_mut(&mut self, name: &str) -> &mut CollectionState {
        self.collections.entry(name.to_string()).or_default()
    }
}

/// In-memory [`DocumentStore`].
pub struct MockDocumentStore {
    database: String,
    deployment: DeploymentInfo,
    state: Arc<RwLock<StoreState>>,
    unavailable: Arc<AtomicBool>,
}

impl MockDocumentStore {
    /// A store that behaves like a replica set (transactions supported).
    pub fn new(database: impl Into<String>) -> Self {
        Self::with_deployment(database, DeploymentInfo::replica_set())
    }

    /// A store reporting the given deployment capabilities.
    pub fn with_deployment(database: impl Into<String>, deployment: DeploymentInfo) -> Self {
        Self {
            database: database.into(),
            deployment,
            state: Arc::new(RwLock::new(StoreState::default())),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate a connectivity outage: every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Committed documents of a collection, in `_id` order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map(|c| c.documents.values().map(|d| d.document.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn document_count(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> StoreResult<()> {
        check_available(&self.unavailable)
    }
}

fn check_available(flag: &AtomicBool) -> StoreResult<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("mock store is offline".to_string()));
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn describe_deployment(&self) -> StoreResult<DeploymentInfo> {
        self.check_available()?;
        Ok(self.deployment.clone())
    }

    async fn start_session(&self) -> StoreResult<Box<dyn StoreSession>> {
        self.check_available()?;
        if !self.deployment.sessions_supported {
            return Err(StoreError::Unsupported("sessions".to_string()));
        }
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            unavailable: Arc::clone(&self.unavailable),
            transactions_supported: self.deployment.transactions_supported,
            transaction: None,
        }))
    }

    async fn create_collection(&self, collection: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.collections.contains_key(collection) {
            return Err(StoreError::NamespaceExists(collection.to_string()));
        }
        state.collection_mut(collection);
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexDefinition>> {
        self.check_available()?;
        let state = self.state.read().await;
        let Some(existing) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut indexes = vec![IndexDefinition::new(doc! { "_id": 1 }).named("_id_")];
        indexes.extend(existing.indexes.iter().cloned());
        Ok(indexes)
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexDefinition>) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let target = state.collection_mut(collection);
        for index in indexes {
            target.create_index(collection, index)?;
        }
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.collections.get_mut(collection) {
            Some(target) => target.drop_index(name),
            None => Err(StoreError::IndexNotFound(name.to_string())),
        }
    }

    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let revision = state.next_revision();
        state
            .collection_mut(collection)
            .insert(collection, document, revision)?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        self.check_available()?;
        let state = self.state.read().await;
        match state.collections.get(collection) {
            Some(target) => target.find_one(&filter),
            None => Ok(None),
        }
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> StoreResult<Vec<Document>> {
        self.check_available()?;
        let state = self.state.read().await;
        match state.collections.get(collection) {
            Some(target) => target.find(&filter, projection.as_ref()),
            None => Ok(Vec::new()),
        }
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let revision = state.next_revision();
        state
            .collection_mut(collection)
            .update_one(collection, &filter, &update, upsert, revision)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.collections.get_mut(collection) {
            Some(target) => target.delete_many(&filter),
            None => Ok(0),
        }
    }
}

/// Private working set of an open transaction.
#[derive(Debug, Default)]
struct MockTransaction {
    collections: HashMap<String, CollectionState>,
}

impl MockTransaction {
    async fn collection(&mut self, state: &RwLock<StoreState>, name: &str) -> &mut CollectionState {
        if !self.collections.contains_key(name) {
            let copy = state
                .read()
                .await
                .collections
                .get(name)
                .map(CollectionState::working_copy)
                .unwrap_or_else(|| CollectionState::default().working_copy());
            self.collections.insert(name.to_string(), copy);
        }
        self.collections.entry(name.to_string()).or_default()
    }
}

/// Session over a [`MockDocumentStore`].
pub struct MockSession {
    state: Arc<RwLock<StoreState>>,
    unavailable: Arc<AtomicBool>,
    transactions_supported: bool,
    transaction: Option<MockTransaction>,
}

#[async_trait]
impl StoreSession for MockSession {
    async fn start_transaction(&mut self, _settings: TransactionSettings) -> StoreResult<()> {
        check_available(&self.unavailable)?;
        if !self.transactions_supported {
            return Err(StoreError::Unsupported(
                "transactions require a replica set or sharded cluster".to_string(),
            ));
        }
        if self.transaction.is_some() {
            return Err(StoreError::Unsupported("transaction already in progress".to_string()));
        }
        self.transaction = Some(MockTransaction::default());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> StoreResult<()> {
        let Some(transaction) = self.transaction.take() else {
            return Err(StoreError::NoTransaction);
        };
        check_available(&self.unavailable)?;

        let mut state = self.state.write().await;

        for (name, working) in &transaction.collections {
            let Some(writes) = &working.writes else {
                continue;
            };
            let live = state.collections.get(name);
            for (key, base) in writes {
                let current = live.and_then(|c| c.documents.get(key)).map(|d| d.revision);
                if current != *base {
                    return Err(StoreError::WriteConflict);
                }
            }
        }

        // Stage on copies so a unique-index violation leaves nothing applied.
        let revision = state.next_revision();
        let mut staged = HashMap::new();
        for (name, working) in transaction.collections {
            let Some(writes) = working.writes else {
                continue;
            };
            if writes.is_empty() {
                continue;
            }
            let mut live = state.collections.get(&name).cloned().unwrap_or_default();
            for key in writes.keys() {
                live.documents.remove(key);
            }
            for key in writes.keys() {
                if let Some(written) = working.documents.get(key) {
                    live.check_unique(&name, key, &written.document)?;
                    live.documents.insert(
                        key.clone(),
                        StoredDocument {
                            document: written.document.clone(),
                            revision,
                        },
                    );
                }
            }
            staged.insert(name, live);
        }
        state.collections.extend(staged);
        Ok(())
    }

    async fn abort_transaction(&mut self) -> StoreResult<()> {
        match self.transaction.take() {
            Some(_) => Ok(()),
            None => Err(StoreError::NoTransaction),
        }
    }

    async fn insert_one(&mut self, collection: &str, document: Document) -> StoreResult<()> {
        check_available(&self.unavailable)?;
        let state = &self.state;
        match self.transaction.as_mut() {
            Some(transaction) => {
                transaction
                    .collection(state, collection)
                    .await
                    .insert(collection, document, 0)?;
            }
            None => {
                let mut state = state.write().await;
                let revision = state.next_revision();
                state
                    .collection_mut(collection)
                    .insert(collection, document, revision)?;
            }
        }
        Ok(())
    }

    async fn find_one(&mut self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        check_available(&self.unavailable)?;
        let state = &self.state;
        match self.transaction.as_mut() {
            Some(transaction) => transaction.collection(state, collection).await.find_one(&filter),
            None => match state.read().await.collections.get(collection) {
                Some(target) => target.find_one(&filter),
                None => Ok(None),
            },
        }
    }

    async fn replace_one(
        &mut self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<UpdateOutcome> {
        check_available(&self.unavailable)?;
        let state = &self.state;
        match self.transaction.as_mut() {
            Some(transaction) => transaction
                .collection(state, collection)
                .await
                .replace_one(collection, &filter, replacement, 0),
            None => {
                let mut state = state.write().await;
                let revision = state.next_revision();
                state
                    .collection_mut(collection)
                    .replace_one(collection, &filter, replacement, revision)
            }
        }
    }

    async fn delete_one(&mut self, collection: &str, filter: Document) -> StoreResult<u64> {
        check_available(&self.unavailable)?;
        let state = &self.state;
        match self.transaction.as_mut() {
            Some(transaction) => transaction
                .collection(state, collection)
                .await
                .delete_one(&filter),
            None => match state.write().await.collections.get_mut(collection) {
                Some(target) => target.delete_one(&filter),
                None => Ok(0),
            },
        }
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        check_available(&self.unavailable)?;
        let state = &self.state;
        match self.transaction.as_mut() {
            Some(transaction) => transaction
                .collection(state, collection)
                .await
                .update_one(collection, &filter, &update, upsert, 0),
            None => {
                let mut state = state.write().await;
                let revision = state.next_revision();
                state
                    .collection_mut(collection)
                    .update_one(collection, &filter, &update, upsert, revision)
            }
        }
    }
}
