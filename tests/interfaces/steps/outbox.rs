//! Outbox storage step definitions.

use std::collections::BTreeMap;
use std::time::Duration;

use angzarr_mongo_persistence::outbox::{
    ensure_cleanup_index, CleanupIndex, CLEANUP_INDEX_NAME, OUTBOX_COLLECTION,
};
use angzarr_mongo_persistence::storage::DocumentStore;
use angzarr_mongo_persistence::{
    OutboxMessage, OutboxPersister, OutboxRecord, OutboxStorage, OutboxTransaction,
    PersistenceError, SagaCorrelationProperty, TransportOperation,
};
use cucumber::{given, then, when, World};
use uuid::Uuid;

use super::ShippingSagaData;
use crate::backend::{Settings, StorageBackend, StorageContext};

/// Test context for outbox scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct OutboxWorld {
    backend: StorageBackend,
    context: Option<StorageContext>,
    transaction: Option<OutboxTransaction>,
    cleanup: Option<CleanupIndex>,
    last_error: Option<PersistenceError>,
}

impl OutboxWorld {
    fn new() -> Self {
        Self {
            backend: StorageBackend::from_env(),
            context: None,
            transaction: None,
            cleanup: None,
            last_error: None,
        }
    }

    fn context(&self) -> &StorageContext {
        self.context.as_ref().expect("Storage context not initialized")
    }

    fn outbox(&self) -> &OutboxPersister {
        self.context()
            .persistence
            .outbox()
            .expect("Outbox should be enabled")
    }

    async fn record(&self, message_id: &str) -> Option<OutboxRecord> {
        self.outbox().get(message_id).await.expect("Failed to get record")
    }

    async fn store(&mut self, message_id: &str, operations: usize) {
        if self.transaction.is_none() {
            let transaction = self
                .outbox()
                .begin_transaction()
                .await
                .expect("Failed to begin transaction");
            self.transaction = Some(transaction);
        }
        let outbox = self.outbox().clone();
        let transaction = self.transaction.as_mut().expect("transaction was just started");
        self.last_error = outbox
            .store(message(message_id, operations), transaction)
            .await
            .err();
    }
}

fn message(message_id: &str, operations: usize) -> OutboxMessage {
    let operations = (0..operations)
        .map(|i| TransportOperation {
            message_id: format!("{}-{}", message_id, i),
            destination: format!("endpoint-{}", i),
            headers: BTreeMap::from([("message-id".to_string(), message_id.to_string())]),
            body: format!("payload-{}", i).into_bytes(),
            options: BTreeMap::new(),
        })
        .collect();
    OutboxMessage::new(message_id, operations)
}

// --- Background ---

#[given("an outbox storage backend")]
async fn given_outbox_backend(world: &mut OutboxWorld) {
    println!("Using backend: {}", world.backend.name());
    world.context = Some(StorageContext::new(world.backend, Settings::default()).await);
}

// --- Given steps ---

#[given(expr = "outbox message {string} with {int} operation(s) is stored")]
async fn given_message_stored(world: &mut OutboxWorld, message_id: String, operations: usize) {
    world.store(&message_id, operations).await;
    assert!(world.last_error.is_none(), "Failed to store: {:?}", world.last_error);
    if let Some(transaction) = world.transaction.take() {
        transaction.commit().await.expect("Failed to commit");
    }
}

// --- When steps ---

#[when(expr = "I store outbox message {string} with {int} operation(s)")]
async fn when_store(world: &mut OutboxWorld, message_id: String, operations: usize) {
    world.store(&message_id, operations).await;
}

#[when("I commit the outbox transaction")]
async fn when_commit(world: &mut OutboxWorld) {
    let transaction = world.transaction.take().expect("No outbox transaction");
    transaction.commit().await.expect("Failed to commit");
}

#[when("I dispose the outbox transaction")]
async fn when_dispose(world: &mut OutboxWorld) {
    let transaction = world.transaction.take().expect("No outbox transaction");
    transaction.dispose().await;
}

#[when(expr = "I mark outbox message {string} as dispatched")]
async fn when_dispatched(world: &mut OutboxWorld, message_id: String) {
    world
        .outbox()
        .set_as_dispatched(&message_id)
        .await
        .expect("Failed to mark dispatched");
}

#[when(expr = "I save a shipping saga for order {string} in the outbox transaction")]
async fn when_save_saga_in_transaction(world: &mut OutboxWorld, order_id: String) {
    let saga = ShippingSagaData {
        id: Uuid::new_v4(),
        order_id: order_id.clone(),
        packages: Vec::new(),
    };
    let correlation = SagaCorrelationProperty::new("order_id", order_id);
    let sagas = world.context().persistence.sagas().clone();
    let transaction = world.transaction.as_mut().expect("No outbox transaction");
    sagas
        .save(&saga, Some(&correlation), transaction.session_mut())
        .await
        .expect("Failed to save saga");
}

#[when(expr = "the outbox cleanup index is ensured with a retention of {int} seconds")]
async fn when_ensure_cleanup(world: &mut OutboxWorld, seconds: u64) {
    let outcome = ensure_cleanup_index(
        world.context().store.as_ref(),
        OUTBOX_COLLECTION,
        Duration::from_secs(seconds),
    )
    .await
    .expect("Failed to ensure cleanup index");
    world.cleanup = Some(outcome);
}

// --- Then steps ---

#[then(expr = "outbox record {string} exists")]
async fn then_exists(world: &mut OutboxWorld, message_id: String) {
    assert!(world.record(&message_id).await.is_some(), "Record {} should exist", message_id);
}

#[then(expr = "outbox record {string} does not exist")]
async fn then_not_exists(world: &mut OutboxWorld, message_id: String) {
    assert!(world.record(&message_id).await.is_none(), "Record {} should not exist", message_id);
}

#[then(expr = "outbox record {string} has {int} operation(s)")]
async fn then_operations(world: &mut OutboxWorld, message_id: String, operations: usize) {
    let record = world.record(&message_id).await.expect("Record should exist");
    assert_eq!(record.transport_operations.len(), operations);
    if let Some(first) = record.transport_operations.first() {
        assert_eq!(first.headers["message-id"], message_id);
    }
}

#[then(expr = "outbox record {string} is dispatched")]
async fn then_dispatched(world: &mut OutboxWorld, message_id: String) {
    let record = world.record(&message_id).await.expect("Record should exist");
    assert!(record.dispatched);
    assert!(record.dispatched_at.is_some());
}

#[then(expr = "outbox record {string} is not dispatched")]
async fn then_not_dispatched(world: &mut OutboxWorld, message_id: String) {
    let record = world.record(&message_id).await.expect("Record should exist");
    assert!(!record.dispatched);
    assert!(record.dispatched_at.is_none());
}

#[then("the outbox operation fails with a duplicate key error")]
async fn then_duplicate(world: &mut OutboxWorld) {
    let err = world.last_error.as_ref().expect("The store should fail");
    assert!(err.is_duplicate_key(), "Expected a duplicate key error, got {:?}", err);
    if let Some(transaction) = world.transaction.take() {
        transaction.dispose().await;
    }
}

#[then(expr = "the shipping saga for order {string} exists")]
async fn then_saga_exists(world: &mut OutboxWorld, order_id: String) {
    let persistence = &world.context().persistence;
    let mut session = persistence.session_factory().open().await.expect("Failed to open session");
    let saga = persistence
        .sagas()
        .get_by_property::<ShippingSagaData, _>("order_id", order_id.as_str(), &mut session)
        .await
        .expect("Failed to load saga");
    session.complete().await.expect("Failed to commit session");
    assert!(saga.is_some(), "Saga for order {} should exist", order_id);
}

#[then(expr = "the outbox cleanup index expires records after {int} seconds")]
async fn then_cleanup_expiry(world: &mut OutboxWorld, seconds: u64) {
    let indexes = world
        .context()
        .store
        .list_indexes(OUTBOX_COLLECTION)
        .await
        .expect("Failed to list indexes");
    let cleanup = indexes
        .iter()
        .find(|index| index.resolved_name() == CLEANUP_INDEX_NAME)
        .expect("Cleanup index should exist");
    assert_eq!(cleanup.expire_after, Some(Duration::from_secs(seconds)));
}

#[then("the cleanup index was recreated")]
async fn then_recreated(world: &mut OutboxWorld) {
    assert_eq!(world.cleanup, Some(CleanupIndex::Recreated));
}

#[then("the cleanup index was unchanged")]
async fn then_unchanged(world: &mut OutboxWorld) {
    assert_eq!(world.cleanup, Some(CleanupIndex::Unchanged));
}
