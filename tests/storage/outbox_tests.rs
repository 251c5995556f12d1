//! OutboxStorage contract tests.
//!
//! These tests verify the contract of the OutboxStorage trait.
//! Each storage implementation should run these tests.

use std::collections::BTreeMap;

use angzarr_mongo_persistence::{
    MongoPersistence, OutboxMessage, OutboxPersister, OutboxStorage, TransportOperation,
};

use super::{unique, ShippingSagaData};

fn outbox(persistence: &MongoPersistence) -> &OutboxPersister {
    persistence.outbox().expect("outbox should be enabled")
}

fn message(message_id: &str) -> OutboxMessage {
    OutboxMessage::new(
        message_id,
        vec![
            TransportOperation {
                message_id: format!("{message_id}-billing"),
                destination: "billing".to_string(),
                headers: BTreeMap::from([
                    ("content-type".to_string(), "application/json".to_string()),
                    ("correlation-id".to_string(), message_id.to_string()),
                ]),
                body: br#"{"amount":42}"#.to_vec(),
                options: BTreeMap::from([("delay".to_string(), "00:00:05".to_string())]),
            },
            TransportOperation {
                message_id: format!("{message_id}-shipping"),
                destination: "shipping".to_string(),
                headers: BTreeMap::new(),
                body: vec![0, 159, 146, 150],
                options: BTreeMap::new(),
            },
        ],
    )
}

async fn store_committed(outbox: &OutboxPersister, message: OutboxMessage) {
    let mut transaction = outbox.begin_transaction().await.unwrap();
    outbox.store(message, &mut transaction).await.expect("store should succeed");
    transaction.commit().await.expect("commit should succeed");
}

// =============================================================================
// OutboxStorage::get tests
// =============================================================================

pub async fn test_get_nonexistent(persistence: &MongoPersistence) {
    let record = outbox(persistence).get(&unique("missing")).await.unwrap();
    assert!(record.is_none(), "nonexistent record should be None");
}

// =============================================================================
// OutboxStorage::store tests
// =============================================================================

pub async fn test_store_and_get(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("msg");
    let message = message(&message_id);
    store_committed(outbox, message.clone()).await;

    let record = outbox.get(&message_id).await.unwrap().expect("record should exist");
    assert_eq!(record.message_id, message_id);
    assert!(!record.dispatched);
    assert!(record.dispatched_at.is_none());
    assert_eq!(record.transport_operations, message.transport_operations);
}

pub async fn test_store_empty_operations(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("msg");
    store_committed(outbox, OutboxMessage::new(message_id.clone(), Vec::new())).await;

    let record = outbox.get(&message_id).await.unwrap().unwrap();
    assert!(record.transport_operations.is_empty());
    assert!(!record.dispatched);
}

pub async fn test_store_duplicate_rejected(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("msg");
    store_committed(outbox, message(&message_id)).await;

    let mut transaction = outbox.begin_transaction().await.unwrap();
    let err = outbox
        .store(message(&message_id), &mut transaction)
        .await
        .expect_err("second record for the same message must be rejected");
    assert!(err.is_duplicate_key(), "unexpected error: {err}");
    transaction.dispose().await;
}

pub async fn test_dispose_discards_record(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("msg");

    let mut transaction = outbox.begin_transaction().await.unwrap();
    outbox.store(message(&message_id), &mut transaction).await.unwrap();
    transaction.dispose().await;

    assert!(outbox.get(&message_id).await.unwrap().is_none());
}

pub async fn test_saga_and_record_commit_together(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("msg");
    let saga = ShippingSagaData::new(unique("order"));

    let mut transaction = outbox.begin_transaction().await.unwrap();
    persistence
        .sagas()
        .save(&saga, None, transaction.session_mut())
        .await
        .unwrap();
    outbox.store(message(&message_id), &mut transaction).await.unwrap();
    transaction.commit().await.unwrap();

    assert!(outbox.get(&message_id).await.unwrap().is_some());
    let mut session = persistence.session_factory().open().await.unwrap();
    let loaded = persistence
        .sagas()
        .get::<ShippingSagaData>(saga.id, &mut session)
        .await
        .unwrap();
    assert_eq!(loaded, Some(saga));
    session.complete().await.unwrap();
}

// =============================================================================
// OutboxStorage::set_as_dispatched tests
// =============================================================================

pub async fn test_set_as_dispatched(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("msg");
    store_committed(outbox, message(&message_id)).await;

    outbox.set_as_dispatched(&message_id).await.unwrap();

    let record = outbox.get(&message_id).await.unwrap().unwrap();
    assert!(record.dispatched);
    assert!(record.dispatched_at.is_some());
    assert!(record.transport_operations.is_empty());
}

pub async fn test_set_as_dispatched_twice(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("msg");
    store_committed(outbox, message(&message_id)).await;

    outbox.set_as_dispatched(&message_id).await.unwrap();
    outbox.set_as_dispatched(&message_id).await.unwrap();

    let record = outbox.get(&message_id).await.unwrap().unwrap();
    assert!(record.dispatched);
}

pub async fn test_set_as_dispatched_unknown_is_noop(persistence: &MongoPersistence) {
    let outbox = outbox(persistence);
    let message_id = unique("missing");

    outbox.set_as_dispatched(&message_id).await.unwrap();
    assert!(outbox.get(&message_id).await.unwrap().is_none());
}

#[macro_export]
macro_rules! run_outbox_tests {
    ($persistence:expr) => {
        use $crate::storage::outbox_tests::*;

        // get tests
        test_get_nonexistent($persistence).await;
        println!("  test_get_nonexistent: PASSED");

        // store tests
        test_store_and_get($persistence).await;
        println!("  test_store_and_get: PASSED");

        test_store_empty_operations($persistence).await;
        println!("  test_store_empty_operations: PASSED");

        test_store_duplicate_rejected($persistence).await;
        println!("  test_store_duplicate_rejected: PASSED");

        test_dispose_discards_record($persistence).await;
        println!("  test_dispose_discards_record: PASSED");

        test_saga_and_record_commit_together($persistence).await;
        println!("  test_saga_and_record_commit_together: PASSED");

        // set_as_dispatched tests
        test_set_as_dispatched($persistence).await;
        println!("  test_set_as_dispatched: PASSED");

        test_set_as_dispatched_twice($persistence).await;
        println!("  test_set_as_dispatched_twice: PASSED");

        test_set_as_dispatched_unknown_is_noop($persistence).await;
        println!("  test_set_as_dispatched_unknown_is_noop: PASSED");
    };
}
