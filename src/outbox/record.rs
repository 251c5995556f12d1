//! Persisted form of outbox records.
//!
//! Headers and options are stored as arrays of `{k, v}` documents so keys
//! containing `.` or `$` are stored verbatim.

use std::collections::BTreeMap;

use bson::spec::BinarySubtype;
use bson::Binary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OutboxMessage, OutboxRecord, TransportOperation};

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct StoredRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub dispatched: bool,
    pub dispatched_at: Option<bson::DateTime>,
    pub transport_operations: Vec<StoredOperation>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct StoredOperation {
    pub message_id: String,
    pub destination: String,
    pub headers: Vec<StoredPair>,
    pub body: Binary,
    pub options: Vec<StoredPair>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct StoredPair {
    pub k: String,
    pub v: String,
}

fn to_pairs(map: BTreeMap<String, String>) -> Vec<StoredPair> {
    map.into_iter().map(|(k, v)| StoredPair { k, v }).collect()
}

fn from_pairs(pairs: Vec<StoredPair>) -> BTreeMap<String, String> {
    pairs.into_iter().map(|pair| (pair.k, pair.v)).collect()
}

impl From<OutboxMessage> for StoredRecord {
    fn from(message: OutboxMessage) -> Self {
        Self {
            id: message.message_id,
            dispatched: false,
            dispatched_at: None,
            transport_operations: message
                .transport_operations
                .into_iter()
                .map(StoredOperation::from)
                .collect(),
        }
    }
}

impl From<TransportOperation> for StoredOperation {
    fn from(operation: TransportOperation) -> Self {
        Self {
            message_id: operation.message_id,
            destination: operation.destination,
            headers: to_pairs(operation.headers),
            body: Binary {
                subtype: BinarySubtype::Generic,
                bytes: operation.body,
            },
            options: to_pairs(operation.options),
        }
    }
}

impl From<StoredOperation> for TransportOperation {
    fn from(operation: StoredOperation) -> Self {
        Self {
            message_id: operation.message_id,
            destination: operation.destination,
            headers: from_pairs(operation.headers),
            body: operation.body.bytes,
            options: from_pairs(operation.options),
        }
    }
}

impl From<StoredRecord> for OutboxRecord {
    fn from(record: StoredRecord) -> Self {
        Self {
            message_id: record.id,
            transport_operations: record
                .transport_operations
                .into_iter()
                .map(TransportOperation::from)
                .collect(),
            dispatched: record.dispatched,
            dispatched_at: record
                .dispatched_at
                .and_then(|at| DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis())),
        }
    }
}
