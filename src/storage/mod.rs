//! Document store port and its implementations.
//!
//! Persisters talk to the database only through [`DocumentStore`] (collection
//! level operations, index management, deployment introspection) and
//! [`StoreSession`] (operations bound to one unit of work, optionally inside a
//! multi-document transaction).
//!
//! Filters are BSON documents restricted to equality, `$eq`, `$ne`, `$in`,
//! `$exists`, `$and` and `$or`. Updates are restricted to `$set` and
//! `$setOnInsert`.
//!
//! Implementations:
//! - `MongoDocumentStore`: MongoDB via the official driver
//! - `MockDocumentStore`: In-memory store for testing

use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};

pub mod mock;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use mock::MockDocumentStore;

#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoDocumentStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by a document store adapter.
///
/// Adapters classify native error codes into these variants so persisters
/// never inspect driver-specific codes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index (including `_id`) rejected the write.
    #[error("Duplicate key in collection '{collection}'")]
    DuplicateKey { collection: String },

    #[error("Collection '{0}' already exists")]
    NamespaceExists(String),

    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    #[error("Index '{0}' already exists with different options")]
    IndexConflict(String),

    /// Concurrent transactions touched the same document.
    #[error("Write conflict; the transaction must be retried")]
    WriteConflict,

    #[error("No transaction in progress")]
    NoTransaction,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported store operation: {0}")]
    Unsupported(String),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(::mongodb::error::Error),
}

impl StoreError {
    /// Transient failures that a later attempt of the unit of work can overcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::WriteConflict | StoreError::Unavailable(_))
    }
}

/// Kind of deployment the store is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Standalone,
    ReplicaSet,
    Sharded,
    Unknown,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Topology::Standalone => "Standalone",
            Topology::ReplicaSet => "ReplicaSet",
            Topology::Sharded => "Sharded",
            Topology::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Capabilities of the connected deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub topology: Topology,
    /// Server supports logical sessions.
    pub sessions_supported: bool,
    /// Server version is new enough for multi-document transactions on this topology.
    pub transactions_supported: bool,
}

impl DeploymentInfo {
    /// A replica set with session and transaction support.
    pub fn replica_set() -> Self {
        Self {
            topology: Topology::ReplicaSet,
            sessions_supported: true,
            transactions_supported: true,
        }
    }

    /// A standalone server: sessions but no transactions.
    pub fn standalone() -> Self {
        Self {
            topology: Topology::Standalone,
            sessions_supported: true,
            transactions_supported: false,
        }
    }
}

/// Options applied to every transaction started by a session.
///
/// Read/write concerns are always majority and reads go to the primary;
/// only the commit budget varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSettings {
    pub max_commit_time: Duration,
}

/// Index specification, used both to create indexes and to describe existing ones.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: Option<String>,
    pub keys: Document,
    pub unique: bool,
    /// TTL: documents expire this long after the indexed date.
    pub expire_after: Option<Duration>,
}

impl IndexDefinition {
    /// Ascending index over the given keys.
    pub fn new(keys: Document) -> Self {
        Self {
            name: None,
            keys,
            unique: false,
            expire_after: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Explicit name, or the server's default `field_1_other_-1` naming.
    pub fn resolved_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .keys
                .iter()
                .map(|(field, direction)| format!("{}_{}", field, direction_label(direction)))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

fn direction_label(direction: &Bson) -> String {
    match direction {
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => (*n as i64).to_string(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outcome of a replace or update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Collection-level operations, index management and session creation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the database all collections live in.
    fn database_name(&self) -> &str;

    /// Probe the deployment; also verifies connectivity.
    async fn describe_deployment(&self) -> StoreResult<DeploymentInfo>;

    /// Start a store-native session (no transaction yet).
    async fn start_session(&self) -> StoreResult<Box<dyn StoreSession>>;

    /// Create a collection; `NamespaceExists` if it is already there.
    async fn create_collection(&self, collection: &str) -> StoreResult<()>;

    /// Indexes of a collection; empty when the collection does not exist.
    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexDefinition>>;

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexDefinition>) -> StoreResult<()>;

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()>;

    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()>;

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>>;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> StoreResult<Vec<Document>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome>;

    /// Returns the number of deleted documents.
    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64>;
}

/// Operations bound to one store session.
///
/// Once a transaction is started, every operation joins it until it is
/// committed or aborted. Dropping a session with an open transaction
/// discards the transaction.
#[async_trait]
pub trait StoreSession: Send {
    async fn start_transaction(&mut self, settings: TransactionSettings) -> StoreResult<()>;

    async fn commit_transaction(&mut self) -> StoreResult<()>;

    async fn abort_transaction(&mut self) -> StoreResult<()>;

    async fn insert_one(&mut self, collection: &str, document: Document) -> StoreResult<()>;

    async fn find_one(&mut self, collection: &str, filter: Document) -> StoreResult<Option<Document>>;

    /// Atomically replace the first document matching `filter`.
    async fn replace_one(
        &mut self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<UpdateOutcome>;

    /// Atomically delete the first document matching `filter`; returns the deleted count.
    async fn delete_one(&mut self, collection: &str, filter: Document) -> StoreResult<u64>;

    async fn update_one(
        &mut self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome>;
}
