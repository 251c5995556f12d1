//! Angzarr MongoDB persistence.
//!
//! Saga state, outbox deduplication records and event subscriptions stored
//! in MongoDB, coordinated through one storage session per unit of work.
//!
//! - [`session`]: unit-of-work sessions, optionally transactional
//! - [`sagas`]: optimistic-concurrency saga persister
//! - [`outbox`]: outbox records with TTL cleanup
//! - [`subscriptions`]: publish/subscribe registrations
//! - [`persistence`]: startup validation and wiring
//! - [`storage`]: document store port, MongoDB and in-memory adapters
//!
//! ```no_run
//! # async fn run() -> angzarr_mongo_persistence::Result<()> {
//! use std::sync::Arc;
//! use angzarr_mongo_persistence::{MongoDocumentStore, MongoPersistence};
//!
//! let store = MongoDocumentStore::connect("mongodb://localhost:27017/?replicaSet=rs0", "angzarr").await?;
//! let persistence = MongoPersistence::builder(Arc::new(store)).build().await?;
//!
//! let mut session = persistence.session_factory().open().await?;
//! // ... saga reads and writes through persistence.sagas() ...
//! session.complete().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod interfaces;
pub mod outbox;
pub mod persistence;
pub mod sagas;
pub mod session;
pub mod storage;
pub mod subscriptions;
pub mod utils;

pub use error::{PersistenceError, Result};
pub use interfaces::{OutboxStorage, SubscriptionStorage};
pub use outbox::{OutboxMessage, OutboxPersister, OutboxRecord, OutboxTransaction, TransportOperation};
pub use persistence::{MongoPersistence, PersistenceBuilder};
pub use sagas::{SagaCorrelationProperty, SagaData, SagaPersister};
pub use session::{SagaVersion, StorageSession, StorageSessionFactory};
pub use storage::{DocumentStore, MockDocumentStore, StoreError};
#[cfg(feature = "mongodb")]
pub use storage::MongoDocumentStore;
pub use subscriptions::{MessageType, Subscriber, SubscriptionPersister};
