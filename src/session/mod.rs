//! Unit-of-work storage sessions.
//!
//! A [`StorageSession`] wraps one store session for the duration of a unit of
//! work. With transactions enabled every operation joins one multi-document
//! transaction that is committed by [`StorageSession::complete`] and discarded
//! by [`StorageSession::dispose`] or by dropping the session.
//!
//! The session also carries the version cache: the saga version recorded by
//! the last load of each saga type in this unit of work.

mod version;


use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use version::SagaVersion;

use crate::error::{PersistenceError, Result};
use crate::sagas::SagaData;
use crate::storage::{DocumentStore, StoreResult, StoreSession, TransactionSettings, UpdateOutcome};

/// Default maximum lifetime of a transactional unit of work.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    fn remaining(&self) -> Result<Duration> {
        self.timeout
            .checked_sub(self.started.elapsed())
            .filter(|remaining| !remaining.is_zero())
            .ok_or(PersistenceError::TransactionTimeout(self.timeout))
    }
}

/// Run a store operation, bounded by the transaction deadline if there is one.
async fn within<T>(
    deadline: Option<Deadline>,
    operation: impl Future<Output = StoreResult<T>>,
) -> Result<T> {
    let Some(deadline) = deadline else {
        return Ok(operation.await?);
    };
    let remaining = deadline.remaining()?;
    match tokio::time::timeout(remaining, operation).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(PersistenceError::TransactionTimeout(deadline.timeout)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Completed,
    Disposed,
}

/// Storage context of one unit of work.
pub struct StorageSession {
    inner: Box<dyn StoreSession>,
    versions: HashMap<&'static str, SagaVersion>,
    transaction: Option<Deadline>,
    state: SessionState,
}

impl StorageSession {
    fn new(inner: Box<dyn StoreSession>, transaction: Option<Deadline>) -> Self {
        Self {
            inner,
            versions: HashMap::new(),
            transaction,
            state: SessionState::Open,
        }
    }

    /// Whether operations run inside a multi-document transaction.
    pub fn in_transaction(&self) -> bool {
        self.state == SessionState::Open && self.transaction.is_some()
    }

    /// Version recorded for a saga type by the last load in this unit of work.
    pub fn version_of<T: SagaData>(&self) -> Option<SagaVersion> {
        self.retrieve_version(T::SAGA_TYPE)
    }

    pub(crate) fn store_version(&mut self, saga_type: &'static str, version: SagaVersion) {
        self.versions.insert(saga_type, version);
    }

    pub(crate) fn retrieve_version(&self, saga_type: &'static str) -> Option<SagaVersion> {
        self.versions.get(saga_type).copied()
    }

    pub(crate) fn forget_version(&mut self, saga_type: &'static str) {
        self.versions.remove(saga_type);
    }

    fn deadline(&self) -> Result<Option<Deadline>> {
        if self.state != SessionState::Open {
            return Err(PersistenceError::SessionClosed);
        }
        Ok(self.transaction)
    }

    pub async fn insert_one(&mut self, collection: &str, document: Document) -> Result<()> {
        let deadline = self.deadline()?;
        within(deadline, self.inner.insert_one(collection, document)).await
    }

    pub async fn find_one(&mut self, collection: &str, filter: Document) -> Result<Option<Document>> {
        let deadline = self.deadline()?;
        within(deadline, self.inner.find_one(collection, filter)).await
    }

    pub async fn replace_one(
        &mut self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<UpdateOutcome> {
        let deadline = self.deadline()?;
        within(deadline, self.inner.replace_one(collection, filter, replacement)).await
    }

    pub async fn delete_one(&mut self, collection: &str, filter: Document) -> Result<u64> {
        let deadline = self.deadline()?;
        within(deadline, self.inner.delete_one(collection, filter)).await
    }

    pub async fn update_one(
        &mut self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let deadline = self.deadline()?;
        within(deadline, self.inner.update_one(collection, filter, update, upsert)).await
    }

    /// Commit the unit of work.
    ///
    /// A transaction that outlived its maximum duration is aborted and
    /// reported as [`PersistenceError::TransactionTimeout`]. The session is
    /// closed afterwards whatever the outcome.
    pub async fn complete(&mut self) -> Result<()> {
        let deadline = self.deadline()?;
        let Some(deadline) = deadline else {
            self.state = SessionState::Completed;
            return Ok(());
        };

        if let Err(timeout) = deadline.remaining() {
            self.abort("transaction timed out").await;
            return Err(timeout);
        }

        let committed = within(Some(deadline), self.inner.commit_transaction()).await;
        match committed {
            Ok(()) => {
                self.state = SessionState::Completed;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disposed;
                Err(e)
            }
        }
    }

    /// Discard the unit of work. Safe to call any number of times.
    pub async fn dispose(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        if self.transaction.is_some() {
            self.abort("session disposed").await;
        }
        self.state = SessionState::Disposed;
    }

    async fn abort(&mut self, reason: &str) {
        self.state = SessionState::Disposed;
        if let Err(e) = self.inner.abort_transaction().await {
            warn!(error = %e, reason, "Failed to abort transaction");
        }
    }
}

impl Drop for StorageSession {
    fn drop(&mut self) {
        if self.in_transaction() {
            debug!("Storage session dropped with an open transaction; discarding it");
        }
    }
}

impl std::fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSession")
            .field("state", &self.state)
            .field("in_transaction", &self.in_transaction())
            .field("versions", &self.versions)
            .finish()
    }
}

/// Opens [`StorageSession`]s. Built once per process and shared.
#[derive(Clone)]
pub struct StorageSessionFactory {
    store: Arc<dyn DocumentStore>,
    use_transactions: bool,
    transaction_timeout: Duration,
}

impl StorageSessionFactory {
    pub fn new(store: Arc<dyn DocumentStore>, use_transactions: bool, transaction_timeout: Duration) -> Self {
        Self {
            store,
            use_transactions,
            transaction_timeout,
        }
    }

    pub fn use_transactions(&self) -> bool {
        self.use_transactions
    }

    pub fn transaction_timeout(&self) -> Duration {
        self.transaction_timeout
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Begin a unit of work.
    pub async fn open(&self) -> Result<StorageSession> {
        let mut inner = self.store.start_session().await?;
        if !self.use_transactions {
            return Ok(StorageSession::new(inner, None));
        }

        inner
            .start_transaction(TransactionSettings {
                max_commit_time: self.transaction_timeout,
            })
            .await?;
        Ok(StorageSession::new(
            inner,
            Some(Deadline {
                started: Instant::now(),
                timeout: self.transaction_timeout,
            }),
        ))
    }
}

impl std::fmt::Debug for StorageSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSessionFactory")
            .field("database", &self.store.database_name())
            .field("use_transactions", &self.use_transactions)
            .field("transaction_timeout", &self.transaction_timeout)
            .finish()
    }
}
