//! Persistence error taxonomy.
//!
//! The core never retries on its own. Every failure is surfaced as a typed
//! error and [`PersistenceError::is_retryable`] tells the host whether the
//! whole unit of work may be attempted again.

use std::time::Duration;

use uuid::Uuid;

use crate::storage::StoreError;

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Errors surfaced by sessions and persisters.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Invalid or unsupported configuration, detected at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A version-gated saga write matched no document.
    #[error("The '{saga_type}' saga with id '{id}' was updated by another process or no longer exists")]
    ConcurrencyConflict { saga_type: &'static str, id: Uuid },

    /// Update or complete issued without loading the saga in this unit of work.
    #[error("No version recorded for saga type '{0}' in this unit of work; load the saga before updating or completing it")]
    VersionNotLoaded(&'static str),

    #[error("Saga type '{0}' is not registered with the persistence")]
    UnknownSagaType(&'static str),

    /// The transaction outlived its maximum duration.
    #[error("Transaction exceeded its maximum duration of {0:?}")]
    TransactionTimeout(Duration),

    #[error("Storage session has already been completed or disposed")]
    SessionClosed,

    #[error("Document is missing the '{0}' element")]
    MissingElement(String),

    /// A stored saga version does not fit the 32-bit version counter.
    #[error("The '{element}' element holds {value}, which is out of range for a saga version")]
    InvalidVersion { element: String, value: i64 },

    #[error("BSON serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    #[error("BSON deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PersistenceError {
    /// Whether retrying the whole unit of work can succeed.
    ///
    /// Retryable:
    /// - `ConcurrencyConflict`: another unit of work won the version race
    /// - `TransactionTimeout`: the unit of work ran too long
    /// - store write conflicts and connectivity failures
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistenceError::ConcurrencyConflict { .. } | PersistenceError::TransactionTimeout(_) => {
                true
            }
            PersistenceError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the store rejected a write because of a unique index.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, PersistenceError::Store(StoreError::DuplicateKey { .. }))
    }
}
