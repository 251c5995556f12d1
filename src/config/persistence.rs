//! Persistence configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::outbox::DEFAULT_DEDUPLICATION_RETENTION_SECS;
use crate::sagas::DEFAULT_VERSION_ELEMENT;
use crate::session::DEFAULT_TRANSACTION_TIMEOUT;

/// MongoDB-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongodbConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
}

impl Default for MongodbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "angzarr".to_string(),
        }
    }
}

/// Saga, outbox and subscription persistence settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Run every unit of work in a multi-document transaction.
    pub use_transactions: bool,
    /// Maximum lifetime of a transaction.
    pub transaction_timeout_secs: u64,
    /// Element added to saga documents to hold their version.
    pub version_element_name: String,
    pub outbox: OutboxConfig,
    pub subscriptions: SubscriptionsConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            use_transactions: true,
            transaction_timeout_secs: DEFAULT_TRANSACTION_TIMEOUT.as_secs(),
            version_element_name: DEFAULT_VERSION_ELEMENT.to_string(),
            outbox: OutboxConfig::default(),
            subscriptions: SubscriptionsConfig::default(),
        }
    }
}

impl PersistenceConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

/// Outbox settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub enabled: bool,
    /// How long dispatched records are kept for deduplication.
    pub time_to_keep_deduplication_data_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_to_keep_deduplication_data_secs: DEFAULT_DEDUPLICATION_RETENTION_SECS,
        }
    }
}

impl OutboxConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.time_to_keep_deduplication_data_secs)
    }
}

/// Subscription storage settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionsConfig {
    pub enabled: bool,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
