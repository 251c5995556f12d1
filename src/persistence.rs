//! Persistence bootstrap.
//!
//! [`MongoPersistence::builder`] collects settings and saga registrations;
//! [`PersistenceBuilder::build`] validates them against the connected
//! deployment, prepares collections and indexes, and hands out the session
//! factory and persisters.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{
    default_collection_naming, validate_database_name, CollectionNamingConvention, PersistenceConfig,
};
use crate::error::{PersistenceError, Result};
use crate::outbox::{
    ensure_cleanup_index, OutboxPersister, DEFAULT_DEDUPLICATION_RETENTION_SECS,
};
use crate::sagas::{MemberMapCache, SagaData, SagaPersister, SagaRegistry, DEFAULT_VERSION_ELEMENT};
use crate::session::{StorageSessionFactory, DEFAULT_TRANSACTION_TIMEOUT};
use crate::storage::{DeploymentInfo, DocumentStore, StoreError, Topology};
use crate::subscriptions::SubscriptionPersister;

type Registration = Box<dyn FnOnce(&mut SagaRegistry, &CollectionNamingConvention, &MemberMapCache) + Send>;

/// Collects settings and saga registrations for [`MongoPersistence`].
pub struct PersistenceBuilder {
    store: Arc<dyn DocumentStore>,
    use_transactions: bool,
    transaction_timeout: Duration,
    collection_naming: CollectionNamingConvention,
    version_element: String,
    outbox_retention: Duration,
    outbox_enabled: bool,
    subscriptions_enabled: bool,
    registrations: Vec<Registration>,
}

impl PersistenceBuilder {
    fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            use_transactions: true,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            collection_naming: default_collection_naming(),
            version_element: DEFAULT_VERSION_ELEMENT.to_string(),
            outbox_retention: Duration::from_secs(DEFAULT_DEDUPLICATION_RETENTION_SECS),
            outbox_enabled: true,
            subscriptions_enabled: true,
            registrations: Vec::new(),
        }
    }

    /// Apply every setting of a loaded configuration.
    pub fn with_config(self, config: &PersistenceConfig) -> Self {
        self.use_transactions(config.use_transactions)
            .transaction_timeout(config.transaction_timeout())
            .version_element_name(config.version_element_name.clone())
            .outbox_retention(config.outbox.retention())
            .enable_outbox(config.outbox.enabled)
            .enable_subscriptions(config.subscriptions.enabled)
    }

    pub fn use_transactions(mut self, enabled: bool) -> Self {
        self.use_transactions = enabled;
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn collection_naming(mut self, naming: CollectionNamingConvention) -> Self {
        self.collection_naming = naming;
        self
    }

    pub fn version_element_name(mut self, name: impl Into<String>) -> Self {
        self.version_element = name.into();
        self
    }

    pub fn outbox_retention(mut self, retention: Duration) -> Self {
        self.outbox_retention = retention;
        self
    }

    pub fn enable_outbox(mut self, enabled: bool) -> Self {
        self.outbox_enabled = enabled;
        self
    }

    pub fn enable_subscriptions(mut self, enabled: bool) -> Self {
        self.subscriptions_enabled = enabled;
        self
    }

    /// Register saga type `T`, correlated by `correlation_property` or by identity.
    pub fn register_saga<T: SagaData>(mut self, correlation_property: Option<&str>) -> Self {
        let correlation_property = correlation_property.map(str::to_string);
        self.registrations.push(Box::new(
            move |registry: &mut SagaRegistry,
                  naming: &CollectionNamingConvention,
                  member_maps: &MemberMapCache| {
                registry.register::<T>(naming, member_maps, correlation_property.as_deref());
            },
        ));
        self
    }

    /// Validate settings against the deployment and prepare storage.
    pub async fn build(self) -> Result<MongoPersistence> {
        validate_database_name(self.store.database_name())?;
        if self.version_element.is_empty() || self.version_element == "_id" {
            return Err(PersistenceError::Configuration(format!(
                "'{}' cannot hold the saga version; change 'persistence.version_element_name'",
                self.version_element
            )));
        }

        let deployment = match self.store.describe_deployment().await {
            Ok(deployment) => deployment,
            Err(StoreError::Unavailable(reason)) => {
                return Err(PersistenceError::Configuration(format!(
                    "Unable to connect to the MongoDB server ({}); check 'mongodb.uri'",
                    reason
                )));
            }
            Err(e) => return Err(e.into()),
        };
        self.check_deployment(&deployment)?;

        if self.outbox_enabled && !self.use_transactions {
            return Err(PersistenceError::Configuration(
                "The outbox requires transactions; set 'persistence.use_transactions' to true \
                 or disable the outbox with 'persistence.outbox.enabled'"
                    .to_string(),
            ));
        }

        let member_maps = Arc::new(MemberMapCache::new());
        let mut registry = SagaRegistry::new();
        for register in self.registrations {
            register(&mut registry, &self.collection_naming, member_maps.as_ref());
        }
        registry.initialize(self.store.as_ref()).await?;
        let registry = Arc::new(registry);

        let factory = StorageSessionFactory::new(
            Arc::clone(&self.store),
            self.use_transactions,
            self.transaction_timeout,
        );

        let outbox = if self.outbox_enabled {
            let collection = (self.collection_naming)("OutboxRecord");
            let outbox = OutboxPersister::with_collection(factory.clone(), collection.clone())?;
            let cleanup =
                ensure_cleanup_index(self.store.as_ref(), &collection, self.outbox_retention).await?;
            info!(%collection, ?cleanup, retention = ?self.outbox_retention, "Outbox storage initialized");
            Some(outbox)
        } else {
            None
        };

        let subscriptions = if self.subscriptions_enabled {
            let collection = (self.collection_naming)("EventSubscription");
            let subscriptions = SubscriptionPersister::with_collection(Arc::clone(&self.store), collection);
            subscriptions.create_indexes().await?;
            info!(collection = subscriptions.collection(), "Subscription storage initialized");
            Some(subscriptions)
        } else {
            None
        };

        info!(
            database = self.store.database_name(),
            topology = %deployment.topology,
            transactions = self.use_transactions,
            sagas = registry.len(),
            "MongoDB persistence ready"
        );

        Ok(MongoPersistence {
            deployment,
            sagas: SagaPersister::new(Arc::clone(&registry), member_maps, self.version_element),
            registry,
            factory,
            outbox,
            subscriptions,
        })
    }

    /// Fail fast on deployments that cannot honour the requested settings.
    fn check_deployment(&self, deployment: &DeploymentInfo) -> Result<()> {
        if !deployment.sessions_supported {
            return Err(PersistenceError::Configuration(
                "The MongoDB server does not support sessions; MongoDB 3.6 or later is required"
                    .to_string(),
            ));
        }
        if !self.use_transactions {
            return Ok(());
        }
        match deployment.topology {
            Topology::ReplicaSet | Topology::Sharded => {}
            topology => {
                return Err(PersistenceError::Configuration(format!(
                    "Transactions are only supported on replica sets or sharded clusters \
                     (connected to {}); set 'persistence.use_transactions' to false",
                    topology
                )));
            }
        }
        if !deployment.transactions_supported {
            return Err(PersistenceError::Configuration(format!(
                "The MongoDB server version does not support transactions on a {} deployment; \
                 upgrade the server or set 'persistence.use_transactions' to false",
                deployment.topology
            )));
        }
        Ok(())
    }
}

/// Initialized persistence: session factory and persisters sharing one store.
pub struct MongoPersistence {
    deployment: DeploymentInfo,
    registry: Arc<SagaRegistry>,
    factory: StorageSessionFactory,
    sagas: SagaPersister,
    outbox: Option<OutboxPersister>,
    subscriptions: Option<SubscriptionPersister>,
}

impl MongoPersistence {
    pub fn builder(store: Arc<dyn DocumentStore>) -> PersistenceBuilder {
        PersistenceBuilder::new(store)
    }

    pub fn deployment(&self) -> &DeploymentInfo {
        &self.deployment
    }

    pub fn session_factory(&self) -> &StorageSessionFactory {
        &self.factory
    }

    pub fn registry(&self) -> &Arc<SagaRegistry> {
        &self.registry
    }

    pub fn sagas(&self) -> &SagaPersister {
        &self.sagas
    }

    /// `None` when the outbox is disabled.
    pub fn outbox(&self) -> Option<&OutboxPersister> {
        self.outbox.as_ref()
    }

    /// `None` when subscription storage is disabled.
    pub fn subscriptions(&self) -> Option<&SubscriptionPersister> {
        self.subscriptions.as_ref()
    }
}
