//! Backend factory for interface tests.
//!
//! Provides a unified way to create a document store and persistence based on
//! environment configuration. Every scenario gets its own database.

use std::env;
use std::sync::Arc;

use angzarr_mongo_persistence::storage::DocumentStore;
use angzarr_mongo_persistence::{MockDocumentStore, MongoPersistence};
use uuid::Uuid;

#[cfg(feature = "mongodb")]
use angzarr_mongo_persistence::MongoDocumentStore;

#[cfg(feature = "mongodb")]
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

#[cfg(feature = "mongodb")]
use tokio::sync::OnceCell;

use crate::steps::{ReminderSagaData, ShippingSagaData};

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mock,
    Mongodb,
}

impl StorageBackend {
    pub fn from_env() -> Self {
        match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "mock".to_string())
            .to_lowercase()
            .as_str()
        {
            "mongodb" | "mongo" => StorageBackend::Mongodb,
            _ => StorageBackend::Mock,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Mock => "mock",
            StorageBackend::Mongodb => "mongodb",
        }
    }
}

/// Persistence settings a scenario runs with.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub use_transactions: bool,
    pub outbox: bool,
    pub subscriptions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_transactions: true,
            outbox: true,
            subscriptions: true,
        }
    }
}

/// Holds the store and the persistence built over it.
pub struct StorageContext {
    pub store: Arc<dyn DocumentStore>,
    pub persistence: MongoPersistence,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("database", &self.store.database_name())
            .field("topology", &self.persistence.deployment().topology)
            .finish()
    }
}

impl StorageContext {
    /// Create a storage context for the configured backend.
    pub async fn new(backend: StorageBackend, settings: Settings) -> Self {
        let store: Arc<dyn DocumentStore> = match backend {
            StorageBackend::Mock => Arc::new(MockDocumentStore::new(database_name())),
            StorageBackend::Mongodb => create_mongodb().await,
        };

        let persistence = MongoPersistence::builder(Arc::clone(&store))
            .use_transactions(settings.use_transactions)
            .enable_outbox(settings.outbox)
            .enable_subscriptions(settings.subscriptions)
            .register_saga::<ShippingSagaData>(Some("order_id"))
            .register_saga::<ReminderSagaData>(None)
            .build()
            .await
            .expect("Failed to build persistence");

        StorageContext { store, persistence }
    }
}

fn database_name() -> String {
    format!("interfaces_{}", Uuid::new_v4().simple())
}

/// Single-node replica set shared by every scenario.
#[cfg(feature = "mongodb")]
static MONGODB: OnceCell<(ContainerAsync<GenericImage>, String)> = OnceCell::const_new();

#[cfg(feature = "mongodb")]
async fn start_replica_set() -> (ContainerAsync<GenericImage>, String) {
    use std::time::Duration;

    use bson::doc;

    let container = GenericImage::new("mongo", "7")
        .with_exposed_port(27017.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Waiting for connections"))
        .with_cmd(["--replSet", "rs0", "--bind_ip_all"])
        .with_startup_timeout(Duration::from_secs(120))
        .start()
        .await
        .expect("Failed to start MongoDB container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(27017)
        .await
        .expect("Failed to get port");
    let uri = format!("mongodb://{}:{}/?directConnection=true", host, port);

    let admin = MongoDocumentStore::connect(&uri, "admin")
        .await
        .expect("Failed to connect to MongoDB");
    admin
        .database()
        .run_command(doc! {
            "replSetInitiate": {
                "_id": "rs0",
                "members": [{ "_id": 0, "host": "localhost:27017" }],
            }
        })
        .await
        .expect("Failed to initiate replica set");

    // Wait for the node to become primary
    for _ in 0..60 {
        if let Ok(hello) = admin.database().run_command(doc! { "hello": 1 }).await {
            if hello.get_bool("isWritablePrimary").unwrap_or(false) {
                return (container, uri);
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("MongoDB replica set did not elect a primary");
}

#[cfg(feature = "mongodb")]
async fn create_mongodb() -> Arc<dyn DocumentStore> {
    let uri = match env::var("MONGODB_URI") {
        Ok(uri) => uri,
        Err(_) => MONGODB.get_or_init(start_replica_set).await.1.clone(),
    };
    let store = MongoDocumentStore::connect(&uri, &database_name())
        .await
        .expect("Failed to connect to MongoDB");
    Arc::new(store)
}

#[cfg(not(feature = "mongodb"))]
async fn create_mongodb() -> Arc<dyn DocumentStore> {
    panic!("MongoDB feature not enabled. Build with --features mongodb");
}
