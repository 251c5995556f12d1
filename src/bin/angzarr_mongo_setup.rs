//! angzarr-mongo-setup: MongoDB persistence installer
//!
//! Connects to the configured database, verifies the deployment supports the
//! configured persistence features and creates the outbox and subscription
//! collections with their indexes. Safe to run repeatedly; existing indexes
//! are left in place and the outbox cleanup index is recreated only when the
//! retention period changed.
//!
//! Saga collections are created by the host when it builds its persistence
//! with its registered saga types.
//!
//! ## Configuration
//! - ANGZARR_CONFIG: Path to YAML configuration file
//! - ANGZARR__MONGODB__URI: MongoDB connection URI
//! - ANGZARR__MONGODB__DATABASE: Database name
//! - ANGZARR__PERSISTENCE__USE_TRANSACTIONS: Disable to run against standalone servers
//! - ANGZARR_LOG: Log filter (default: info)

use std::sync::Arc;

use tracing::info;

use angzarr_mongo_persistence::config::Config;
use angzarr_mongo_persistence::utils::bootstrap::{init_tracing, wait_for_store};
use angzarr_mongo_persistence::{MongoDocumentStore, MongoPersistence};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    info!(
        database = %config.mongodb.database,
        use_transactions = config.persistence.use_transactions,
        outbox = config.persistence.outbox.enabled,
        subscriptions = config.persistence.subscriptions.enabled,
        "Starting angzarr-mongo-setup"
    );

    let store = Arc::new(
        MongoDocumentStore::connect(&config.mongodb.uri, &config.mongodb.database).await?,
    );
    wait_for_store(store.as_ref()).await?;

    let persistence = MongoPersistence::builder(store)
        .with_config(&config.persistence)
        .build()
        .await?;

    info!(
        database = %config.mongodb.database,
        topology = %persistence.deployment().topology,
        outbox_collection = persistence.outbox().map(|o| o.collection()),
        subscriptions_collection = persistence.subscriptions().map(|s| s.collection()),
        "MongoDB persistence ready"
    );

    Ok(())
}
