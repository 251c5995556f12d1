//! Bootstrap utilities for persistence binaries.

use backon::Retryable;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;
use crate::storage::{DeploymentInfo, DocumentStore, StoreError, StoreResult};
use crate::utils::retry::connection_backoff;

/// Initialize tracing with ANGZARR_LOG environment variable.
///
/// Defaults to "info" level if ANGZARR_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait until the store answers, retrying while it is unreachable.
///
/// Returns the deployment description, or the last error once the
/// connection backoff is exhausted.
pub async fn wait_for_store(store: &dyn DocumentStore) -> StoreResult<DeploymentInfo> {
    let deployment = (|| store.describe_deployment())
        .retry(connection_backoff())
        .when(|e: &StoreError| matches!(e, StoreError::Unavailable(_)))
        .notify(|e: &StoreError, delay| {
            warn!(
                database = store.database_name(),
                error = %e,
                ?delay,
                "Store unreachable; retrying"
            );
        })
        .await?;
    info!(database = store.database_name(), topology = %deployment.topology, "Connected to store");
    Ok(deployment)
}
