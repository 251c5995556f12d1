//! TTL index removing dispatched outbox records.

use std::time::Duration;

use bson::doc;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::{DocumentStore, IndexDefinition};

/// Name of the TTL index on `dispatched_at`.
pub const CLEANUP_INDEX_NAME: &str = "OutboxCleanup";

/// What [`ensure_cleanup_index`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupIndex {
    Created,
    /// Existed with a different expiration and was dropped and created again.
    Recreated,
    Unchanged,
}

/// Make the cleanup index expire dispatched records after `retention`.
///
/// Retention is truncated to whole seconds, the server's TTL resolution, so
/// an unchanged setting compares equal to what is stored.
pub async fn ensure_cleanup_index(
    store: &dyn DocumentStore,
    collection: &str,
    retention: Duration,
) -> Result<CleanupIndex> {
    let retention = Duration::from_secs(retention.as_secs());
    let existing = store
        .list_indexes(collection)
        .await?
        .into_iter()
        .find(|index| index.resolved_name() == CLEANUP_INDEX_NAME);

    let outcome = match existing {
        Some(index) if index.expire_after == Some(retention) => {
            debug!(collection, ?retention, "Outbox cleanup index up to date");
            return Ok(CleanupIndex::Unchanged);
        }
        Some(index) => {
            info!(
                collection,
                previous = ?index.expire_after,
                ?retention,
                "Outbox retention changed; recreating cleanup index"
            );
            store.drop_index(collection, CLEANUP_INDEX_NAME).await?;
            CleanupIndex::Recreated
        }
        None => CleanupIndex::Created,
    };

    let index = IndexDefinition::new(doc! { "dispatched_at": 1 })
        .named(CLEANUP_INDEX_NAME)
        .expire_after(retention);
    store.create_indexes(collection, vec![index]).await?;
    Ok(outcome)
}
