//! Retry utilities for hosts: backoff builders and unit-of-work retries.
//!
//! Persisters never retry on their own. A host that wants to re-run a unit
//! of work after a concurrency conflict, write conflict or transaction
//! timeout wraps the whole unit of work with [`retry_unit_of_work`].

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::error::{PersistenceError, Result};

/// Standard backoff for retrying a unit of work.
///
/// - Min delay: 10ms
/// - Max delay: 2s
/// - Max attempts: 10
/// - Jitter enabled
pub fn unit_of_work_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(10)
        .with_jitter()
}

/// Backoff for reaching the store at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the backoff is exhausted.
///
/// Each attempt must open its own session so every retry re-reads state.
pub async fn retry_unit_of_work<T, F, Fut>(backoff: ExponentialBuilder, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    operation
        .retry(backoff)
        .when(PersistenceError::is_retryable)
        .notify(|err: &PersistenceError, delay: Duration| {
            debug!(error = %err, ?delay, "Retrying unit of work");
        })
        .await
}
