//! Storage contracts consumed by the host message pipeline.
//!
//! These traits define the contracts for:
//! - Outbox storage (deduplication of dispatched operations)
//! - Subscription storage (durable publish/subscribe routing)
//!
//! Saga persistence is typed per saga and lives on
//! [`SagaPersister`](crate::sagas::SagaPersister) directly.

pub mod outbox_storage;
pub mod subscription_storage;

pub use outbox_storage::OutboxStorage;
pub use subscription_storage::SubscriptionStorage;
