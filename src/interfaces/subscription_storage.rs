//! Subscription storage interface.

use async_trait::async_trait;

use crate::error::Result;
use crate::subscriptions::{MessageType, Subscriber};

/// Interface for durable event subscriptions.
///
/// Implementations:
/// - `SubscriptionPersister`: document store backed
#[async_trait]
pub trait SubscriptionStorage: Send + Sync {
    /// Subscribe `subscriber` to `message_type`.
    ///
    /// Subscribing again with a different endpoint replaces the endpoint.
    async fn subscribe(&self, subscriber: &Subscriber, message_type: &MessageType) -> Result<()>;

    /// Remove every subscription of the subscriber's address to `message_type`.
    async fn unsubscribe(&self, subscriber: &Subscriber, message_type: &MessageType) -> Result<()>;

    /// Distinct subscribers of any of `message_types`.
    async fn get_subscriber_addresses_for_message(
        &self,
        message_types: &[MessageType],
    ) -> Result<Vec<Subscriber>>;
}
