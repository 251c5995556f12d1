//! Subscription persister.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use tracing::debug;

use super::{
    MessageType, Subscriber, ENDPOINT_ELEMENT, MESSAGE_TYPE_ELEMENT, SUBSCRIPTIONS_COLLECTION,
    TRANSPORT_ADDRESS_ELEMENT,
};
use crate::error::{PersistenceError, Result};
use crate::interfaces::SubscriptionStorage;
use crate::storage::{DocumentStore, IndexDefinition};

/// Document store backed [`SubscriptionStorage`].
#[derive(Clone)]
pub struct SubscriptionPersister {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl SubscriptionPersister {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_collection(store, SUBSCRIPTIONS_COLLECTION)
    }

    pub fn with_collection(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Unique (type, address) index plus a lookup index covering the endpoint.
    pub async fn create_indexes(&self) -> Result<()> {
        let indexes = vec![
            IndexDefinition::new(doc! {
                MESSAGE_TYPE_ELEMENT: 1,
                TRANSPORT_ADDRESS_ELEMENT: 1,
            })
            .unique(),
            IndexDefinition::new(doc! {
                MESSAGE_TYPE_ELEMENT: 1,
                TRANSPORT_ADDRESS_ELEMENT: 1,
                ENDPOINT_ELEMENT: 1,
            }),
        ];
        self.store.create_indexes(&self.collection, indexes).await?;
        Ok(())
    }

    fn key(subscriber: &Subscriber, message_type: &MessageType) -> Document {
        doc! {
            MESSAGE_TYPE_ELEMENT: &message_type.type_name,
            TRANSPORT_ADDRESS_ELEMENT: &subscriber.transport_address,
        }
    }
}

/// Duplicate keys are the expected outcome of a lost insert or upsert race.
fn ignore_duplicate(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_duplicate_key() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl SubscriptionStorage for SubscriptionPersister {
    async fn subscribe(&self, subscriber: &Subscriber, message_type: &MessageType) -> Result<()> {
        let key = Self::key(subscriber, message_type);

        let Some(endpoint) = &subscriber.endpoint else {
            let inserted = ignore_duplicate(
                self.store
                    .insert_one(&self.collection, key)
                    .await
                    .map_err(PersistenceError::from),
            )?;
            if !inserted {
                debug!(
                    message_type = %message_type,
                    address = %subscriber.transport_address,
                    "Legacy subscription already exists; keeping existing record"
                );
            }
            return Ok(());
        };

        let update = doc! { "$set": { ENDPOINT_ELEMENT: endpoint } };
        let result = self
            .store
            .update_one(&self.collection, key, update, true)
            .await
            .map_err(PersistenceError::from);
        match result {
            Ok(outcome) => debug!(
                message_type = %message_type,
                address = %subscriber.transport_address,
                endpoint = %endpoint,
                created = outcome.upserted_id.is_some(),
                modified = outcome.modified_count,
                "Subscription upserted"
            ),
            Err(e) if e.is_duplicate_key() => debug!(
                message_type = %message_type,
                address = %subscriber.transport_address,
                "Concurrent subscription upsert won the race"
            ),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn unsubscribe(&self, subscriber: &Subscriber, message_type: &MessageType) -> Result<()> {
        let deleted = self
            .store
            .delete_many(&self.collection, Self::key(subscriber, message_type))
            .await?;
        debug!(
            message_type = %message_type,
            address = %subscriber.transport_address,
            deleted,
            "Unsubscribed"
        );
        Ok(())
    }

    async fn get_subscriber_addresses_for_message(
        &self,
        message_types: &[MessageType],
    ) -> Result<Vec<Subscriber>> {
        if message_types.is_empty() {
            return Ok(Vec::new());
        }

        let type_names: Vec<Bson> = message_types
            .iter()
            .map(|t| Bson::String(t.type_name.clone()))
            .collect();
        let filter = doc! { MESSAGE_TYPE_ELEMENT: { "$in": type_names } };
        let projection = doc! {
            TRANSPORT_ADDRESS_ELEMENT: 1,
            ENDPOINT_ELEMENT: 1,
            "_id": 0,
        };

        let documents = self
            .store
            .find(&self.collection, filter, Some(projection))
            .await?;

        let mut seen = HashSet::new();
        let mut subscribers = Vec::new();
        for document in documents {
            let transport_address = document
                .get_str(TRANSPORT_ADDRESS_ELEMENT)
                .map_err(|_| PersistenceError::MissingElement(TRANSPORT_ADDRESS_ELEMENT.to_string()))?
                .to_string();
            let endpoint = document.get_str(ENDPOINT_ELEMENT).ok().map(str::to_string);
            let subscriber = Subscriber::new(transport_address, endpoint);
            if seen.insert(subscriber.clone()) {
                subscribers.push(subscriber);
            }
        }
        Ok(subscribers)
    }
}
