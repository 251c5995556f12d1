//! Optimistic-concurrency saga persister.

use std::sync::Arc;

use bson::{doc, Bson, Document};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::{MemberMapCache, SagaCorrelationProperty, SagaData, SagaRegistry, ID_ELEMENT};
use crate::error::{PersistenceError, Result};
use crate::session::{SagaVersion, StorageSession};

/// Saga CRUD over a [`StorageSession`].
///
/// Every load records the stored version in the session; `update` and
/// `complete` write only if the document still carries that version.
#[derive(Debug, Clone)]
pub struct SagaPersister {
    registry: Arc<SagaRegistry>,
    member_maps: Arc<MemberMapCache>,
    version_element: String,
}

impl SagaPersister {
    pub fn new(
        registry: Arc<SagaRegistry>,
        member_maps: Arc<MemberMapCache>,
        version_element: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            member_maps,
            version_element: version_element.into(),
        }
    }

    pub fn version_element(&self) -> &str {
        &self.version_element
    }

    /// Insert a new saga at version 0.
    ///
    /// A saga with the same identity or correlation value fails with a
    /// duplicate-key error.
    pub async fn save<T: SagaData>(
        &self,
        saga: &T,
        correlation: Option<&SagaCorrelationProperty>,
        session: &mut StorageSession,
    ) -> Result<()> {
        let metadata = self.registry.metadata::<T>()?;
        let document = self.to_document(saga, SagaVersion::INITIAL)?;

        session.insert_one(&metadata.collection_name, document).await?;

        debug!(
            saga_type = T::SAGA_TYPE,
            id = %saga.id(),
            correlation = ?correlation.map(|c| &c.name),
            "Saga saved"
        );
        Ok(())
    }

    /// Replace the saga if it still has the version loaded in this unit of work.
    pub async fn update<T: SagaData>(&self, saga: &T, session: &mut StorageSession) -> Result<()> {
        let metadata = self.registry.metadata::<T>()?;
        let loaded = session
            .retrieve_version(T::SAGA_TYPE)
            .ok_or(PersistenceError::VersionNotLoaded(T::SAGA_TYPE))?;
        let next = loaded.next();

        let document = self.to_document(saga, next)?;
        let outcome = session
            .replace_one(
                &metadata.collection_name,
                self.version_filter(saga.id(), loaded),
                document,
            )
            .await?;

        if outcome.modified_count != 1 {
            return Err(PersistenceError::ConcurrencyConflict {
                saga_type: T::SAGA_TYPE,
                id: saga.id(),
            });
        }

        session.store_version(T::SAGA_TYPE, next);
        debug!(saga_type = T::SAGA_TYPE, id = %saga.id(), version = %next, "Saga updated");
        Ok(())
    }

    /// Load a saga by identity.
    pub async fn get<T: SagaData>(&self, id: Uuid, session: &mut StorageSession) -> Result<Option<T>> {
        let metadata = self.registry.metadata::<T>()?;
        let found = session
            .find_one(&metadata.collection_name, doc! { ID_ELEMENT: id.to_string() })
            .await?;
        found.map(|document| self.load(document, session)).transpose()
    }

    /// Load a saga by the value of one of its properties.
    pub async fn get_by_property<T, V>(
        &self,
        property: &str,
        value: &V,
        session: &mut StorageSession,
    ) -> Result<Option<T>>
    where
        T: SagaData,
        V: Serialize + ?Sized,
    {
        let metadata = self.registry.metadata::<T>()?;
        let element = self.member_maps.get_or_add::<T>(property);

        let mut filter = Document::new();
        filter.insert(element.to_string(), bson::to_bson(value)?);

        let found = session.find_one(&metadata.collection_name, filter).await?;
        found.map(|document| self.load(document, session)).transpose()
    }

    /// Delete the saga if it still has the version loaded in this unit of work.
    pub async fn complete<T: SagaData>(&self, saga: &T, session: &mut StorageSession) -> Result<()> {
        let metadata = self.registry.metadata::<T>()?;
        let loaded = session
            .retrieve_version(T::SAGA_TYPE)
            .ok_or(PersistenceError::VersionNotLoaded(T::SAGA_TYPE))?;

        let deleted = session
            .delete_one(&metadata.collection_name, self.version_filter(saga.id(), loaded))
            .await?;

        if deleted != 1 {
            return Err(PersistenceError::ConcurrencyConflict {
                saga_type: T::SAGA_TYPE,
                id: saga.id(),
            });
        }

        session.forget_version(T::SAGA_TYPE);
        debug!(saga_type = T::SAGA_TYPE, id = %saga.id(), "Saga completed");
        Ok(())
    }

    fn to_document<T: SagaData>(&self, saga: &T, version: SagaVersion) -> Result<Document> {
        let mut document = bson::to_document(saga)?;
        document.insert(ID_ELEMENT, saga.id().to_string());
        document.insert(self.version_element.clone(), version.value());
        Ok(document)
    }

    fn version_filter(&self, id: Uuid, version: SagaVersion) -> Document {
        let mut filter = doc! { ID_ELEMENT: id.to_string() };
        filter.insert(self.version_element.clone(), version.value());
        filter
    }

    /// Record the stored version, then deserialize without it.
    fn load<T: SagaData>(&self, mut document: Document, session: &mut StorageSession) -> Result<T> {
        let version = match document.remove(&self.version_element) {
            Some(Bson::Int32(value)) => SagaVersion::new(value),
            Some(Bson::Int64(value)) => i32::try_from(value).map(SagaVersion::new).map_err(|_| {
                PersistenceError::InvalidVersion {
                    element: self.version_element.clone(),
                    value,
                }
            })?,
            _ => return Err(PersistenceError::MissingElement(self.version_element.clone())),
        };
        let saga: T = bson::from_document(document)?;
        session.store_version(T::SAGA_TYPE, version);
        Ok(saga)
    }
}
