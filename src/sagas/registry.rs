//! Static saga registry.

use std::collections::HashMap;

use bson::doc;
use tracing::{debug, info};

use super::{MemberMapCache, SagaData};
use crate::config::CollectionNamingConvention;
use crate::error::{PersistenceError, Result};
use crate::storage::{DocumentStore, IndexDefinition, StoreError};

/// Storage layout of one saga type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaMetadata {
    pub saga_type: &'static str,
    pub collection_name: String,
    /// Element holding the correlation value; `None` when sagas correlate by identity.
    pub correlation_element: Option<String>,
}

/// Saga type to storage layout, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct SagaRegistry {
    sagas: HashMap<&'static str, SagaMetadata>,
}

impl SagaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register saga type `T`, correlated by `correlation_property` (or identity).
    pub fn register<T: SagaData>(
        &mut self,
        naming: &CollectionNamingConvention,
        member_maps: &MemberMapCache,
        correlation_property: Option<&str>,
    ) -> &SagaMetadata {
        let correlation_element = correlation_property
            .filter(|property| *property != T::ID_PROPERTY)
            .map(|property| member_maps.get_or_add::<T>(property).to_string());

        let metadata = SagaMetadata {
            saga_type: T::SAGA_TYPE,
            collection_name: naming(T::SAGA_TYPE),
            correlation_element,
        };
        debug!(
            saga_type = T::SAGA_TYPE,
            collection = %metadata.collection_name,
            correlation = ?metadata.correlation_element,
            "Registered saga"
        );
        self.sagas.entry(T::SAGA_TYPE).or_insert(metadata)
    }

    pub fn metadata<T: SagaData>(&self) -> Result<&SagaMetadata> {
        self.sagas
            .get(T::SAGA_TYPE)
            .ok_or(PersistenceError::UnknownSagaType(T::SAGA_TYPE))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SagaMetadata> {
        self.sagas.values()
    }

    pub fn len(&self) -> usize {
        self.sagas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sagas.is_empty()
    }

    /// Prepare storage for every registered saga.
    ///
    /// Correlated sagas get a unique ascending index on the correlation
    /// element; sagas correlated by identity only need their collection.
    pub async fn initialize(&self, store: &dyn DocumentStore) -> Result<()> {
        for metadata in self.sagas.values() {
            match &metadata.correlation_element {
                Some(element) => {
                    let mut keys = doc! {};
                    keys.insert(element.clone(), 1);
                    store
                        .create_indexes(
                            &metadata.collection_name,
                            vec![IndexDefinition::new(keys).unique()],
                        )
                        .await?;
                }
                None => match store.create_collection(&metadata.collection_name).await {
                    Ok(()) | Err(StoreError::NamespaceExists(_)) => {}
                    Err(e) => return Err(e.into()),
                },
            }
            info!(
                saga_type = metadata.saga_type,
                collection = %metadata.collection_name,
                "Saga storage initialized"
            );
        }
        Ok(())
    }
}
