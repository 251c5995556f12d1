//! Correlation property to element name resolution.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{SagaData, ID_ELEMENT};

/// Cache of serialized element names, keyed by (saga type, property).
///
/// Entries are computed on first access and never invalidated. Resolution
/// is deterministic, so two threads racing on the same key store the same
/// value and the loser's insert is harmless.
#[derive(Debug, Default)]
pub struct MemberMapCache {
    entries: RwLock<HashMap<(&'static str, String), Arc<str>>>,
}

impl MemberMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Element name of `property` on saga type `T`.
    pub fn get_or_add<T: SagaData>(&self, property: &str) -> Arc<str> {
        self.get_or_add_with(T::SAGA_TYPE, property, || {
            if property == T::ID_PROPERTY {
                ID_ELEMENT.to_string()
            } else {
                T::element_name(property)
            }
        })
    }

    pub fn get_or_add_with(
        &self,
        saga_type: &'static str,
        property: &str,
        resolve: impl FnOnce() -> String,
    ) -> Arc<str> {
        let key = (saga_type, property.to_string());
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(name) = entries.get(&key) {
                return Arc::clone(name);
            }
        }

        let resolved: Arc<str> = Arc::from(resolve());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_insert(resolved))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
