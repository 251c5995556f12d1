//! Saga state persistence.
//!
//! Saga entities are stored one collection per saga type, keyed by `_id`,
//! with an added version element. Writes are compare-and-swap operations
//! filtered on the version the current unit of work loaded.

mod member_map;
mod persister;
mod registry;

use bson::Bson;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub use member_map::MemberMapCache;
pub use persister::SagaPersister;
pub use registry::{SagaMetadata, SagaRegistry};

/// Element name of the saga identity in stored documents.
pub const ID_ELEMENT: &str = "_id";

/// Default name of the version element added to saga documents.
pub const DEFAULT_VERSION_ELEMENT: &str = "_version";

/// Persistent state of a saga.
///
/// The identity must serialize as the `_id` element, e.g. with
/// `#[serde(rename = "_id")]` on the id field.
pub trait SagaData: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name of the saga type; keys the registry and the version cache.
    const SAGA_TYPE: &'static str;

    /// Name of the identity property.
    const ID_PROPERTY: &'static str = "id";

    fn id(&self) -> Uuid;

    /// Serialized element name of a property. Override when serde renames fields.
    fn element_name(property: &str) -> String {
        property.to_string()
    }
}

/// Correlation property and value a saga was started with.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaCorrelationProperty {
    pub name: String,
    pub value: Bson,
}

impl SagaCorrelationProperty {
    pub fn new(name: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
