//! Collection naming and database name validation.

use std::sync::Arc;

use crate::error::{PersistenceError, Result};

/// Maps a saga type name to the name of the collection holding its documents.
pub type CollectionNamingConvention = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Collection for a saga type: the lowercased type name.
pub fn default_collection_naming() -> CollectionNamingConvention {
    Arc::new(|saga_type: &str| saga_type.to_lowercase())
}

/// Characters MongoDB rejects in database names.
const INVALID_DATABASE_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

/// Longest database name MongoDB accepts, in bytes.
const MAX_DATABASE_NAME_BYTES: usize = 63;

/// Reject database names the server would refuse.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PersistenceError::Configuration(
            "The database name must not be empty; set 'mongodb.database'".to_string(),
        ));
    }
    if name.len() > MAX_DATABASE_NAME_BYTES {
        return Err(PersistenceError::Configuration(format!(
            "The database name '{}' is longer than {} bytes; choose a shorter 'mongodb.database'",
            name, MAX_DATABASE_NAME_BYTES
        )));
    }
    if let Some(invalid) = name.chars().find(|c| INVALID_DATABASE_CHARS.contains(c)) {
        return Err(PersistenceError::Configuration(format!(
            "The database name '{}' contains the invalid character {:?}; fix 'mongodb.database'",
            name, invalid
        )));
    }
    Ok(())
}
