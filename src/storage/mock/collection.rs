//! In-memory collection with unique-index enforcement.

use std::collections::{BTreeMap, HashMap};

use bson::oid::ObjectId;
use bson::{Bson, Document};

use super::matcher::{self, values_equal};
use crate::storage::{IndexDefinition, StoreError, StoreResult, UpdateOutcome};

/// Canonical key of a document's `_id`.
pub(crate) type IdKey = String;

pub(crate) fn id_key(id: &Bson) -> IdKey {
    id.to_string()
}

#[derive(Debug, Clone)]
pub(crate) struct StoredDocument {
    pub document: Document,
    /// Revision of the last committed write; 0 for uncommitted transaction writes.
    pub revision: u64,
}

/// One collection's documents and indexes.
///
/// Transaction working copies track the documents they write together with
/// the revision each document had when the transaction first touched it.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionState {
    pub documents: BTreeMap<IdKey, StoredDocument>,
    pub indexes: Vec<IndexDefinition>,
    pub writes: Option<HashMap<IdKey, Option<u64>>>,
}

impl CollectionState {
    /// Copy used as a transaction's private working set.
    pub fn working_copy(&self) -> Self {
        Self {
            documents: self.documents.clone(),
            indexes: self.indexes.clone(),
            writes: Some(HashMap::new()),
        }
    }

    fn record_write(&mut self, key: &IdKey) {
        let base = self.documents.get(key).map(|d| d.revision);
        if let Some(writes) = self.writes.as_mut() {
            writes.entry(key.clone()).or_insert(base);
        }
    }

    pub fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        Ok(self.first_match(filter)?.map(|key| self.documents[&key].document.clone()))
    }

    pub fn find(&self, filter: &Document, projection: Option<&Document>) -> StoreResult<Vec<Document>> {
        let mut found = Vec::new();
        for stored in self.documents.values() {
            if matcher::matches(&stored.document, filter)? {
                found.push(match projection {
                    Some(projection) => matcher::project(&stored.document, projection),
                    None => stored.document.clone(),
                });
            }
        }
        Ok(found)
    }

    fn first_match(&self, filter: &Document) -> StoreResult<Option<IdKey>> {
        for (key, stored) in &self.documents {
            if matcher::matches(&stored.document, filter)? {
                return Ok(Some(key.clone()));
            }
        }
        Ok(None)
    }

    pub fn insert(&mut self, name: &str, mut document: Document, revision: u64) -> StoreResult<Bson> {
        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = Document::new();
                with_id.insert("_id", id.clone());
                for (field, value) in document {
                    with_id.insert(field, value);
                }
                document = with_id;
                id
            }
        };
        let key = id_key(&id);
        if self.documents.contains_key(&key) {
            return Err(duplicate(name));
        }
        self.check_unique(name, &key, &document)?;
        self.record_write(&key);
        self.documents.insert(key, StoredDocument { document, revision });
        Ok(id)
    }

    pub fn replace_one(
        &mut self,
        name: &str,
        filter: &Document,
        mut replacement: Document,
        revision: u64,
    ) -> StoreResult<UpdateOutcome> {
        let Some(key) = self.first_match(filter)? else {
            return Ok(UpdateOutcome::default());
        };
        let current = &self.documents[&key].document;
        if let Some(id) = current.get("_id") {
            replacement.insert("_id", id.clone());
        }
        if replacement == *current {
            return Ok(UpdateOutcome {
                matched_count: 1,
                ..Default::default()
            });
        }
        self.check_unique(name, &key, &replacement)?;
        self.record_write(&key);
        self.documents.insert(
            key,
            StoredDocument {
                document: replacement,
                revision,
            },
        );
        Ok(UpdateOutcome {
            matched_count: 1,
            modified_count: 1,
            upserted_id: None,
        })
    }

    pub fn update_one(
        &mut self,
        name: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
        revision: u64,
    ) -> StoreResult<UpdateOutcome> {
        match self.first_match(filter)? {
            Some(key) => {
                let mut updated = self.documents[&key].document.clone();
                matcher::apply_update(&mut updated, update)?;
                if updated == self.documents[&key].document {
                    return Ok(UpdateOutcome {
                        matched_count: 1,
                        ..Default::default()
                    });
                }
                self.check_unique(name, &key, &updated)?;
                self.record_write(&key);
                self.documents.insert(
                    key,
                    StoredDocument {
                        document: updated,
                        revision,
                    },
                );
                Ok(UpdateOutcome {
                    matched_count: 1,
                    modified_count: 1,
                    upserted_id: None,
                })
            }
            None if upsert => {
                let document = matcher::upsert_document(filter, update)?;
                let id = self.insert(name, document, revision)?;
                Ok(UpdateOutcome {
                    upserted_id: Some(id),
                    ..Default::default()
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    pub fn delete_one(&mut self, filter: &Document) -> StoreResult<u64> {
        match self.first_match(filter)? {
            Some(key) => {
                self.record_write(&key);
                self.documents.remove(&key);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    pub fn delete_many(&mut self, filter: &Document) -> StoreResult<u64> {
        let mut doomed = Vec::new();
        for (key, stored) in &self.documents {
            if matcher::matches(&stored.document, filter)? {
                doomed.push(key.clone());
            }
        }
        for key in &doomed {
            self.record_write(key);
            self.documents.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    pub fn create_index(&mut self, name: &str, index: IndexDefinition) -> StoreResult<()> {
        let index_name = index.resolved_name();
        if let Some(existing) = self
            .indexes
            .iter()
            .find(|i| i.resolved_name() == index_name)
        {
            if existing.keys == index.keys
                && existing.unique == index.unique
                && existing.expire_after == index.expire_after
            {
                return Ok(());
            }
            return Err(StoreError::IndexConflict(index_name));
        }

        if index.unique {
            let mut seen: Vec<Vec<Bson>> = Vec::new();
            for stored in self.documents.values() {
                let values = index_values(&index, &stored.document);
                if seen.iter().any(|other| tuple_equal(other, &values)) {
                    return Err(duplicate(name));
                }
                seen.push(values);
            }
        }

        self.indexes.push(IndexDefinition {
            name: Some(index_name),
            ..index
        });
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> StoreResult<()> {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.resolved_name() != name);
        if self.indexes.len() == before {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Reject `document` if it collides with another document on a unique index.
    pub fn check_unique(&self, name: &str, key: &IdKey, document: &Document) -> StoreResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let values = index_values(index, document);
            let collides = self
                .documents
                .iter()
                .filter(|(other_key, _)| *other_key != key)
                .any(|(_, other)| tuple_equal(&index_values(index, &other.document), &values));
            if collides {
                return Err(duplicate(name));
            }
        }
        Ok(())
    }
}

fn index_values(index: &IndexDefinition, document: &Document) -> Vec<Bson> {
    index
        .keys
        .keys()
        .map(|field| document.get(field).cloned().unwrap_or(Bson::Null))
        .collect()
}

fn tuple_equal(left: &[Bson], right: &[Bson]) -> bool {
    left.len() == right.len() && left.iter().zip(right).all(|(l, r)| values_equal(l, r))
}

fn duplicate(name: &str) -> StoreError {
    StoreError::DuplicateKey {
        collection: name.to_string(),
    }
}
