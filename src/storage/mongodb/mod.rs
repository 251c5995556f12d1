//! MongoDB implementation of the document store.

mod session;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, DatabaseOptions, FindOptions, IndexOptions, ReadConcern, ReadPreference,
    SelectionCriteria, UpdateOptions, WriteConcern,
};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::debug;

pub use session::MongoStoreSession;

use crate::storage::{
    DeploymentInfo, DocumentStore, IndexDefinition, StoreError, StoreResult, StoreSession, Topology,
    UpdateOutcome,
};

/// Server error codes reported for unique-index violations.
pub(crate) const DUPLICATE_KEY_CODES: [i32; 2] = [11000, 11001];

const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;
const NAMESPACE_EXISTS: i32 = 48;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
const WRITE_CONFLICT: i32 = 112;

/// Wire version of MongoDB 4.0, the first with replica set transactions.
const REPLICA_SET_TRANSACTIONS_WIRE_VERSION: i32 = 7;
/// Wire version of MongoDB 4.2, the first with sharded transactions.
const SHARDED_TRANSACTIONS_WIRE_VERSION: i32 = 8;

/// MongoDB implementation of [`DocumentStore`].
///
/// All reads and writes use majority read/write concern against the primary.
pub struct MongoDocumentStore {
    client: Client,
    database: Database,
}

impl MongoDocumentStore {
    /// Connect with a connection string.
    pub async fn connect(uri: &str, database_name: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| classify(e, ""))?;
        Ok(Self::new(client, database_name))
    }

    /// Wrap an existing client.
    pub fn new(client: Client, database_name: &str) -> Self {
        let options = DatabaseOptions::builder()
            .read_concern(ReadConcern::majority())
            .write_concern(majority_write_concern())
            .selection_criteria(primary())
            .build();
        let database = client.database_with_options(database_name, options);
        Self { client, database }
    }

    /// Get the database reference.
    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

pub(crate) fn majority_write_concern() -> WriteConcern {
    WriteConcern::builder().w(Acknowledgment::Majority).build()
}

pub(crate) fn primary() -> SelectionCriteria {
    SelectionCriteria::ReadPreference(ReadPreference::Primary)
}

/// Translate a driver error into the store's error vocabulary.
pub(crate) fn classify(error: MongoError, collection: &str) -> StoreError {
    let code = match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => Some(write_error.code),
        ErrorKind::Command(command_error) => Some(command_error.code),
        ErrorKind::ServerSelection { message, .. } => {
            return StoreError::Unavailable(message.clone());
        }
        _ => None,
    };

    match code {
        Some(code) if DUPLICATE_KEY_CODES.contains(&code) => StoreError::DuplicateKey {
            collection: collection.to_string(),
        },
        Some(NAMESPACE_EXISTS) => StoreError::NamespaceExists(collection.to_string()),
        Some(WRITE_CONFLICT) => StoreError::WriteConflict,
        Some(INDEX_NOT_FOUND) => StoreError::IndexNotFound(error.to_string()),
        Some(INDEX_OPTIONS_CONFLICT) | Some(INDEX_KEY_SPECS_CONFLICT) => {
            StoreError::IndexConflict(error.to_string())
        }
        _ if error.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) => {
            StoreError::WriteConflict
        }
        _ => StoreError::Mongo(error),
    }
}

fn is_namespace_not_found(error: &MongoError) -> bool {
    matches!(error.kind.as_ref(), ErrorKind::Command(e) if e.code == NAMESPACE_NOT_FOUND)
}

/// Interpret a `hello` reply.
pub(crate) fn deployment_from_hello(hello: &Document) -> DeploymentInfo {
    let topology = if hello.get_str("setName").is_ok() {
        Topology::ReplicaSet
    } else if hello.get_str("msg").ok() == Some("isdbgrid") {
        Topology::Sharded
    } else if hello.contains_key("maxWireVersion") {
        Topology::Standalone
    } else {
        Topology::Unknown
    };

    let sessions_supported = hello.contains_key("logicalSessionTimeoutMinutes");
    let wire_version = match hello.get("maxWireVersion") {
        Some(mongodb::bson::Bson::Int32(v)) => *v,
        Some(mongodb::bson::Bson::Int64(v)) => *v as i32,
        _ => 0,
    };
    let transactions_supported = match topology {
        Topology::ReplicaSet => wire_version >= REPLICA_SET_TRANSACTIONS_WIRE_VERSION,
        Topology::Sharded => wire_version >= SHARDED_TRANSACTIONS_WIRE_VERSION,
        Topology::Standalone | Topology::Unknown => false,
    };

    DeploymentInfo {
        topology,
        sessions_supported,
        transactions_supported,
    }
}

fn to_index_model(index: IndexDefinition) -> IndexModel {
    let options = IndexOptions::builder()
        .name(index.name)
        .unique(index.unique.then_some(true))
        .expire_after(index.expire_after)
        .build();
    IndexModel::builder().keys(index.keys).options(options).build()
}

fn from_index_model(model: IndexModel) -> IndexDefinition {
    let options = model.options.unwrap_or_default();
    IndexDefinition {
        name: options.name,
        keys: model.keys,
        unique: options.unique.unwrap_or(false),
        expire_after: options.expire_after,
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    fn database_name(&self) -> &str {
        self.database.name()
    }

    async fn describe_deployment(&self) -> StoreResult<DeploymentInfo> {
        let hello = self
            .database
            .run_command(doc! { "hello": 1 })
            .await
            .map_err(|e| classify(e, ""))?;
        let info = deployment_from_hello(&hello);
        debug!(
            topology = %info.topology,
            sessions = info.sessions_supported,
            transactions = info.transactions_supported,
            "MongoDB deployment described"
        );
        Ok(info)
    }

    async fn start_session(&self) -> StoreResult<Box<dyn StoreSession>> {
        let session = self
            .client
            .start_session()
            .await
            .map_err(|e| classify(e, ""))?;
        Ok(Box::new(MongoStoreSession::new(self.database.clone(), session)))
    }

    async fn create_collection(&self, collection: &str) -> StoreResult<()> {
        self.database
            .create_collection(collection)
            .await
            .map_err(|e| classify(e, collection))
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexDefinition>> {
        let mut cursor = match self.collection(collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(e) if is_namespace_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(classify(e, collection)),
        };

        let mut indexes = Vec::new();
        while cursor.advance().await.map_err(|e| classify(e, collection))? {
            let model = cursor
                .deserialize_current()
                .map_err(|e| classify(e, collection))?;
            indexes.push(from_index_model(model));
        }
        Ok(indexes)
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexDefinition>) -> StoreResult<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let models: Vec<IndexModel> = indexes.into_iter().map(to_index_model).collect();
        self.collection(collection)
            .create_indexes(models)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()> {
        self.collection(collection)
            .drop_index(name)
            .await
            .map_err(|e| match classify(e, collection) {
                StoreError::IndexNotFound(_) => StoreError::IndexNotFound(name.to_string()),
                other => other,
            })
    }

    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
        self.collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        self.collection(collection)
            .find_one(filter)
            .await
            .map_err(|e| classify(e, collection))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> StoreResult<Vec<Document>> {
        let options = FindOptions::builder().projection(projection).build();
        let mut cursor = self
            .collection(collection)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| classify(e, collection))?;

        let mut documents = Vec::new();
        while cursor.advance().await.map_err(|e| classify(e, collection))? {
            documents.push(
                cursor
                    .deserialize_current()
                    .map_err(|e| classify(e, collection))?,
            );
        }
        Ok(documents)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = self
            .collection(collection)
            .update_one(filter, update)
            .with_options(options)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        let result = self
            .collection(collection)
            .delete_many(filter)
            .await
            .map_err(|e| classify(e, collection))?;
        Ok(result.deleted_count)
    }
}
