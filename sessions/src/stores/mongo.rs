//! MongoDB document store.
//!
//! Each session is one document in a single collection:
//!
//! ```text
//! { _id: ObjectId, data: "<codec output>", modified: ISODate }
//! ```
//!
//! The session id maps one to one onto the `ObjectId`, and the TTL index
//! is created on `modified`.
//!
//! # Example
//!
//! ```no_run
//! use docstore_sessions::stores::MongoDocumentStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let documents = MongoDocumentStore::connect("mongodb://127.0.0.1:27017", "app", "sessions").await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{self, doc};
use mongodb::error::ErrorKind;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::providers::DocumentStore;
use crate::state::{IndexSpec, PersistedDocument, SessionId};

/// Wire form of a session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoSessionDoc {
    #[serde(rename = "_id")]
    id: ObjectId,
    data: String,
    modified: bson::DateTime,
}

impl From<&PersistedDocument> for MongoSessionDoc {
    fn from(document: &PersistedDocument) -> Self {
        Self {
            id: ObjectId::from_bytes(document.id.bytes()),
            data: document.data.clone(),
            modified: bson::DateTime::from_millis(document.modified.timestamp_millis()),
        }
    }
}

impl TryFrom<MongoSessionDoc> for PersistedDocument {
    type Error = StoreError;

    fn try_from(document: MongoSessionDoc) -> Result<Self, Self::Error> {
        let millis = document.modified.timestamp_millis();
        let modified = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            StoreError::Serialization(format!("modified out of range: {millis}"))
        })?;

        Ok(Self {
            id: SessionId::from_bytes(document.id.bytes()),
            data: document.data,
            modified,
        })
    }
}

/// MongoDB-backed [`DocumentStore`].
///
/// Cloning shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct MongoDocumentStore {
    collection: Collection<MongoSessionDoc>,
}

impl MongoDocumentStore {
    /// Wrap an existing collection handle.
    #[must_use]
    pub fn new<T: Send + Sync>(collection: &Collection<T>) -> Self {
        Self {
            collection: collection.clone_with_type(),
        }
    }

    /// Connect to `uri` and use `database.collection`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URI is invalid or the
    /// client cannot be created.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to create MongoDB client: {e}")))?;

        tracing::info!(database, collection, "Using MongoDB session collection");

        Ok(Self {
            collection: client.database(database).collection(collection),
        })
    }

    /// Name of the backing collection.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }
}

/// Classify a driver error.
fn store_error(error: &mongodb::error::Error) -> StoreError {
    match *error.kind {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::Unavailable(error.to_string())
        }
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            StoreError::Serialization(error.to_string())
        }
        _ => StoreError::Backend(error.to_string()),
    }
}

// `background` is ignored by servers from 4.2 on and still honoured by older ones
#[allow(deprecated)]
fn index_spec(model: IndexModel) -> Option<IndexSpec> {
    let options = model.options?;
    let name = options.name?;
    Some(IndexSpec {
        name,
        field: model.keys.keys().next().cloned(),
        expire_after: options.expire_after,
        sparse: options.sparse.unwrap_or(false),
        background: options.background.unwrap_or(false),
    })
}

#[allow(deprecated)]
fn index_model(spec: &IndexSpec) -> Result<IndexModel, StoreError> {
    let field = spec
        .field
        .as_deref()
        .ok_or_else(|| StoreError::Backend(format!("index {} has no field", spec.name)))?;

    let mut options = IndexOptions::default();
    options.name = Some(spec.name.clone());
    options.expire_after = spec.expire_after;
    options.sparse = Some(spec.sparse);
    options.background = Some(spec.background);

    let mut keys = bson::Document::new();
    keys.insert(field, 1_i32);
    Ok(IndexModel::builder().keys(keys).options(options).build())
}

impl DocumentStore for MongoDocumentStore {
    async fn find_one(&self, id: &SessionId) -> Result<Option<PersistedDocument>, StoreError> {
        let found = self
            .collection
            .find_one(doc! { "_id": ObjectId::from_bytes(id.bytes()) })
            .await
            .map_err(|e| store_error(&e))?;

        found.map(PersistedDocument::try_from).transpose()
    }

    async fn upsert(&self, document: &PersistedDocument) -> Result<(), StoreError> {
        let replacement = MongoSessionDoc::from(document);
        self.collection
            .replace_one(doc! { "_id": replacement.id }, &replacement)
            .upsert(true)
            .await
            .map_err(|e| store_error(&e))?;
        Ok(())
    }

    async fn delete_one(&self, id: &SessionId) -> Result<bool, StoreError> {
        let result = self
            .collection
            .delete_one(doc! { "_id": ObjectId::from_bytes(id.bytes()) })
            .await
            .map_err(|e| store_error(&e))?;
        Ok(result.deleted_count > 0)
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        let models: Vec<IndexModel> = self
            .collection
            .list_indexes()
            .await
            .map_err(|e| store_error(&e))?
            .try_collect()
            .await
            .map_err(|e| store_error(&e))?;

        Ok(models.into_iter().filter_map(index_spec).collect())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        self.collection
            .create_index(index_model(spec)?)
            .await
            .map_err(|e| store_error(&e))?;
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<(), StoreError> {
        self.collection
            .drop_index(name)
            .await
            .map_err(|e| store_error(&e))
    }
}
