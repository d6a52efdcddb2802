//! MongoDB client and collection wrapper
//!
//! Collections apply their schema indexes on open, so a fresh database gets
//! the uniqueness constraints the ledger and the idempotent insert rely on.

use bson::{doc, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::info;

use crate::db::schemas::Metadata;
use crate::types::ReclaimError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection
    ///
    /// `timeout` bounds server selection and connect so an unreachable
    /// server fails fast instead of wedging the caller.
    pub async fn new(uri: &str, db_name: &str, timeout: Duration) -> Result<Self, ReclaimError> {
        info!("Connecting to MongoDB at {}", redact_uri(uri));

        let millis = timeout.as_millis();
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS={}&connectTimeoutMS={}", uri, millis, millis)
        } else {
            format!("{}?serverSelectionTimeoutMS={}&connectTimeoutMS={}", uri, millis, millis)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ReclaimError::Storage(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ReclaimError::Storage(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, ReclaimError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the raw MongoDB client (sessions and transactions)
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Strip credentials before logging a connection string
fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &uri[..scheme_end], &uri[at..])
        }
        _ => uri.to_string(),
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Open a collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, ReclaimError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), ReclaimError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| ReclaimError::Storage(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<(), mongodb::error::Error> {
        let metadata = item.mut_metadata();
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        self.inner.insert_one(item).await.map(|_| ())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, ReclaimError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| ReclaimError::Storage(format!("Find failed: {}", e)))
    }

    /// Find documents by filter, sorted and limited
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Document,
        limit: i64,
    ) -> Result<Vec<T>, ReclaimError> {
        let cursor = self
            .inner
            .find(filter)
            .sort(sort)
            .limit(limit)
            .await
            .map_err(|e| ReclaimError::Storage(format!("Find failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| ReclaimError::Storage(format!("Cursor failed: {}", e)))
    }

    /// Get the underlying collection for session-scoped operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

/// Whether a write failed on a unique index
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == 11000,
        ErrorKind::Command(e) => e.code == 11000,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_uri_hides_credentials() {
        assert_eq!(
            redact_uri("mongodb://user:secret@db:27017/reclaim"),
            "mongodb://***@db:27017/reclaim"
        );
        assert_eq!(redact_uri("mongodb://localhost:27017"), "mongodb://localhost:27017");
    }
}
