//! MongoDB client and collection wrapper

use bson::{doc, DateTime, Document};
use futures_util::StreamExt;
use mongodb::{
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::WaitlistError;

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
    /// Connect and verify the server answers a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, WaitlistError> {
        info!("Connecting to MongoDB");

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| WaitlistError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        let mongo = Self {
            client,
            db_name: db_name.to_string(),
        };
        mongo.ping().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(mongo)
    }

    /// Round-trip a ping command
    pub async fn ping(&self) -> Result<(), WaitlistError> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| WaitlistError::Database(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }

    /// Get a typed collection with its indexes applied
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, WaitlistError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing.
///
/// Reads skip documents whose `metadata.is_deleted` flag was set by the
/// suppression tooling.
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
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, WaitlistError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), WaitlistError> {
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
            .map_err(|e| WaitlistError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    fn live(filter: Document) -> Document {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });
        full_filter
    }

    fn suppressed(filter: Document) -> Document {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", true);
        full_filter
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<(), WaitlistError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        self.inner
            .insert_one(item)
            .await
            .map_err(map_write_error)?;

        Ok(())
    }

    /// Find one live document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, WaitlistError> {
        self.inner
            .find_one(Self::live(filter))
            .await
            .map_err(|e| WaitlistError::Database(format!("Find failed: {}", e)))
    }

    /// Whether a soft-deleted document matches the filter
    pub async fn is_suppressed(&self, filter: Document) -> Result<bool, WaitlistError> {
        let count = self
            .inner
            .count_documents(Self::suppressed(filter))
            .await
            .map_err(|e| WaitlistError::Database(format!("Count failed: {}", e)))?;
        Ok(count > 0)
    }

    /// Find live documents by filter, with optional sort and limit
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
        limit: Option<i64>,
    ) -> Result<Vec<T>, WaitlistError> {
        let options = FindOptions::builder().sort(sort).limit(limit).build();

        let cursor = self
            .inner
            .find(Self::live(filter))
            .with_options(options)
            .await
            .map_err(|e| WaitlistError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Count live documents matching the filter
    pub async fn count(&self, filter: Document) -> Result<u64, WaitlistError> {
        self.inner
            .count_documents(Self::live(filter))
            .await
            .map_err(|e| WaitlistError::Database(format!("Count failed: {}", e)))
    }

    /// Run an aggregation pipeline over live documents
    pub async fn aggregate(&self, mut pipeline: Vec<Document>) -> Result<Vec<Document>, WaitlistError> {
        pipeline.insert(0, doc! { "$match": Self::live(Document::new()) });

        let cursor = self
            .inner
            .aggregate(pipeline)
            .await
            .map_err(|e| WaitlistError::Database(format!("Aggregate failed: {}", e)))?;

        let results: Vec<Document> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading aggregate row: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Update one live document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, WaitlistError> {
        self.inner
            .update_one(Self::live(filter), update.into())
            .await
            .map_err(map_write_error)
    }

    /// Atomically update one live document and return it as it was after the update
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<Option<T>, WaitlistError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.inner
            .find_one_and_update(Self::live(filter), update.into())
            .with_options(options)
            .await
            .map_err(map_write_error)
    }
}

/// Duplicate-key errors get their own message so callers can detect races
fn map_write_error(e: mongodb::error::Error) -> WaitlistError {
    let error_str = e.to_string();
    if error_str.contains("duplicate key") || error_str.contains("E11000") {
        WaitlistError::Database(format!("duplicate key: {}", error_str))
    } else {
        WaitlistError::Database(format!("Write failed: {}", error_str))
    }
}

/// Read the `count` of a `$group` row; `$sum` yields Int32 or Int64
/// depending on magnitude
pub fn group_count(row: &Document) -> u64 {
    match row.get("count") {
        Some(bson::Bson::Int32(n)) => (*n).max(0) as u64,
        Some(bson::Bson::Int64(n)) => (*n).max(0) as u64,
        _ => 0,
    }
}

/// Whether an error is a unique-index violation
pub fn is_duplicate_key(err: &WaitlistError) -> bool {
    matches!(err, WaitlistError::Database(msg) if msg.starts_with("duplicate key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_detection() {
        assert!(is_duplicate_key(&WaitlistError::Database(
            "duplicate key: E11000".into()
        )));
        assert!(!is_duplicate_key(&WaitlistError::Database("Write failed: timeout".into())));
        assert!(!is_duplicate_key(&WaitlistError::Internal("duplicate key".into())));
    }

    #[test]
    fn test_group_count_handles_int_widths() {
        assert_eq!(group_count(&doc! { "count": 3_i32 }), 3);
        assert_eq!(group_count(&doc! { "count": 7_i64 }), 7);
        assert_eq!(group_count(&doc! { "other": 1 }), 0);
    }

    #[test]
    fn test_live_and_suppressed_filters_are_disjoint() {
        use crate::db::schemas::WaitlistDoc;

        let live = MongoCollection::<WaitlistDoc>::live(doc! { "_id": "e1" });
        assert_eq!(live.get_str("_id").unwrap(), "e1");
        assert_eq!(live.get_document("metadata.is_deleted").unwrap(), &doc! { "$ne": true });

        let suppressed = MongoCollection::<WaitlistDoc>::suppressed(doc! { "_id": "e1" });
        assert_eq!(suppressed.get_str("_id").unwrap(), "e1");
        assert!(suppressed.get_bool("metadata.is_deleted").unwrap());
    }

    // Collection behaviour needs a running MongoDB and is covered by the
    // store-level tests against the in-memory implementation.
}
