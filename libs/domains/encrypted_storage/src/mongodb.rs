//! MongoDB implementation of StorageRepository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database::mongodb::{CollectionIndexes, IndexDefinition};
use mongodb::{
    Collection, Database,
    bson::{self, Document, doc, oid::ObjectId},
};
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

use crate::error::{StorageError, StorageResult};
use crate::models::{EncryptedStorage, NewStorageRecord, to_bson_datetime};
use crate::repository::StorageRepository;

pub const COLLECTION_NAME: &str = "encryptedstorages";
pub const MODEL_NAME: &str = "EncryptedStorage";

/// Records are removed one day after `expiresAt`
pub const EXPIRES_AT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Index declarations for the encrypted storage collection
pub fn indexed_model(db: &Database) -> CollectionIndexes {
    CollectionIndexes::new(
        MODEL_NAME,
        db.collection::<Document>(COLLECTION_NAME),
        vec![IndexDefinition::new(doc! { "expiresAt": 1 }).expire_after(EXPIRES_AT_TTL)],
    )
}

pub struct MongoStorageRepository {
    collection: Collection<EncryptedStorage>,
}

impl MongoStorageRepository {
    pub fn new(db: Database) -> Self {
        Self {
            collection: db.collection::<EncryptedStorage>(COLLECTION_NAME),
        }
    }

    pub fn collection(&self) -> &Collection<EncryptedStorage> {
        &self.collection
    }

    fn build_data_update(data: String, source: Option<Value>) -> StorageResult<Document> {
        let mut set = doc! { "data": data, "updatedAt": bson::DateTime::now() };
        if let Some(source) = source {
            set.insert("source", bson::to_bson(&source)?);
        }

        Ok(doc! { "$set": set })
    }
}

#[async_trait]
impl StorageRepository for MongoStorageRepository {
    #[instrument(skip(self, record))]
    async fn insert(&self, record: NewStorageRecord) -> StorageResult<ObjectId> {
        let storage = EncryptedStorage::from(record);
        let result = self.collection.insert_one(&storage).await?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StorageError::Internal("Inserted id is not an ObjectId".to_string()))
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: ObjectId) -> StorageResult<Option<EncryptedStorage>> {
        let record = self.collection.find_one(doc! { "_id": id }).await?;
        Ok(record)
    }

    #[instrument(skip(self, data, source))]
    async fn update_data(
        &self,
        id: ObjectId,
        data: String,
        source: Option<Value>,
    ) -> StorageResult<bool> {
        let update = Self::build_data_update(data, source)?;
        let result = self.collection.update_one(doc! { "_id": id }, update).await?;
        Ok(result.matched_count > 0)
    }

    #[instrument(skip(self))]
    async fn set_expires_at(&self, id: ObjectId, expires_at: DateTime<Utc>) -> StorageResult<bool> {
        let update = doc! {
            "$set": {
                "expiresAt": to_bson_datetime(expires_at),
                "updatedAt": bson::DateTime::now(),
            }
        };
        let result = self.collection.update_one(doc! { "_id": id }, update).await?;
        Ok(result.matched_count > 0)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: ObjectId) -> StorageResult<bool> {
        let deleted = self
            .collection
            .find_one_and_delete(doc! { "_id": id })
            .await?;
        Ok(deleted.is_some())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_many(&self, ids: Vec<ObjectId>) -> StorageResult<u64> {
        let result = self
            .collection
            .delete_many(doc! { "_id": { "$in": ids } })
            .await?;
        Ok(result.deleted_count)
    }
}
