use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde_json::Value;

use crate::error::StorageResult;
use crate::models::{EncryptedStorage, NewStorageRecord};

/// Repository trait for encrypted storage persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn insert(&self, record: NewStorageRecord) -> StorageResult<ObjectId>;

    async fn find_by_id(&self, id: ObjectId) -> StorageResult<Option<EncryptedStorage>>;

    /// Replace the payload; returns whether the record exists
    async fn update_data(
        &self,
        id: ObjectId,
        data: String,
        source: Option<Value>,
    ) -> StorageResult<bool>;

    /// Returns whether the record exists
    async fn set_expires_at(&self, id: ObjectId, expires_at: DateTime<Utc>) -> StorageResult<bool>;

    /// Returns whether a record was deleted
    async fn delete(&self, id: ObjectId) -> StorageResult<bool>;

    /// Returns the number of deleted records
    async fn delete_many(&self, ids: Vec<ObjectId>) -> StorageResult<u64>;
}
