use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored record in the `encryptedstorages` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedStorage {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// JWE of the base64 encoded JSON payload
    pub data: String,
    pub expires_at: bson::DateTime,
    /// Plaintext payload, kept only on stage for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<bson::DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<bson::DateTime>,
}

impl EncryptedStorage {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.expires_at.timestamp_millis()).unwrap_or_default()
    }
}

/// Input for a new record
#[derive(Debug, Clone, PartialEq)]
pub struct NewStorageRecord {
    pub data: String,
    pub expires_at: DateTime<Utc>,
    pub source: Option<Value>,
}

pub(crate) fn to_bson_datetime(value: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(value.timestamp_millis())
}

impl From<NewStorageRecord> for EncryptedStorage {
    fn from(record: NewStorageRecord) -> Self {
        let now = bson::DateTime::now();
        Self {
            id: None,
            data: record.data,
            expires_at: to_bson_datetime(record.expires_at),
            source: record.source,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}
