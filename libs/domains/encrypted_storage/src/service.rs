//! Encrypted Storage Service

use base64::{Engine, prelude::BASE64_STANDARD};
use chrono::{DateTime, TimeDelta, Utc};
use core_config::Environment;
use mongodb::bson::oid::ObjectId;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::auth::AuthService;
use crate::error::{StorageError, StorageResult};
use crate::models::{EncryptedStorage, NewStorageRecord};
use crate::repository::StorageRepository;

const MISSING_DATA: &str = "Missing data";

/// JSON, then base64
pub fn encode_object<T: Serialize>(data: &T) -> StorageResult<String> {
    Ok(BASE64_STANDARD.encode(serde_json::to_vec(data)?))
}

pub fn decode_object<T: DeserializeOwned>(encoded: &str) -> StorageResult<T> {
    let bytes = BASE64_STANDARD.decode(encoded)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn expires_in(ttl: Duration) -> StorageResult<DateTime<Utc>> {
    let ttl = TimeDelta::from_std(ttl).map_err(|e| StorageError::Internal(e.to_string()))?;
    Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| StorageError::Internal("Expiration is out of range".to_string()))
}

pub struct EncryptedStorageService<R: StorageRepository, A: AuthService> {
    repository: Arc<R>,
    auth: Arc<A>,
    keep_source: bool,
}

impl<R: StorageRepository, A: AuthService> EncryptedStorageService<R, A> {
    /// Plaintext sources are kept only on stage
    pub fn new(repository: R, auth: A, environment: &Environment) -> Self {
        Self {
            repository: Arc::new(repository),
            auth: Arc::new(auth),
            keep_source: environment.is_stage(),
        }
    }

    async fn encrypt<T: Serialize + Sync>(&self, data: &T) -> StorageResult<String> {
        self.auth.encrypt_jwe(&encode_object(data)?).await
    }

    fn source<T: Serialize>(&self, data: &T) -> StorageResult<Option<serde_json::Value>> {
        if !self.keep_source {
            return Ok(None);
        }
        Ok(Some(serde_json::to_value(data)?))
    }

    async fn find(&self, id: ObjectId) -> StorageResult<EncryptedStorage> {
        self.repository.find_by_id(id).await?.ok_or_else(|| {
            error!(%id, "Encrypted data is not found in storage");
            StorageError::NotFound(MISSING_DATA.to_string())
        })
    }

    /// Encrypt and store `data`, expiring after `ttl`
    #[instrument(skip(self, data))]
    pub async fn save<T: Serialize + Sync>(&self, data: &T, ttl: Duration) -> StorageResult<ObjectId> {
        let record = NewStorageRecord {
            data: self.encrypt(data).await?,
            expires_at: expires_in(ttl)?,
            source: self.source(data)?,
        };

        self.repository.insert(record).await
    }

    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, id: ObjectId) -> StorageResult<T> {
        let record = self.find(id).await?;
        let decrypted = self.auth.decrypt_jwe(&record.data).await?;

        decode_object(&decrypted)
    }

    /// Like [`get`](Self::get), but any failure is logged and yields `None`
    #[instrument(skip(self))]
    pub async fn get_safe<T: DeserializeOwned>(&self, id: ObjectId) -> Option<T> {
        match self.get(id).await {
            Ok(data) => Some(data),
            Err(err) => {
                info!(%id, error = %err, "Unable to retrieve data from encrypted storage");
                None
            }
        }
    }

    #[instrument(skip(self, data))]
    pub async fn update<T: Serialize + Sync>(&self, id: ObjectId, data: &T) -> StorageResult<()> {
        let encrypted = self.encrypt(data).await?;
        let source = self.source(data)?;

        if !self.repository.update_data(id, encrypted, source).await? {
            error!(%id, "Encrypted data is not found in storage");
            return Err(StorageError::NotFound(MISSING_DATA.to_string()));
        }

        Ok(())
    }

    /// Missing records are not an error
    #[instrument(skip(self))]
    pub async fn remove(&self, id: ObjectId) -> StorageResult<()> {
        if self.repository.delete(id).await? {
            info!(%id, "Encrypted data removed from storage");
        } else {
            info!(%id, "Encrypted data is not removed from storage: data not found");
        }

        Ok(())
    }

    #[instrument(skip(self, ids))]
    pub async fn delete_many(&self, ids: Vec<ObjectId>) -> StorageResult<u64> {
        let deleted = self.repository.delete_many(ids).await?;
        info!("Encrypted data removed from storage: {}", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    pub async fn set_expiration(&self, id: ObjectId, ttl: Duration) -> StorageResult<()> {
        let expires_at = expires_in(ttl)?;

        if !self.repository.set_expires_at(id, expires_at).await? {
            error!(%id, "Encrypted data is not found in storage");
            return Err(StorageError::NotFound(MISSING_DATA.to_string()));
        }

        info!(%id, "Updated encrypted data expiration date");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_expiration(&self, id: ObjectId) -> StorageResult<DateTime<Utc>> {
        Ok(self.find(id).await?.expires_at())
    }
}

impl<R: StorageRepository, A: AuthService> Clone for EncryptedStorageService<R, A> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            auth: Arc::clone(&self.auth),
            keep_source: self.keep_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockAuthService;
    use crate::repository::MockStorageRepository;
    use mockall::predicate::eq;
    use mongodb::bson;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        user: String,
        attempts: u32,
    }

    fn payload() -> Payload {
        Payload {
            user: "alice".to_string(),
            attempts: 2,
        }
    }

    fn passthrough_auth() -> MockAuthService {
        let mut auth = MockAuthService::new();
        auth.expect_encrypt_jwe()
            .returning(|plaintext| Ok(format!("jwe:{plaintext}")));
        auth.expect_decrypt_jwe()
            .returning(|ciphertext| Ok(ciphertext.trim_start_matches("jwe:").to_string()));
        auth
    }

    fn stored(data: String) -> EncryptedStorage {
        EncryptedStorage {
            id: Some(ObjectId::new()),
            data,
            expires_at: bson::DateTime::from_millis(1_700_000_000_000),
            source: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_encoding_is_base64_json() {
        let encoded = encode_object(&json!({ "a": 1 })).unwrap();

        assert_eq!(encoded, BASE64_STANDARD.encode(br#"{"a":1}"#));
        assert_eq!(decode_object::<serde_json::Value>(&encoded).unwrap(), json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn test_save_keeps_source_on_stage() {
        let id = ObjectId::new();
        let expected_data = format!("jwe:{}", encode_object(&payload()).unwrap());

        let mut repository = MockStorageRepository::new();
        repository
            .expect_insert()
            .withf(move |record| {
                record.data == expected_data
                    && record.source == Some(json!({ "user": "alice", "attempts": 2 }))
                    && record.expires_at > Utc::now()
            })
            .times(1)
            .returning(move |_| Ok(id));

        let service = EncryptedStorageService::new(repository, passthrough_auth(), &Environment::Stage);

        assert_eq!(service.save(&payload(), Duration::from_secs(60)).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_save_drops_source_outside_stage() {
        let mut repository = MockStorageRepository::new();
        repository
            .expect_insert()
            .withf(|record| record.source.is_none())
            .times(1)
            .returning(|_| Ok(ObjectId::new()));

        let service =
            EncryptedStorageService::new(repository, passthrough_auth(), &Environment::Production);

        service.save(&payload(), Duration::from_secs(60)).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_decrypts_and_decodes() {
        let id = ObjectId::new();
        let data = format!("jwe:{}", encode_object(&payload()).unwrap());

        let mut repository = MockStorageRepository::new();
        repository
            .expect_find_by_id()
            .with(eq(id))
            .times(1)
            .returning(move |_| Ok(Some(stored(data.clone()))));

        let service = EncryptedStorageService::new(repository, passthrough_auth(), &Environment::Local);

        let restored: Payload = service.get(id).await.unwrap();
        assert_eq!(restored, payload());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let mut repository = MockStorageRepository::new();
        repository.expect_find_by_id().returning(|_| Ok(None));

        let service =
            EncryptedStorageService::new(repository, MockAuthService::new(), &Environment::Local);

        let err = service.get::<Payload>(ObjectId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(message) if message == "Missing data"));
    }

    #[tokio::test]
    async fn test_get_safe_swallows_errors() {
        let mut repository = MockStorageRepository::new();
        repository.expect_find_by_id().returning(|_| Ok(None));

        let service =
            EncryptedStorageService::new(repository, MockAuthService::new(), &Environment::Local);

        assert_eq!(service.get_safe::<Payload>(ObjectId::new()).await, None);
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let mut repository = MockStorageRepository::new();
        repository
            .expect_update_data()
            .withf(|_, data, source| data.starts_with("jwe:") && source.is_some())
            .times(1)
            .returning(|_, _, _| Ok(false));

        let service = EncryptedStorageService::new(repository, passthrough_auth(), &Environment::Stage);

        let err = service
            .update(ObjectId::new(), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_missing_record_is_ok() {
        let mut repository = MockStorageRepository::new();
        repository.expect_delete().times(1).returning(|_| Ok(false));

        let service =
            EncryptedStorageService::new(repository, MockAuthService::new(), &Environment::Local);

        service.remove(ObjectId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_many_returns_count() {
        let ids = vec![ObjectId::new(), ObjectId::new()];

        let mut repository = MockStorageRepository::new();
        repository
            .expect_delete_many()
            .with(eq(ids.clone()))
            .times(1)
            .returning(|ids| Ok(ids.len() as u64));

        let service =
            EncryptedStorageService::new(repository, MockAuthService::new(), &Environment::Local);

        assert_eq!(service.delete_many(ids).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_set_and_get_expiration() {
        let id = ObjectId::new();
        let before = Utc::now();

        let mut repository = MockStorageRepository::new();
        repository
            .expect_set_expires_at()
            .withf(move |_, expires_at| *expires_at >= before + TimeDelta::seconds(10))
            .times(1)
            .returning(|_, _| Ok(true));
        repository
            .expect_find_by_id()
            .returning(|_| Ok(Some(stored("jwe:".to_string()))));

        let service =
            EncryptedStorageService::new(repository, MockAuthService::new(), &Environment::Local);

        service.set_expiration(id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(
            service.get_expiration(id).await.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }
}
