//! Encrypted Storage Domain
//!
//! Short-lived encrypted blobs. Payloads are serialized to JSON, base64
//! encoded and encrypted with an external [`AuthService`] before they reach
//! MongoDB. Records expire through a TTL index on `expiresAt`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use core_config::Environment;
//! use domain_encrypted_storage::{EncryptedStorageService, MongoStorageRepository};
//! use std::time::Duration;
//!
//! let repository = MongoStorageRepository::new(db);
//! let service = EncryptedStorageService::new(repository, auth, &Environment::from_env());
//!
//! let id = service.save(&payload, Duration::from_secs(600)).await?;
//! let restored: Payload = service.get(id).await?;
//! ```

pub mod auth;
pub mod error;
pub mod models;
pub mod mongodb;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use auth::AuthService;
pub use error::{StorageError, StorageResult};
pub use models::{EncryptedStorage, NewStorageRecord};
pub use self::mongodb::{COLLECTION_NAME, MongoStorageRepository, indexed_model};
pub use repository::StorageRepository;
pub use service::EncryptedStorageService;
