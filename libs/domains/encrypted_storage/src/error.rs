use database::DatabaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    NotFound(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<DatabaseError> for StorageError {
    fn from(err: DatabaseError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

impl From<base64::DecodeError> for StorageError {
    fn from(err: base64::DecodeError) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for StorageError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}
