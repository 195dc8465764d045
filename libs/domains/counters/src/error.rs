use database::DatabaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Counter '{0}' was not returned after upsert")]
    Missing(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CounterResult<T> = Result<T, CounterError>;

impl From<mongodb::error::Error> for CounterError {
    fn from(err: mongodb::error::Error) -> Self {
        CounterError::Database(err.to_string())
    }
}

impl From<DatabaseError> for CounterError {
    fn from(err: DatabaseError) -> Self {
        CounterError::Database(err.to_string())
    }
}
