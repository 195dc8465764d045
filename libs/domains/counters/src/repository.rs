use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CounterResult;

/// Repository trait for counter persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterRepository: Send + Sync {
    /// Atomically increment the counter for `code` (and `date`, if given),
    /// creating it on first use, and return the new value
    async fn increment(&self, code: &str, date: Option<DateTime<Utc>>) -> CounterResult<i64>;
}
