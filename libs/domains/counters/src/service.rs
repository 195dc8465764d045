//! Counter Service - next values for global and daily counters

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::instrument;

use crate::error::{CounterError, CounterResult};
use crate::repository::CounterRepository;

/// Start of the calendar day containing `now`, in UTC
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    now.timezone()
        .from_local_datetime(&now.date_naive().and_time(NaiveTime::MIN))
        .earliest()
        .map(|start| start.with_timezone(&Utc))
}

pub struct CounterService<R: CounterRepository> {
    repository: Arc<R>,
}

impl<R: CounterRepository> CounterService<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository: Arc::new(repository),
        }
    }

    /// Next value of the global counter for `code`, starting at 1
    #[instrument(skip(self))]
    pub async fn get_next_value(&self, code: &str) -> CounterResult<i64> {
        self.repository.increment(code, None).await
    }

    /// Next value of today's counter for `code`; each local day starts at 1
    #[instrument(skip(self))]
    pub async fn get_next_daily_value(&self, code: &str) -> CounterResult<i64> {
        let today = start_of_day(&Local::now())
            .ok_or_else(|| CounterError::Internal("Unable to resolve start of day".to_string()))?;

        self.repository.increment(code, Some(today)).await
    }
}

impl<R: CounterRepository> Clone for CounterService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockCounterRepository;
    use chrono::{FixedOffset, Timelike};
    use mockall::predicate::eq;

    #[test]
    fn test_start_of_day_uses_local_midnight() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();

        let start = start_of_day(&now).unwrap();

        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_get_next_value_is_undated() {
        let mut repository = MockCounterRepository::new();
        repository
            .expect_increment()
            .with(eq("invoice"), eq(None))
            .times(1)
            .returning(|_, _| Ok(7));

        let service = CounterService::new(repository);

        assert_eq!(service.get_next_value("invoice").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_get_next_daily_value_passes_day_start() {
        let mut repository = MockCounterRepository::new();
        repository
            .expect_increment()
            .withf(|code, date| {
                code == "invoice"
                    && date.is_some_and(|date| {
                        let local = date.with_timezone(&Local);
                        local.hour() == 0 && local.minute() == 0 && local.second() == 0
                    })
            })
            .times(1)
            .returning(|_, _| Ok(1));

        let service = CounterService::new(repository);

        assert_eq!(service.get_next_daily_value("invoice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repository_error_propagates() {
        let mut repository = MockCounterRepository::new();
        repository
            .expect_increment()
            .returning(|_, _| Err(CounterError::Database("timeout".to_string())));

        let service = CounterService::new(repository);
        let err = service.get_next_value("invoice").await.unwrap_err();

        assert!(matches!(err, CounterError::Database(_)));
    }
}
