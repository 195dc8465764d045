//! MongoDB implementation of CounterRepository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database::mongodb::{CollectionIndexes, IndexDefinition};
use mongodb::{
    Collection, Database,
    bson::{self, Bson, Document, doc},
    options::ReturnDocument,
};
use tracing::instrument;

use crate::error::{CounterError, CounterResult};
use crate::models::Counter;
use crate::repository::CounterRepository;

pub const COLLECTION_NAME: &str = "counters";
pub const MODEL_NAME: &str = "Counter";

/// Index declarations for the counters collection, for index synchronization
pub fn indexed_model(db: &Database) -> CollectionIndexes {
    CollectionIndexes::new(
        MODEL_NAME,
        db.collection::<Document>(COLLECTION_NAME),
        vec![IndexDefinition::new(doc! { "code": 1, "date": -1 }).unique()],
    )
}

/// MongoDB implementation of the CounterRepository
pub struct MongoCounterRepository {
    collection: Collection<Counter>,
}

impl MongoCounterRepository {
    pub fn new(db: Database) -> Self {
        Self::with_collection(db, COLLECTION_NAME)
    }

    /// Create a new MongoCounterRepository with a custom collection name
    pub fn with_collection(db: Database, collection_name: &str) -> Self {
        let collection = db.collection::<Counter>(collection_name);
        Self { collection }
    }

    pub fn collection(&self) -> &Collection<Counter> {
        &self.collection
    }

    /// Global counters carry a null date so they never collide with daily ones
    fn build_filter(code: &str, date: Option<DateTime<Utc>>) -> Document {
        let date = match date {
            Some(date) => Bson::DateTime(bson::DateTime::from_millis(date.timestamp_millis())),
            None => Bson::Null,
        };

        doc! { "code": code, "date": date }
    }

    fn build_update(now: bson::DateTime) -> Document {
        doc! {
            "$inc": { "value": 1_i64 },
            "$set": { "updatedAt": now },
            "$setOnInsert": { "createdAt": now },
        }
    }
}

#[async_trait]
impl CounterRepository for MongoCounterRepository {
    #[instrument(skip(self))]
    async fn increment(&self, code: &str, date: Option<DateTime<Utc>>) -> CounterResult<i64> {
        let filter = Self::build_filter(code, date);
        let update = Self::build_update(bson::DateTime::now());

        let counter = self
            .collection
            .find_one_and_update(filter, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| CounterError::Missing(code.to_string()))?;

        Ok(counter.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use database::mongodb::IndexedModel;

    #[test]
    fn test_global_filter_has_null_date() {
        let filter = MongoCounterRepository::build_filter("invoice", None);

        assert_eq!(filter.get_str("code").unwrap(), "invoice");
        assert_eq!(filter.get("date"), Some(&Bson::Null));
    }

    #[test]
    fn test_daily_filter_has_date() {
        let day = Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap();
        let filter = MongoCounterRepository::build_filter("invoice", Some(day));

        assert_eq!(
            filter.get_datetime("date").unwrap().timestamp_millis(),
            day.timestamp_millis()
        );
    }

    #[test]
    fn test_update_increments_by_one() {
        let update = MongoCounterRepository::build_update(bson::DateTime::from_millis(0));

        assert_eq!(
            update.get_document("$inc").unwrap().get_i64("value").unwrap(),
            1
        );
        assert!(update.get_document("$setOnInsert").unwrap().contains_key("createdAt"));
    }

    #[tokio::test]
    async fn test_indexed_model_declares_unique_code_date() {
        let client = mongodb::Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap();
        let model = indexed_model(&client.database("test"));

        assert_eq!(model.name(), "Counter");
        assert!(!model.skip_sync_indexes());
        assert_eq!(model.indexes().len(), 1);
        assert!(model.indexes()[0].unique);
        assert_eq!(model.indexes()[0].index_name(), "code_1_date_-1");
    }
}
