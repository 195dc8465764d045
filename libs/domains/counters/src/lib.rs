//! Counters Domain
//!
//! Named monotonic counters backed by MongoDB. A counter is either global for
//! its code or scoped to one calendar day.
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_counters::{CounterService, MongoCounterRepository};
//! use mongodb::Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::with_uri_str("mongodb://localhost:27017").await?;
//! let repository = MongoCounterRepository::new(client.database("mydb"));
//! let service = CounterService::new(repository);
//!
//! let next = service.get_next_value("invoice").await?;
//! let today = service.get_next_daily_value("invoice").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod models;
pub mod mongodb;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use error::{CounterError, CounterResult};
pub use models::Counter;
pub use self::mongodb::{COLLECTION_NAME, MongoCounterRepository, indexed_model};
pub use repository::CounterRepository;
pub use service::CounterService;
