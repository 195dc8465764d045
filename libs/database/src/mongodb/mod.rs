//! MongoDB connection lifecycle and utilities
//!
//! Builds connection strings from declarative config, establishes one
//! connection per logical database, reports health, synchronizes indexes and
//! starts transactions.

mod builder;
mod client;
mod config;
mod connector;
pub mod driver;
mod errors;
mod health;
pub mod indexes;
mod lifecycle;
pub mod migrate;
mod transaction;

pub use builder::{
    ConnectionOptions, Credentials, REDACTION_MASK, build_connection_options,
    build_connection_string, build_host_list,
};
pub use client::{MongoConnection, MongoDriver, MongoSession};
pub use config::{DatabaseConfig, DatabaseConfigs, IndexSyncOptions, LogicalDatabase, ReplicaSetNode};
pub use connector::{ConnectionEstablisher, ConnectionHandle, Establishment};
pub use driver::{Connection, Driver, ReadyState, TransactionSession};
pub use errors::{MongoErrorCode, dup_key_field, error_code, map_unique_error, unique_violation};
pub use health::{DbStatus, HealthDetails, HealthStatus, HealthVerdict, check_connection, check_health};
pub use indexes::{
    CollectionIndexes, IndexDefinition, IndexSynchronizer, IndexedModel, ManifestLoader,
    ModelLoader, ModelRegistry, ProcessTerminator, Terminator,
};
pub use lifecycle::LifecycleManager;
pub use migrate::{MigrateMongoConfig, MigrateUrlParts, build_migrate_url};
pub use transaction::begin_transaction;

/// Lifecycle manager over the `mongodb` crate
pub type MongoLifecycle = LifecycleManager<MongoDriver>;

// Re-export MongoDB types for convenience
pub use mongodb::{Client, Collection, Database};
