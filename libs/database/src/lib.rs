//! MongoDB persistence layer: connection lifecycle, health, indexes and transactions
//!
//! # Features
//!
//! - `config` (default) - Configuration support with `core_config::FromEnv`
//!
//! # Examples
//!
//! ```ignore
//! use database::mongodb::{
//!     DatabaseConfigs, IndexSynchronizer, ManifestLoader, MongoDriver, MongoLifecycle,
//! };
//! use core_config::FromEnv;
//! use std::sync::Arc;
//!
//! let configs = DatabaseConfigs::from_env()?;
//! let synchronizer = IndexSynchronizer::new(Arc::new(ManifestLoader));
//!
//! let mut lifecycle = MongoLifecycle::new(Arc::new(MongoDriver::new()), configs, synchronizer);
//! lifecycle.on_init().await?;
//!
//! let verdict = lifecycle.on_health_check().await;
//! let mut session = lifecycle.begin_transaction().await?;
//! session.commit_transaction().await?;
//! ```

pub mod common;
pub mod mongodb;

// Re-exports for convenience
pub use common::{BoxError, DatabaseError, DatabaseResult};
