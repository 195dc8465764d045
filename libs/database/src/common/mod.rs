//! Common utilities shared across the database modules

pub mod error;

pub use error::{BoxError, DatabaseError, DatabaseResult};
