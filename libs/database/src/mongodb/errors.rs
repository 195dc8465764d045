//! Server error codes and duplicate-key mapping

use mongodb::error::{Error, ErrorKind, WriteFailure};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::common::DatabaseError;

/// Numeric error codes returned by the server
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(i32)]
pub enum MongoErrorCode {
    InternalError = 1,
    BadValue = 2,
    NoSuchKey = 4,
    GraphContainsCycle = 5,
    HostUnreachable = 6,
    HostNotFound = 7,
    UnknownError = 8,
    FailedToParse = 9,
    CannotMutateObject = 10,
    UserNotFound = 11,
    UnsupportedFormat = 12,
    Unauthorized = 13,
    TypeMismatch = 14,
    Overflow = 15,
    InvalidLength = 16,
    ProtocolError = 17,
    AuthenticationFailed = 18,
    CannotReuseObject = 19,
    IllegalOperation = 20,
    EmptyArrayOperation = 21,
    InvalidBson = 22,
    AlreadyInitialized = 23,
    LockTimeout = 24,
    RemoteValidationError = 25,
    CollectionDoesNotExist = 26,
    IndexNotFound = 27,
    PathNotViable = 28,
    NonExistentPath = 29,
    InvalidPath = 30,
    MaxTimeMsExpired = 50,
    QueryCommandNotFound = 59,
    WriteConcernError = 64,
    DuplicateKey = 11000,
    QueryNotTailable = 13051,
}

impl MongoErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Server code carried by a driver error, if any
pub fn error_code(err: &Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
        _ => None,
    }
}

/// First of `fields` whose unique index is named in a duplicate key message
pub fn dup_key_field<'a>(message: &str, fields: &[&'a str]) -> Option<&'a str> {
    fields.iter().copied().find(|field| {
        Regex::new(&format!("{}_[0-9] dup key", regex::escape(field)))
            .map(|pattern| pattern.is_match(message))
            .unwrap_or(false)
    })
}

/// Map a duplicate key `message` to a unique violation on one of `unique_fields`
///
/// Falls back to [`DatabaseError::Generic`] when no field matches.
pub fn unique_violation(
    message: &str,
    params: &Value,
    unique_fields: &[&str],
    model_name: &str,
) -> DatabaseError {
    match dup_key_field(message, unique_fields) {
        Some(field) => {
            let value = match params.get(field) {
                Some(Value::String(value)) => value.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };

            DatabaseError::UniqueViolation {
                model: model_name.to_string(),
                field: field.to_string(),
                value,
            }
        }
        None => DatabaseError::Generic(format!(
            "Unexpected error while entity processing. {message}"
        )),
    }
}

/// Translate a driver error raised while writing `params` to a model
pub fn map_unique_error(
    err: Error,
    params: &Value,
    unique_fields: &[&str],
    model_name: &str,
) -> DatabaseError {
    if error_code(&err) == Some(MongoErrorCode::DuplicateKey.code()) {
        warn!(model = %model_name, error = %err, "Duplicate key error");
        return unique_violation(&err.to_string(), params, unique_fields, model_name);
    }

    DatabaseError::Driver(err)
}
