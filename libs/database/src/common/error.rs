use crate::mongodb::LogicalDatabase;

/// Boxed cause carried by wrapped errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified database error type
///
/// Wrapping variants keep the original cause reachable through
/// [`std::error::Error::source`] so it can be logged.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Invalid connection configuration, detected before any I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Establishing the connection for a logical database failed
    #[error("Failed to connect to database '{database}'")]
    Connection {
        database: LogicalDatabase,
        #[source]
        source: BoxError,
    },

    /// No handle is held for the requested logical database
    #[error("Connection is undefined for database '{0}'")]
    ConnectionUndefined(LogicalDatabase),

    /// Acquiring a session or starting a transaction failed
    #[error("Unable to begin transaction on database '{database}'")]
    Transaction {
        database: LogicalDatabase,
        #[source]
        source: BoxError,
    },

    /// A single model failed while synchronizing indexes
    #[error("Failed to sync indexes for model '{model}'")]
    IndexSync {
        model: String,
        #[source]
        source: BoxError,
    },

    /// A discovered model file has no registered model behind it
    #[error("No model registered for '{0}'")]
    ModelNotRegistered(String),

    /// A model manifest could not be parsed
    #[error("Invalid model definition in '{path}': {details}")]
    ModelDefinition { path: String, details: String },

    /// Unique index violation mapped from a duplicate key error
    #[error("{model} with {field} '{value}' already exists")]
    UniqueViolation {
        model: String,
        field: String,
        value: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors reported by the MongoDB driver
    #[error("MongoDB error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Generic(String),
}

impl DatabaseError {
    /// Whether this error, or the cause it wraps, is a configuration error
    pub fn is_configuration(&self) -> bool {
        match self {
            DatabaseError::Configuration(_) => true,
            DatabaseError::Connection { source, .. } => source
                .downcast_ref::<DatabaseError>()
                .is_some_and(DatabaseError::is_configuration),
            _ => false,
        }
    }
}

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;
