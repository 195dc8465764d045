use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use super::{
    ConnectionOptions, DatabaseConfig, LogicalDatabase, build_connection_options,
    build_connection_string,
    driver::{Connection, Driver},
};
use crate::common::{BoxError, DatabaseError, DatabaseResult};

/// A live connection held for the lifetime of the process
pub struct ConnectionHandle<C> {
    pub connection: C,
    /// Rendered connection string; credentials are never part of it
    pub connection_string: String,
    /// Options passed to the driver, including credentials
    pub connection_options: ConnectionOptions,
}

impl<C> ConnectionHandle<C> {
    /// Options safe to log
    pub fn redacted_options(&self) -> ConnectionOptions {
        self.connection_options.redacted()
    }
}

/// Result of establishing one logical database
pub enum Establishment<C> {
    Connected(ConnectionHandle<C>),
    Disabled,
}

impl<C> Establishment<C> {
    pub fn into_handle(self) -> Option<ConnectionHandle<C>> {
        match self {
            Establishment::Connected(handle) => Some(handle),
            Establishment::Disabled => None,
        }
    }
}

/// Turns a [`DatabaseConfig`] into a live [`ConnectionHandle`]
pub struct ConnectionEstablisher<D> {
    driver: Arc<D>,
    trace_commands: bool,
}

impl<D: Driver> ConnectionEstablisher<D> {
    /// `trace_commands` enables the driver's command tracing before each connect
    pub fn new(driver: Arc<D>, trace_commands: bool) -> Self {
        Self {
            driver,
            trace_commands,
        }
    }

    /// Establish the connection for `id`
    ///
    /// A disabled config yields [`Establishment::Disabled`] without touching the
    /// driver. Every failure, including configuration errors, is wrapped in
    /// [`DatabaseError::Connection`] carrying `id` and the original cause.
    #[instrument(skip(self, config), fields(database = %id))]
    pub async fn establish(
        &self,
        id: LogicalDatabase,
        config: &DatabaseConfig,
    ) -> DatabaseResult<Establishment<D::Connection>> {
        if !config.is_enabled() {
            info!("Database is disabled: {}", id);
            return Ok(Establishment::Disabled);
        }

        match self.connect(id, config).await {
            Ok(handle) => Ok(Establishment::Connected(handle)),
            Err(err) => {
                error!(database = %id, error = %err, "Failed to connect to Database");
                Err(DatabaseError::Connection {
                    database: id,
                    source: err,
                })
            }
        }
    }

    async fn connect(
        &self,
        id: LogicalDatabase,
        config: &DatabaseConfig,
    ) -> Result<ConnectionHandle<D::Connection>, BoxError> {
        let connection_options = build_connection_options(config);
        let connection_string = build_connection_string(config)?;

        let log_options = serde_json::to_string(&connection_options.redacted())?;
        info!(
            database = %id,
            options = %log_options,
            "Connecting to DB {}", connection_string
        );

        if self.trace_commands {
            debug!("Driver command tracing enabled");
            self.driver.set_debug(true);
        }

        let connection = self
            .driver
            .connect(
                &connection_string,
                &connection_options,
                config.uses_shared_handle(id),
            )
            .await?;

        connection.on_error(Arc::new(move |err: &(dyn std::error::Error + Send + Sync)| {
            error!(database = %id, error = %err, "Mongo connection error");
        }));

        info!(database = %id, "Connected to DB");

        Ok(ConnectionHandle {
            connection,
            connection_string,
            connection_options,
        })
    }
}
