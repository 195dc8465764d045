use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{
    ConnectionEstablisher, ConnectionHandle, DatabaseConfigs, HealthVerdict, IndexSynchronizer,
    LogicalDatabase, begin_transaction, check_health,
    driver::{Connection, Driver},
};
use crate::common::{DatabaseError, DatabaseResult};

type Session<D> = <<D as Driver>::Connection as Connection>::Session;

/// Composition root for every configured logical database
///
/// Handles are written only by [`on_init`](Self::on_init) and
/// [`shutdown`](Self::shutdown); everything else reads them.
pub struct LifecycleManager<D: Driver> {
    driver: Arc<D>,
    trace_commands: bool,
    configs: DatabaseConfigs,
    synchronizer: IndexSynchronizer<D::Connection>,
    models_dir: Option<String>,
    handles: BTreeMap<LogicalDatabase, ConnectionHandle<D::Connection>>,
}

impl<D: Driver> LifecycleManager<D> {
    pub fn new(
        driver: Arc<D>,
        configs: DatabaseConfigs,
        synchronizer: IndexSynchronizer<D::Connection>,
    ) -> Self {
        Self {
            driver,
            trace_commands: false,
            configs,
            synchronizer,
            models_dir: None,
            handles: BTreeMap::new(),
        }
    }

    /// Enable driver command tracing for connections opened by `on_init`
    pub fn with_command_tracing(mut self, enabled: bool) -> Self {
        self.trace_commands = enabled;
        self
    }

    /// Models directory used by the startup index sync
    pub fn with_models_dir(mut self, models_dir: Option<String>) -> Self {
        self.models_dir = models_dir;
        self
    }

    pub fn configs(&self) -> &DatabaseConfigs {
        &self.configs
    }

    pub fn handle(&self, id: LogicalDatabase) -> Option<&ConnectionHandle<D::Connection>> {
        self.handles.get(&id)
    }

    pub fn connection(&self, id: LogicalDatabase) -> Option<&D::Connection> {
        self.handle(id).map(|handle| &handle.connection)
    }

    pub fn handles(&self) -> &BTreeMap<LogicalDatabase, ConnectionHandle<D::Connection>> {
        &self.handles
    }

    /// Establish every configured database concurrently, then run the
    /// primary's index sync if its config asks for it
    ///
    /// Any failed establishment fails the whole call and no handle is kept.
    #[instrument(skip(self))]
    pub async fn on_init(&mut self) -> DatabaseResult<()> {
        if !self.handles.is_empty() {
            warn!("Databases already initialized, reconnecting");
        }

        let establisher = ConnectionEstablisher::new(self.driver.clone(), self.trace_commands);
        let establisher = &establisher;
        let establishments = self.configs.iter().map(|(id, config)| async move {
            establisher
                .establish(id, config)
                .await
                .map(|outcome| (id, outcome))
        });
        let outcomes = match try_join_all(establishments).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.release_partial().await;
                return Err(err);
            }
        };

        self.handles = outcomes
            .into_iter()
            .filter_map(|(id, outcome)| outcome.into_handle().map(|handle| (id, handle)))
            .collect();

        info!(connected = self.handles.len(), "Databases initialized");

        let Some(primary) = self.configs.primary() else {
            return Ok(());
        };

        if primary.index_sync_requested() {
            let exit_after_sync = primary.exit_after_sync();

            if !self.handles.contains_key(&LogicalDatabase::PRIMARY) {
                warn!("Indexes sync requested but the primary database is disabled");
                self.synchronizer.exit_if_requested(exit_after_sync);
                return Ok(());
            }

            let models_dir = self.models_dir.clone();
            self.sync_indexes(exit_after_sync, models_dir.as_deref())
                .await?;
        }

        Ok(())
    }

    /// Connections opened before a sibling failed are dropped with the
    /// failed call; only the driver's shared handle outlives it.
    async fn release_partial(&self) {
        if let Err(err) = self.driver.release_shared().await {
            warn!(error = %err, "Failed to release shared MongoDB handle");
        }
    }

    pub async fn on_health_check(&self) -> HealthVerdict {
        check_health(&self.handles).await
    }

    /// Begin a transaction on the primary database
    pub async fn begin_transaction(&self) -> DatabaseResult<Session<D>> {
        self.begin_transaction_on(LogicalDatabase::PRIMARY).await
    }

    pub async fn begin_transaction_on(&self, id: LogicalDatabase) -> DatabaseResult<Session<D>> {
        begin_transaction(id, self.connection(id)).await
    }

    /// Synchronize model indexes against the primary database
    pub async fn sync_indexes(
        &self,
        exit_after_sync: bool,
        models_dir: Option<&str>,
    ) -> DatabaseResult<()> {
        let connection = self
            .connection(LogicalDatabase::PRIMARY)
            .ok_or(DatabaseError::ConnectionUndefined(LogicalDatabase::PRIMARY))?;

        self.synchronizer
            .sync(connection, exit_after_sync, models_dir)
            .await
    }

    /// Close every held connection and release the handles
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> DatabaseResult<()> {
        let handles = std::mem::take(&mut self.handles);

        let closes = handles.iter().map(|(id, handle)| async move {
            handle
                .connection
                .close()
                .await
                .map_err(|source| DatabaseError::Connection {
                    database: *id,
                    source,
                })
        });
        try_join_all(closes).await?;

        info!(closed = handles.len(), "Database connections closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mongodb::DatabaseConfig;
    use crate::mongodb::driver::ReadyState;
    use crate::mongodb::driver::mock::{FakeSession, MockConnection, MockDriver, SessionCalls};
    use crate::mongodb::indexes::fake::{FakeModel, RecordingTerminator};
    use crate::mongodb::{HealthStatus, ModelRegistry};
    use std::fs;

    fn connected() -> MockConnection {
        let mut connection = MockConnection::new();
        connection.expect_on_error().return_const(());
        connection
            .expect_ready_state()
            .return_const(ReadyState::CONNECTED);
        connection.expect_probe().returning(|| Ok(()));
        connection
    }

    fn driver() -> MockDriver {
        let mut driver = MockDriver::new();
        driver.expect_set_debug().return_const(());
        driver
            .expect_connect()
            .returning(|_, _, _| Ok(connected()));
        driver
    }

    fn configs() -> DatabaseConfigs {
        DatabaseConfigs::new()
            .with(
                LogicalDatabase::Main,
                DatabaseConfig::with_host("mongo.test.host").port(27017),
            )
            .with(
                LogicalDatabase::Cache,
                DatabaseConfig::with_host("mongo.cache.test.host"),
            )
    }

    fn no_models() -> IndexSynchronizer<MockConnection> {
        IndexSynchronizer::new(Arc::new(ModelRegistry::<MockConnection>::new()))
            .with_models_root("/nonexistent")
            .with_terminator(Arc::new(RecordingTerminator::default()))
    }

    #[tokio::test]
    async fn test_on_init_connects_every_enabled_database() {
        let configs = configs().with(
            LogicalDatabase::Cache,
            DatabaseConfig::with_host("mongo.cache.test.host").enabled(false),
        );
        let mut manager = LifecycleManager::new(Arc::new(driver()), configs, no_models());

        manager.on_init().await.unwrap();

        assert!(manager.handle(LogicalDatabase::Main).is_some());
        assert!(manager.handle(LogicalDatabase::Cache).is_none());
    }

    #[tokio::test]
    async fn test_on_init_fails_fast() {
        let mut driver = MockDriver::new();
        driver.expect_release_shared().times(1).returning(|| Ok(()));
        driver.expect_connect().returning(|uri, _, _| {
            if uri.contains("cache") {
                Err("connection refused".into())
            } else {
                Ok(connected())
            }
        });

        let mut manager = LifecycleManager::new(Arc::new(driver), configs(), no_models());
        let err = manager.on_init().await.unwrap_err();

        assert!(matches!(
            err,
            DatabaseError::Connection {
                database: LogicalDatabase::Cache,
                ..
            }
        ));
        assert!(manager.handles().is_empty());
    }

    #[tokio::test]
    async fn test_on_init_runs_primary_index_sync() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("models")).unwrap();
        fs::write(root.path().join("models").join("counter.json"), "{}").unwrap();

        let counter = FakeModel::new("Counter");
        let terminator = Arc::new(RecordingTerminator::default());
        let synchronizer = IndexSynchronizer::new(Arc::new(
            ModelRegistry::<MockConnection>::new().register("counter", counter.clone()),
        ))
        .with_models_root(root.path())
        .with_terminator(terminator.clone());

        let configs = configs().with(
            LogicalDatabase::Main,
            DatabaseConfig::with_host("mongo.test.host").sync_indexes(true),
        );
        let mut manager = LifecycleManager::new(Arc::new(driver()), configs, synchronizer);

        manager.on_init().await.unwrap();

        assert_eq!(counter.sync_count(), 1);
        assert!(terminator.exited());
    }

    #[tokio::test]
    async fn test_disabled_primary_still_exits_one_shot_sync() {
        let terminator = Arc::new(RecordingTerminator::default());
        let synchronizer = IndexSynchronizer::new(Arc::new(ModelRegistry::<MockConnection>::new()))
            .with_models_root("/nonexistent")
            .with_terminator(terminator.clone());

        let configs = configs().with(
            LogicalDatabase::Main,
            DatabaseConfig::with_host("mongo.test.host")
                .enabled(false)
                .sync_indexes(true),
        );
        let mut manager = LifecycleManager::new(Arc::new(driver()), configs, synchronizer);

        manager.on_init().await.unwrap();

        assert!(manager.handle(LogicalDatabase::Main).is_none());
        assert!(terminator.exited());
        assert_eq!(terminator.code(), 0);
    }

    #[tokio::test]
    async fn test_disabled_primary_without_exit_keeps_running() {
        let terminator = Arc::new(RecordingTerminator::default());
        let synchronizer = IndexSynchronizer::new(Arc::new(ModelRegistry::<MockConnection>::new()))
            .with_models_root("/nonexistent")
            .with_terminator(terminator.clone());

        let configs = configs().with(
            LogicalDatabase::Main,
            DatabaseConfig::with_host("mongo.test.host")
                .enabled(false)
                .sync_indexes(false),
        );
        let mut manager = LifecycleManager::new(Arc::new(driver()), configs, synchronizer);

        manager.on_init().await.unwrap();

        assert!(!terminator.exited());
    }

    #[tokio::test]
    async fn test_health_check_reports_held_connections() {
        let mut manager = LifecycleManager::new(Arc::new(driver()), configs(), no_models());
        manager.on_init().await.unwrap();

        let verdict = manager.on_health_check().await;

        assert_eq!(verdict.status, HealthStatus::Ok);
        assert_eq!(verdict.details.mongodb.len(), 2);
    }

    #[tokio::test]
    async fn test_begin_transaction_requires_handle() {
        let manager = LifecycleManager::new(Arc::new(driver()), configs(), no_models());

        let err = manager.begin_transaction().await.unwrap_err();

        assert!(matches!(
            err,
            DatabaseError::ConnectionUndefined(LogicalDatabase::Main)
        ));
    }

    #[tokio::test]
    async fn test_begin_transaction_on_primary() {
        let calls = Arc::new(SessionCalls::default());
        let session_calls = calls.clone();

        let mut driver = MockDriver::new();
        driver.expect_connect().returning(move |_, _, _| {
            let session_calls = session_calls.clone();
            let mut connection = connected();
            connection
                .expect_start_session()
                .returning(move || Ok(FakeSession::new(session_calls.clone())));
            Ok(connection)
        });

        let mut manager = LifecycleManager::new(Arc::new(driver), configs(), no_models());
        manager.on_init().await.unwrap();

        manager.begin_transaction().await.unwrap();

        assert_eq!(SessionCalls::count(&calls.start_transaction), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let mut driver = MockDriver::new();
        driver.expect_connect().times(2).returning(|_, _, _| {
            let mut connection = connected();
            connection.expect_close().times(1).returning(|| Ok(()));
            Ok(connection)
        });

        let mut manager = LifecycleManager::new(Arc::new(driver), configs(), no_models());
        manager.on_init().await.unwrap();
        manager.shutdown().await.unwrap();

        assert!(manager.handles().is_empty());
    }
}
