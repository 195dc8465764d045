//! [`Driver`] implementation backed by the official `mongodb` crate

use async_trait::async_trait;
use mongodb::{
    Client, ClientSession, Database, ServerType,
    bson::doc,
    event::{EventHandler, command::CommandEvent, sdam::SdamEvent},
    options::ClientOptions,
};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    ConnectionOptions, REDACTION_MASK,
    driver::{Connection, Driver, ErrorObserver, ReadyState, TransactionSession},
};
use crate::common::{BoxError, DatabaseError};

type Observers = Arc<RwLock<Vec<ErrorObserver>>>;

/// MongoDB driver handle
///
/// Owns the process-wide shared connection and the command tracing toggle,
/// so neither lives in module-level state.
#[derive(Default)]
pub struct MongoDriver {
    debug: AtomicBool,
    shared: Mutex<Option<SharedConnection>>,
}

/// The shared connection together with the target it was opened for
struct SharedConnection {
    connection_string: String,
    options: ConnectionOptions,
    connection: MongoConnection,
}

impl SharedConnection {
    /// Every request for the shared handle must name the same target
    fn ensure_target(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> Result<(), DatabaseError> {
        ensure_same_target(
            (self.connection_string.as_str(), &self.options),
            (connection_string, options),
        )
    }
}

fn ensure_same_target(
    existing: (&str, &ConnectionOptions),
    requested: (&str, &ConnectionOptions),
) -> Result<(), DatabaseError> {
    if existing == requested {
        return Ok(());
    }

    Err(DatabaseError::Configuration(format!(
        "Shared MongoDB handle already opened for {}, cannot reuse it for {}",
        redact_uri(existing.0),
        redact_uri(requested.0)
    )))
}

/// Strip userinfo before a connection string ends up in an error message
fn redact_uri(connection_string: &str) -> String {
    match connection_string.split_once("://") {
        Some((scheme, rest)) => match rest.split_once('@') {
            Some((_, hosts)) => format!("{scheme}://{REDACTION_MASK}@{hosts}"),
            None => connection_string.to_string(),
        },
        None => connection_string.to_string(),
    }
}

impl MongoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared connection, once a database using it has been established
    pub async fn shared_connection(&self) -> Option<MongoConnection> {
        self.shared
            .lock()
            .await
            .as_ref()
            .map(|shared| shared.connection.clone())
    }

    async fn open(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
        trace_commands: bool,
    ) -> Result<MongoConnection, BoxError> {
        let mut client_options = ClientOptions::parse(connection_string).await?;

        if let Some(auth) = &options.auth {
            let mut credential = client_options.credential.take().unwrap_or_default();
            credential.username = Some(auth.username.clone());
            credential.password = Some(auth.password.clone());
            client_options.credential = Some(credential);
        }
        if let Some(replica_set) = &options.replica_set {
            client_options.repl_set_name = Some(replica_set.clone());
        }
        if let Some(db_name) = &options.db_name {
            client_options.default_database = Some(db_name.clone());
        }

        let state = Arc::new(AtomicU8::new(ReadyState::CONNECTING.0));
        let observers: Observers = Arc::default();

        client_options.sdam_event_handler = Some(track_topology(state.clone(), observers.clone()));
        if trace_commands {
            client_options.command_event_handler = Some(trace_command_events());
        }

        let client = Client::with_options(client_options)?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database("admin"));

        // Server selection happens lazily; force one round trip so a bad
        // target fails here instead of on first use.
        if let Err(err) = database.run_command(doc! { "ping": 1 }).await {
            state.store(ReadyState::DISCONNECTED.0, Ordering::SeqCst);
            client.shutdown().await;
            return Err(err.into());
        }
        state.store(ReadyState::CONNECTED.0, Ordering::SeqCst);

        Ok(MongoConnection {
            client,
            database,
            state,
            observers,
        })
    }
}

#[async_trait]
impl Driver for MongoDriver {
    type Connection = MongoConnection;

    fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::SeqCst);
    }

    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
        shared: bool,
    ) -> Result<MongoConnection, BoxError> {
        if !shared {
            return self.open(connection_string, options, false).await;
        }

        let mut slot = self.shared.lock().await;
        if let Some(existing) = slot.as_ref() {
            existing.ensure_target(connection_string, options)?;
            warn!("Shared MongoDB handle already initialized, reusing it");
            return Ok(existing.connection.clone());
        }

        let trace_commands = self.debug.load(Ordering::SeqCst);
        let connection = self
            .open(connection_string, options, trace_commands)
            .await?;
        *slot = Some(SharedConnection {
            connection_string: connection_string.to_string(),
            options: options.clone(),
            connection: connection.clone(),
        });

        Ok(connection)
    }

    async fn release_shared(&self) -> Result<(), BoxError> {
        let released = self.shared.lock().await.take();
        if let Some(shared) = released {
            shared.connection.close().await?;
            info!("Shared MongoDB handle released");
        }
        Ok(())
    }
}

/// Live MongoDB connection; cheap to clone
#[derive(Clone)]
pub struct MongoConnection {
    client: Client,
    database: Database,
    state: Arc<AtomicU8>,
    observers: Observers,
}

impl MongoConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The configured database, or `admin` when none was configured
    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl Connection for MongoConnection {
    type Session = MongoSession;

    fn ready_state(&self) -> ReadyState {
        ReadyState(self.state.load(Ordering::SeqCst))
    }

    fn on_error(&self, observer: ErrorObserver) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    async fn probe(&self) -> Result<(), BoxError> {
        self.database
            .list_collection_names()
            .authorized_collections(true)
            .await?;
        Ok(())
    }

    async fn start_session(&self) -> Result<MongoSession, BoxError> {
        let session = self.client.start_session().await?;
        Ok(MongoSession(session))
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.state
            .store(ReadyState::DISCONNECTING.0, Ordering::SeqCst);
        self.client.clone().shutdown().await;
        self.state
            .store(ReadyState::DISCONNECTED.0, Ordering::SeqCst);
        Ok(())
    }
}

/// Client session handed to callers of `begin_transaction`
///
/// Dereferences to [`ClientSession`] so it can be passed to driver
/// operations with `.session(&mut *session)`.
pub struct MongoSession(ClientSession);

impl MongoSession {
    pub fn into_inner(self) -> ClientSession {
        self.0
    }
}

impl Deref for MongoSession {
    type Target = ClientSession;

    fn deref(&self) -> &ClientSession {
        &self.0
    }
}

impl DerefMut for MongoSession {
    fn deref_mut(&mut self) -> &mut ClientSession {
        &mut self.0
    }
}

#[async_trait]
impl TransactionSession for MongoSession {
    async fn start_transaction(&mut self) -> Result<(), BoxError> {
        self.0.start_transaction().await?;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), BoxError> {
        self.0.abort_transaction().await?;
        Ok(())
    }

    // The driver ends the server session when the handle is dropped
    async fn end_session(self) {
        drop(self.0);
    }
}

/// Derives the connection state from topology changes and forwards
/// heartbeat failures to observers
///
/// A single unreachable member must not mark the whole connection down, so
/// state follows the full topology description rather than per-server
/// heartbeats.
fn track_topology(state: Arc<AtomicU8>, observers: Observers) -> EventHandler<SdamEvent> {
    EventHandler::callback(move |event: SdamEvent| match event {
        SdamEvent::TopologyDescriptionChanged(changed) => {
            let servers = changed.new_description.servers();
            let derived = topology_state(
                servers
                    .values()
                    .map(|server| (server.server_type(), server.error().is_some())),
            );
            state.store(derived.0, Ordering::SeqCst);
        }
        SdamEvent::ServerHeartbeatFailed(failed) => {
            if let Ok(observers) = observers.read() {
                for observer in observers.iter() {
                    observer(&failed.failure);
                }
            }
        }
        SdamEvent::TopologyClosed(_) => {
            state.store(ReadyState::DISCONNECTED.0, Ordering::SeqCst);
            info!("MongoDB topology closed");
        }
        _ => {}
    })
}

/// Connected while any data-bearing member is known; disconnected once
/// every member has been checked without one; connecting until then
fn topology_state(servers: impl IntoIterator<Item = (ServerType, bool)>) -> ReadyState {
    let mut failed = false;
    for (server_type, errored) in servers {
        if is_data_bearing(server_type) {
            return ReadyState::CONNECTED;
        }
        failed |= errored || server_type != ServerType::Unknown;
    }

    if failed {
        ReadyState::DISCONNECTED
    } else {
        ReadyState::CONNECTING
    }
}

fn is_data_bearing(server_type: ServerType) -> bool {
    matches!(
        server_type,
        ServerType::Standalone
            | ServerType::Mongos
            | ServerType::RsPrimary
            | ServerType::RsSecondary
            | ServerType::LoadBalancer
    )
}

fn trace_command_events() -> EventHandler<CommandEvent> {
    EventHandler::callback(|event: CommandEvent| {
        if let CommandEvent::Started(started) = event {
            debug!(
                collection_db = %started.db,
                method = %started.command_name,
                query = %started.command,
                "Mongo: "
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mongodb::Credentials;

    #[test]
    fn test_one_reachable_member_keeps_connection_up() {
        let state = topology_state([
            (ServerType::RsPrimary, false),
            (ServerType::Unknown, true),
        ]);
        assert_eq!(state, ReadyState::CONNECTED);

        let state = topology_state([
            (ServerType::Unknown, true),
            (ServerType::RsSecondary, false),
        ]);
        assert_eq!(state, ReadyState::CONNECTED);
    }

    #[test]
    fn test_no_data_bearing_member_is_disconnected() {
        let state = topology_state([(ServerType::Unknown, true), (ServerType::Unknown, true)]);
        assert_eq!(state, ReadyState::DISCONNECTED);

        let state = topology_state([(ServerType::RsArbiter, false)]);
        assert_eq!(state, ReadyState::DISCONNECTED);
    }

    #[test]
    fn test_unchecked_topology_is_connecting() {
        assert_eq!(
            topology_state([(ServerType::Unknown, false)]),
            ReadyState::CONNECTING
        );
        assert_eq!(topology_state(std::iter::empty()), ReadyState::CONNECTING);
    }

    #[test]
    fn test_shared_target_must_match() {
        let options = ConnectionOptions {
            db_name: Some("main".to_string()),
            ..Default::default()
        };
        let uri = "mongodb://mongo.test.host:27017/?authSource=admin";

        assert!(ensure_same_target((uri, &options), (uri, &options)).is_ok());

        let other = ConnectionOptions {
            db_name: Some("cache".to_string()),
            ..Default::default()
        };
        let err = ensure_same_target((uri, &options), (uri, &other)).unwrap_err();
        assert!(err.is_configuration());

        let err = ensure_same_target(
            (uri, &options),
            ("mongodb://mongo.cache.test.host:27017/", &options),
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::Configuration(_)));
    }

    #[test]
    fn test_shared_target_error_hides_credentials() {
        let options = ConnectionOptions {
            auth: Some(Credentials {
                username: "user".to_string(),
                password: "secret".to_string(),
            }),
            ..Default::default()
        };
        let err = ensure_same_target(
            ("mongodb://user:secret@a:27017/", &options),
            ("mongodb://user:secret@b:27017/", &options),
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(!message.contains("secret"));
        assert!(message.contains("b:27017"));
    }
}
