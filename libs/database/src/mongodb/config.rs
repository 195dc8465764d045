use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "config")]
use core_config::{env_optional, env_parse, ConfigError, FromEnv};

use super::builder::REDACTION_MASK;

/// Independently configured database within one process
///
/// Exactly one identifier is primary: it drives index synchronization and,
/// unless configured otherwise, uses the driver's shared handle.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogicalDatabase {
    Main,
    Cache,
}

impl LogicalDatabase {
    pub const PRIMARY: LogicalDatabase = LogicalDatabase::Main;

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }

    /// Prefix of the environment variables describing this database
    pub fn env_prefix(self) -> &'static str {
        match self {
            LogicalDatabase::Main => "MONGO",
            LogicalDatabase::Cache => "MONGO_CACHE",
        }
    }
}

/// One member of a replica set; the port comes from [`DatabaseConfig::port`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetNode {
    pub replica_host: String,
}

impl ReplicaSetNode {
    pub fn new(replica_host: impl Into<String>) -> Self {
        Self {
            replica_host: replica_host.into(),
        }
    }
}

/// Index synchronization switches, only honoured on the primary database
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSyncOptions {
    pub sync: bool,
    pub exit_after_sync: bool,
}

/// Declarative configuration of one logical database
///
/// `host` and `replica_set_nodes` are mutually exclusive. The conflict is
/// reported when the connection string is built, not when the config is loaded.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub is_enabled: Option<bool>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub auth_source: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub replica_set: Option<String>,
    pub replica_set_nodes: Option<Vec<ReplicaSetNode>>,
    pub read_preference: Option<String>,
    pub auth_mechanism: Option<String>,
    pub indexes: Option<IndexSyncOptions>,
    /// Connect through the driver's process-wide shared handle.
    /// Defaults to `true` for the primary database only.
    pub shared_handle: Option<bool>,
}

impl DatabaseConfig {
    /// Single-host configuration
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    /// Replica-set configuration; every node uses the same `port`
    pub fn with_replica_set_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replica_set_nodes: Some(nodes.into_iter().map(ReplicaSetNode::new).collect()),
            ..Default::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn auth_source(mut self, auth_source: impl Into<String>) -> Self {
        self.auth_source = Some(auth_source.into());
        self
    }

    pub fn replica_set(mut self, replica_set: impl Into<String>) -> Self {
        self.replica_set = Some(replica_set.into());
        self
    }

    pub fn read_preference(mut self, read_preference: impl Into<String>) -> Self {
        self.read_preference = Some(read_preference.into());
        self
    }

    pub fn auth_mechanism(mut self, auth_mechanism: impl Into<String>) -> Self {
        self.auth_mechanism = Some(auth_mechanism.into());
        self
    }

    pub fn sync_indexes(mut self, exit_after_sync: bool) -> Self {
        self.indexes = Some(IndexSyncOptions {
            sync: true,
            exit_after_sync,
        });
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.is_enabled = Some(enabled);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled.unwrap_or(true)
    }

    pub fn uses_shared_handle(&self, id: LogicalDatabase) -> bool {
        self.shared_handle.unwrap_or_else(|| id.is_primary())
    }

    pub fn index_sync_requested(&self) -> bool {
        self.indexes.is_some_and(|indexes| indexes.sync)
    }

    pub fn exit_after_sync(&self) -> bool {
        self.indexes.is_some_and(|indexes| indexes.exit_after_sync)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("is_enabled", &self.is_enabled)
            .field("user", &self.user.as_ref().map(|_| REDACTION_MASK))
            .field("password", &self.password.as_ref().map(|_| REDACTION_MASK))
            .field("database", &self.database)
            .field("auth_source", &self.auth_source)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("replica_set", &self.replica_set)
            .field("replica_set_nodes", &self.replica_set_nodes)
            .field("read_preference", &self.read_preference)
            .field("auth_mechanism", &self.auth_mechanism)
            .field("indexes", &self.indexes)
            .field("shared_handle", &self.shared_handle)
            .finish()
    }
}

/// Identifier → configuration map read once at startup
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatabaseConfigs(BTreeMap<LogicalDatabase, DatabaseConfig>);

impl DatabaseConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: LogicalDatabase, config: DatabaseConfig) -> Self {
        self.0.insert(id, config);
        self
    }

    pub fn insert(&mut self, id: LogicalDatabase, config: DatabaseConfig) {
        self.0.insert(id, config);
    }

    pub fn get(&self, id: LogicalDatabase) -> Option<&DatabaseConfig> {
        self.0.get(&id)
    }

    pub fn primary(&self) -> Option<&DatabaseConfig> {
        self.get(LogicalDatabase::PRIMARY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogicalDatabase, &DatabaseConfig)> {
        self.0.iter().map(|(id, config)| (*id, config))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(LogicalDatabase, DatabaseConfig)> for DatabaseConfigs {
    fn from_iter<T: IntoIterator<Item = (LogicalDatabase, DatabaseConfig)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(feature = "config")]
impl DatabaseConfig {
    /// Load one database configuration from `<PREFIX>_*` variables
    ///
    /// - `_ENABLED`, `_USER`, `_PASSWORD`, `_DATABASE`, `_AUTH_SOURCE`
    /// - `_HOST`, `_PORT`, `_REPLICA_SET`, `_REPLICA_SET_NODES` (comma separated)
    /// - `_READ_PREFERENCE`, `_AUTH_MECHANISM`
    /// - `_INDEXES_SYNC`, `_INDEXES_EXIT_AFTER_SYNC`, `_SHARED_HANDLE`
    pub fn from_env_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let var = |suffix: &str| format!("{prefix}_{suffix}");

        let replica_set_nodes = env_optional(&var("REPLICA_SET_NODES")).map(|nodes| {
            nodes
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(ReplicaSetNode::new)
                .collect()
        });

        let sync: Option<bool> = env_parse(&var("INDEXES_SYNC"))?;
        let exit_after_sync: Option<bool> = env_parse(&var("INDEXES_EXIT_AFTER_SYNC"))?;
        let indexes = (sync.is_some() || exit_after_sync.is_some()).then(|| IndexSyncOptions {
            sync: sync.unwrap_or(false),
            exit_after_sync: exit_after_sync.unwrap_or(false),
        });

        Ok(Self {
            is_enabled: env_parse(&var("ENABLED"))?,
            user: env_optional(&var("USER")),
            password: env_optional(&var("PASSWORD")),
            database: env_optional(&var("DATABASE")),
            auth_source: env_optional(&var("AUTH_SOURCE")),
            host: env_optional(&var("HOST")),
            port: env_parse(&var("PORT"))?,
            replica_set: env_optional(&var("REPLICA_SET")),
            replica_set_nodes,
            read_preference: env_optional(&var("READ_PREFERENCE")),
            auth_mechanism: env_optional(&var("AUTH_MECHANISM")),
            indexes,
            shared_handle: env_parse(&var("SHARED_HANDLE"))?,
        })
    }
}

/// Main is always present; the cache entry only when a host or node list is set
#[cfg(feature = "config")]
impl FromEnv for DatabaseConfigs {
    fn from_env() -> Result<Self, ConfigError> {
        let mut configs = DatabaseConfigs::new();
        configs.insert(
            LogicalDatabase::Main,
            DatabaseConfig::from_env_prefix(LogicalDatabase::Main.env_prefix())?,
        );

        let cache_prefix = LogicalDatabase::Cache.env_prefix();
        if env_optional(&format!("{cache_prefix}_HOST")).is_some()
            || env_optional(&format!("{cache_prefix}_REPLICA_SET_NODES")).is_some()
        {
            configs.insert(
                LogicalDatabase::Cache,
                DatabaseConfig::from_env_prefix(cache_prefix)?,
            );
        }

        Ok(configs)
    }
}
