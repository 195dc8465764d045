//! Connection string and driver options rendered from a [`DatabaseConfig`]
//!
//! Everything here is pure: no I/O happens until the rendered values reach
//! a [`Driver`](super::Driver).

use serde::Serialize;
use std::fmt;
use tracing::error;

use super::DatabaseConfig;
use crate::common::{DatabaseError, DatabaseResult};

/// Mask written over credentials in anything that gets logged
pub const REDACTION_MASK: &str = "********";

const SCHEME: &str = "mongodb://";

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &REDACTION_MASK)
            .finish()
    }
}

/// Driver options that are not part of the connection string
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<Credentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
}

impl ConnectionOptions {
    /// Copy with both credential fields replaced by [`REDACTION_MASK`].
    /// Only for logging, never pass this to a driver.
    pub fn redacted(&self) -> Self {
        Self {
            auth: self.auth.as_ref().map(|_| Credentials {
                username: REDACTION_MASK.to_string(),
                password: REDACTION_MASK.to_string(),
            }),
            ..self.clone()
        }
    }
}

/// Auth is set only when both user and password are present
pub fn build_connection_options(config: &DatabaseConfig) -> ConnectionOptions {
    let auth = match (&config.user, &config.password) {
        (Some(username), Some(password)) => Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };

    ConnectionOptions {
        auth,
        replica_set: config.replica_set.clone(),
        db_name: config.database.clone(),
    }
}

/// `host[:port]` for a single host, or `node:port` for every replica-set node
pub fn build_host_list(config: &DatabaseConfig) -> DatabaseResult<Vec<String>> {
    let with_port = |host: &str| match config.port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    match (&config.host, &config.replica_set_nodes) {
        (Some(_), Some(_)) => {
            let message = "Must be only `host` and `port` or `replicaSetNodes` config";
            error!(config = ?config, "Wrong database configuration: {}", message);
            Err(DatabaseError::Configuration(message.to_string()))
        }
        (Some(host), None) => Ok(vec![with_port(host)]),
        (None, Some(nodes)) if !nodes.is_empty() => Ok(nodes
            .iter()
            .map(|node| with_port(&node.replica_host))
            .collect()),
        _ => {
            let message = "Either `host` or a non-empty `replicaSetNodes` must be configured";
            error!(config = ?config, "Wrong database configuration: {}", message);
            Err(DatabaseError::Configuration(message.to_string()))
        }
    }
}

/// `mongodb://<hosts>/?authSource=..&readPreference=..&authMechanism=..`
pub fn build_connection_string(config: &DatabaseConfig) -> DatabaseResult<String> {
    let hosts = build_host_list(config)?;

    let query: Vec<String> = [
        ("authSource", &config.auth_source),
        ("readPreference", &config.read_preference),
        ("authMechanism", &config.auth_mechanism),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.as_ref().map(|value| format!("{key}={value}")))
    .collect();

    let mut connection_string = format!("{SCHEME}{}/", hosts.join(","));
    if !query.is_empty() {
        connection_string.push('?');
        connection_string.push_str(&query.join("&"));
    }

    Ok(connection_string)
}
