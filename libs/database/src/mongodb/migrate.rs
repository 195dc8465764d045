//! Configuration for the schema migration tool

use serde::Serialize;

#[cfg(feature = "config")]
use core_config::{ConfigError, FromEnv, env_optional, env_or_default};

use super::builder::REDACTION_MASK;

pub const MIGRATIONS_DIR: &str = "migrations";
pub const CHANGELOG_COLLECTION: &str = "migrations";

/// Pieces of the single-host URL used by the migration tool
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrateUrlParts {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: String,
    pub auth_source: Option<String>,
    pub replica_set: Option<String>,
    pub auth_mechanism: Option<String>,
}

impl MigrateUrlParts {
    pub fn redacted(&self) -> Self {
        let mask = |value: &Option<String>| value.as_ref().map(|_| REDACTION_MASK.to_string());
        Self {
            user: mask(&self.user),
            password: mask(&self.password),
            ..self.clone()
        }
    }
}

/// `mongodb://[user:password@]host:port/[authSource][?replicaSet=..&authMechanism=..]`
///
/// Credentials are included only when both are present.
pub fn build_migrate_url(parts: &MigrateUrlParts) -> String {
    let userinfo = match (&parts.user, &parts.password) {
        (Some(user), Some(password)) => Some(format!(
            "{}:{}",
            urlencoding::encode(user),
            urlencoding::encode(password)
        )),
        _ => None,
    };

    render_migrate_url(parts, userinfo)
}

/// Same URL with the credentials replaced by [`REDACTION_MASK`], unencoded
fn redacted_migrate_url(parts: &MigrateUrlParts) -> String {
    let userinfo = (parts.user.is_some() && parts.password.is_some())
        .then(|| format!("{REDACTION_MASK}:{REDACTION_MASK}"));

    render_migrate_url(parts, userinfo)
}

fn render_migrate_url(parts: &MigrateUrlParts, userinfo: Option<String>) -> String {
    let mut url = String::from("mongodb://");

    if let Some(userinfo) = userinfo {
        url.push_str(&userinfo);
        url.push('@');
    }

    url.push_str(&format!("{}:{}/", parts.host, parts.port));

    if let Some(auth_source) = &parts.auth_source {
        url.push_str(auth_source);
    }

    let mut query = Vec::new();
    if let Some(replica_set) = &parts.replica_set {
        query.push(format!("replicaSet={replica_set}"));
    }
    if let Some(auth_mechanism) = &parts.auth_mechanism {
        query.push(format!("authMechanism={auth_mechanism}"));
    }
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }

    url
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateTarget {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
}

/// Settings consumed by the migration tool
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateMongoConfig {
    pub mongodb: MigrateTarget,
    pub migrations_dir: String,
    pub changelog_collection_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_file_extension: Option<String>,
    pub use_file_hash: bool,
    #[serde(skip)]
    parts: MigrateUrlParts,
}

impl MigrateMongoConfig {
    pub fn new(parts: MigrateUrlParts, database_name: Option<String>) -> Self {
        Self {
            mongodb: MigrateTarget {
                url: build_migrate_url(&parts),
                database_name,
            },
            migrations_dir: MIGRATIONS_DIR.to_string(),
            changelog_collection_name: CHANGELOG_COLLECTION.to_string(),
            migration_file_extension: None,
            use_file_hash: false,
            parts,
        }
    }

    /// Same config with credentials masked in the URL
    pub fn redacted(&self) -> Self {
        Self {
            mongodb: MigrateTarget {
                url: redacted_migrate_url(&self.parts),
                database_name: self.mongodb.database_name.clone(),
            },
            parts: self.parts.redacted(),
            ..self.clone()
        }
    }
}

#[cfg(feature = "config")]
impl FromEnv for MigrateMongoConfig {
    /// Reads the primary database's `MONGO_*` variables
    fn from_env() -> Result<Self, ConfigError> {
        let parts = MigrateUrlParts {
            user: env_optional("MONGO_USER"),
            password: env_optional("MONGO_PASSWORD"),
            host: env_or_default("MONGO_HOST", "localhost"),
            port: env_or_default("MONGO_PORT", "27017"),
            auth_source: env_optional("MONGO_AUTH_SOURCE"),
            replica_set: env_optional("MONGO_REPLICA_SET"),
            auth_mechanism: env_optional("MONGO_AUTH_MECHANISM"),
        };

        Ok(Self::new(parts, env_optional("MONGO_DATABASE")))
    }
}
