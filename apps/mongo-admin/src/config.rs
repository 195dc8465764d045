use core_config::{FromEnv, env_optional, env_or_default};
use database::mongodb::{DatabaseConfig, DatabaseConfigs};

// Re-export Environment for use in other modules
pub use core_config::Environment;

/// Application configuration, composed from the shared config components
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub databases: DatabaseConfigs,
    /// Directory the models directory is resolved against
    pub models_root: String,
    pub models_dir: Option<String>,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        Ok(Self {
            environment: Environment::from_env(),
            databases: DatabaseConfigs::from_env()?,
            models_root: env_or_default("MONGO_MODELS_ROOT", "dist"),
            models_dir: env_optional("MONGO_MODELS_DIR"),
        })
    }

    /// Database configs with every index sync switch cleared
    pub fn databases_without_index_sync(&self) -> DatabaseConfigs {
        self.databases
            .iter()
            .map(|(id, config)| {
                (
                    id,
                    DatabaseConfig {
                        indexes: None,
                        ..config.clone()
                    },
                )
            })
            .collect()
    }
}
