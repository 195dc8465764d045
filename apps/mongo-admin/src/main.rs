use clap::{Parser, Subcommand};
use core_config::FromEnv;
use core_config::tracing::{init_tracing, install_color_eyre};
use database::mongodb::{
    IndexSynchronizer, IndexedModel, ManifestLoader, MigrateMongoConfig, MongoConnection,
    MongoDriver, MongoLifecycle, ModelRegistry,
};
use std::sync::Arc;
use tracing::info;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "Administer the service's MongoDB databases")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Connect every configured database and print the health verdict
    Health,

    /// Connect, then synchronize model indexes on the primary database
    SyncIndexes {
        /// Models directory under the models root (default `models`)
        #[arg(long)]
        models_dir: Option<String>,

        /// Exit the process once the sync finished
        #[arg(long)]
        exit_after_sync: bool,
    },

    /// Print the migration tool config with credentials masked
    MigrateConfig,
}

/// Built-in models, falling back to JSON manifests for other files
fn model_registry() -> ModelRegistry<MongoConnection> {
    ModelRegistry::new()
        .register_with("counter", |connection: &MongoConnection| {
            Arc::new(domain_counters::indexed_model(connection.database())) as Arc<dyn IndexedModel>
        })
        .register_with("encrypted_storage", |connection: &MongoConnection| {
            Arc::new(domain_encrypted_storage::indexed_model(connection.database()))
                as Arc<dyn IndexedModel>
        })
        .fallback(Arc::new(ManifestLoader))
}

fn lifecycle(config: &Config) -> MongoLifecycle {
    let synchronizer = IndexSynchronizer::new(Arc::new(model_registry()))
        .with_models_root(config.models_root.clone());

    MongoLifecycle::new(
        Arc::new(MongoDriver::new()),
        config.databases_without_index_sync(),
        synchronizer,
    )
    .with_command_tracing(config.environment.allows_query_tracing())
    .with_models_dir(config.models_dir.clone())
}

async fn health(config: &Config) -> eyre::Result<()> {
    let mut lifecycle = lifecycle(config);
    lifecycle.on_init().await?;

    let verdict = lifecycle.on_health_check().await;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    lifecycle.shutdown().await?;

    if !verdict.is_ok() {
        eyre::bail!("Database health check failed ({})", verdict.http_status());
    }
    Ok(())
}

async fn sync_indexes(
    config: &Config,
    models_dir: Option<String>,
    exit_after_sync: bool,
) -> eyre::Result<()> {
    let mut lifecycle = lifecycle(config);
    lifecycle.on_init().await?;

    let exit_after_sync = exit_after_sync
        || config
            .databases
            .primary()
            .is_some_and(|primary| primary.exit_after_sync());
    let models_dir = models_dir.or_else(|| config.models_dir.clone());

    let result = lifecycle
        .sync_indexes(exit_after_sync, models_dir.as_deref())
        .await;
    lifecycle.shutdown().await?;

    Ok(result?)
}

fn migrate_config() -> eyre::Result<()> {
    let config = MigrateMongoConfig::from_env()?;
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output
    install_color_eyre();

    let cli = Cli::parse();

    // Load configuration from environment variables
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.environment);

    match cli.command {
        Command::Health => health(&config).await?,
        Command::SyncIndexes {
            models_dir,
            exit_after_sync,
        } => sync_indexes(&config, models_dir, exit_after_sync).await?,
        Command::MigrateConfig => migrate_config()?,
    }

    info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_indexes() {
        let cli = Cli::try_parse_from([
            "mongo-admin",
            "sync-indexes",
            "--models-dir",
            "models",
            "--exit-after-sync",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Command::SyncIndexes {
                models_dir: Some("models".to_string()),
                exit_after_sync: true,
            }
        );
    }

    #[test]
    fn test_parse_health() {
        let cli = Cli::try_parse_from(["mongo-admin", "health"]).unwrap();
        assert_eq!(cli.command, Command::Health);
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["mongo-admin", "drop-everything"]).is_err());
    }
}
