//! Index synchronization
//!
//! At startup the primary database can reconcile collection indexes with the
//! declared model definitions. Models are discovered by walking a models
//! directory; each discovered file is resolved to an [`IndexedModel`] by a
//! [`ModelLoader`], either from a static [`ModelRegistry`] or by parsing a
//! JSON manifest with [`ManifestLoader`].

use async_trait::async_trait;
use futures::future::try_join_all;
use mongodb::{
    Collection, IndexModel,
    bson::{Bson, Document},
    error::ErrorKind,
    options::IndexOptions,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};
use walkdir::WalkDir;

use super::{MongoConnection, MongoErrorCode, driver::Connection};
use crate::common::{DatabaseError, DatabaseResult};

pub const DEFAULT_MODELS_ROOT: &str = "dist";
pub const DEFAULT_MODELS_DIR: &str = "models";

const SCHEMAS_DIR: &str = "schemas";
const AGGREGATOR_STEM: &str = "index";
const SOURCE_MAP_EXTENSION: &str = "map";
const DEFAULT_INDEX_NAME: &str = "_id_";

/// A model whose collection indexes can be synchronized
#[async_trait]
pub trait IndexedModel: Send + Sync {
    fn name(&self) -> &str;

    /// Models can opt out of synchronization
    fn skip_sync_indexes(&self) -> bool {
        false
    }

    async fn sync_indexes(&self) -> DatabaseResult<()>;
}

/// One declared index
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub keys: Document,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub expire_after_seconds: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IndexDefinition {
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            unique: false,
            sparse: false,
            expire_after_seconds: None,
            name: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after_seconds = Some(ttl.as_secs());
        self
    }

    /// Explicit name, or `<field>_<direction>` pairs joined by `_`
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        self.keys
            .iter()
            .map(|(field, direction)| {
                let direction = match direction {
                    Bson::Int32(value) => value.to_string(),
                    Bson::Int64(value) => value.to_string(),
                    Bson::Double(value) => value.to_string(),
                    Bson::String(value) => value.clone(),
                    other => other.to_string(),
                };
                format!("{field}_{direction}")
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    fn to_index_model(&self) -> IndexModel {
        let options = IndexOptions::builder()
            .name(self.index_name())
            .unique(self.unique.then_some(true))
            .sparse(self.sparse.then_some(true))
            .expire_after(self.expire_after_seconds.map(Duration::from_secs))
            .build();

        IndexModel::builder()
            .keys(self.keys.clone())
            .options(options)
            .build()
    }
}

/// Indexes declared for one collection
pub struct CollectionIndexes {
    name: String,
    collection: Collection<Document>,
    indexes: Vec<IndexDefinition>,
    skip_sync: bool,
}

impl CollectionIndexes {
    pub fn new(
        name: impl Into<String>,
        collection: Collection<Document>,
        indexes: Vec<IndexDefinition>,
    ) -> Self {
        Self {
            name: name.into(),
            collection,
            indexes,
            skip_sync: false,
        }
    }

    pub fn skip_sync(mut self, skip: bool) -> Self {
        self.skip_sync = skip;
        self
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    async fn existing_index_names(&self) -> DatabaseResult<Vec<String>> {
        match self.collection.list_index_names().await {
            Ok(names) => Ok(names),
            Err(err) if is_namespace_missing(&err) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl IndexedModel for CollectionIndexes {
    fn name(&self) -> &str {
        &self.name
    }

    fn skip_sync_indexes(&self) -> bool {
        self.skip_sync
    }

    /// Drop indexes that are no longer declared, then create missing ones
    async fn sync_indexes(&self) -> DatabaseResult<()> {
        let existing = self.existing_index_names().await?;
        let declared: HashSet<String> = self.indexes.iter().map(IndexDefinition::index_name).collect();

        for stale in existing
            .iter()
            .filter(|name| name.as_str() != DEFAULT_INDEX_NAME && !declared.contains(*name))
        {
            info!(collection = %self.collection.name(), index = %stale, "Dropping index");
            self.collection.drop_index(stale.as_str()).await?;
        }

        let missing: Vec<IndexModel> = self
            .indexes
            .iter()
            .filter(|index| !existing.contains(&index.index_name()))
            .map(IndexDefinition::to_index_model)
            .collect();

        if !missing.is_empty() {
            info!(
                collection = %self.collection.name(),
                count = missing.len(),
                "Creating indexes"
            );
            self.collection.create_indexes(missing).await?;
        }

        Ok(())
    }
}

fn is_namespace_missing(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Command(command) if command.code == MongoErrorCode::CollectionDoesNotExist as i32
    )
}

/// Resolves a discovered model file to a model bound to the primary connection
#[async_trait]
pub trait ModelLoader<C>: Send + Sync {
    async fn load(&self, path: &Path, connection: &C) -> DatabaseResult<Arc<dyn IndexedModel>>;
}

type ModelFactory<C> = Box<dyn Fn(&C) -> Arc<dyn IndexedModel> + Send + Sync>;

/// Static registry of models keyed by file stem
///
/// Files without a registered model are handed to the fallback loader, if any.
pub struct ModelRegistry<C> {
    factories: HashMap<String, ModelFactory<C>>,
    fallback: Option<Arc<dyn ModelLoader<C>>>,
}

impl<C> Default for ModelRegistry<C> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
            fallback: None,
        }
    }
}

impl<C: Connection> ModelRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model that does not need the connection
    pub fn register(mut self, key: impl Into<String>, model: Arc<dyn IndexedModel>) -> Self {
        self.factories
            .insert(key.into(), Box::new(move |_: &C| model.clone()));
        self
    }

    /// Register a model built from the primary connection
    pub fn register_with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&C) -> Arc<dyn IndexedModel> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
        self
    }

    pub fn fallback(mut self, loader: Arc<dyn ModelLoader<C>>) -> Self {
        self.fallback = Some(loader);
        self
    }
}

#[async_trait]
impl<C: Connection> ModelLoader<C> for ModelRegistry<C> {
    async fn load(&self, path: &Path, connection: &C) -> DatabaseResult<Arc<dyn IndexedModel>> {
        let stem = model_key(path);

        if let Some(factory) = self.factories.get(&stem) {
            return Ok(factory(connection));
        }

        match &self.fallback {
            Some(loader) => loader.load(path, connection).await,
            None => Err(DatabaseError::ModelNotRegistered(path.display().to_string())),
        }
    }
}

/// JSON description of a collection's indexes
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelManifest {
    pub name: Option<String>,
    pub collection: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub skip_sync_indexes: bool,
}

/// Builds [`CollectionIndexes`] from JSON manifests against the primary database
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifestLoader;

#[async_trait]
impl ModelLoader<MongoConnection> for ManifestLoader {
    async fn load(
        &self,
        path: &Path,
        connection: &MongoConnection,
    ) -> DatabaseResult<Arc<dyn IndexedModel>> {
        let raw = tokio::fs::read_to_string(path).await?;
        let manifest: ModelManifest =
            serde_json::from_str(&raw).map_err(|e| DatabaseError::ModelDefinition {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;

        let name = manifest.name.unwrap_or_else(|| model_key(path));
        let collection_name = manifest.collection.unwrap_or_else(|| name.clone());
        let collection = connection.database().collection::<Document>(&collection_name);

        Ok(Arc::new(
            CollectionIndexes::new(name, collection, manifest.indexes)
                .skip_sync(manifest.skip_sync_indexes),
        ))
    }
}

fn model_key(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Model files under `dir`, skipping source maps, aggregator files and `schemas` subtrees
pub fn discover_model_files(dir: &Path) -> DatabaseResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && entry.file_name() == SCHEMAS_DIR));

    for entry in walker {
        let entry = entry.map_err(|e| DatabaseError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let is_source_map = path
            .extension()
            .is_some_and(|extension| extension == SOURCE_MAP_EXTENSION);
        let is_aggregator = path
            .file_stem()
            .is_some_and(|stem| stem == AGGREGATOR_STEM);

        if !is_source_map && !is_aggregator {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Terminates the process after a one-shot synchronization
pub trait Terminator: Send + Sync {
    fn exit(&self, code: i32);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Discovers models and synchronizes their indexes concurrently
pub struct IndexSynchronizer<C> {
    loader: Arc<dyn ModelLoader<C>>,
    terminator: Arc<dyn Terminator>,
    models_root: PathBuf,
}

impl<C: Connection> IndexSynchronizer<C> {
    pub fn new(loader: Arc<dyn ModelLoader<C>>) -> Self {
        Self {
            loader,
            terminator: Arc::new(ProcessTerminator),
            models_root: PathBuf::from(DEFAULT_MODELS_ROOT),
        }
    }

    /// Directory the models directory is resolved against (default `dist`)
    pub fn with_models_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.models_root = root.into();
        self
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn models_path(&self, models_dir: Option<&str>) -> PathBuf {
        self.models_root
            .join(models_dir.unwrap_or(DEFAULT_MODELS_DIR))
    }

    /// Synchronize every discovered model
    ///
    /// A missing models directory is a no-op. Any model failure fails the
    /// whole call. With `exit_after_sync` the process is terminated with code
    /// 0 afterwards, whether the synchronization succeeded or not.
    #[instrument(skip(self, connection))]
    pub async fn sync(
        &self,
        connection: &C,
        exit_after_sync: bool,
        models_dir: Option<&str>,
    ) -> DatabaseResult<()> {
        let result = self.sync_models(connection, models_dir).await;

        if let Err(err) = &result {
            error!(error = %err, "Failed to syncing indexes");
        }

        self.exit_if_requested(exit_after_sync);

        result
    }

    /// Terminate with code 0 when running as a one-shot sync
    pub fn exit_if_requested(&self, exit_after_sync: bool) {
        if exit_after_sync {
            info!("Process exit after synced indexes");
            self.terminator.exit(0);
        }
    }

    async fn sync_models(&self, connection: &C, models_dir: Option<&str>) -> DatabaseResult<()> {
        let models_path = self.models_path(models_dir);

        if !tokio::fs::try_exists(&models_path).await.unwrap_or(false) {
            info!(path = %models_path.display(), "Models dir is absent, indexes sync skipped");
            return Ok(());
        }

        let start = Instant::now();
        info!(path = %models_path.display(), "Start syncing indexes");

        let mut tasks = Vec::new();
        for file in discover_model_files(&models_path)? {
            let model = self.loader.load(&file, connection).await?;
            if model.skip_sync_indexes() {
                debug!(model = %model.name(), "Model opted out of index sync");
                continue;
            }

            tasks.push(sync_model(model));
        }

        try_join_all(tasks).await?;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ended syncing indexes in {} ms",
            start.elapsed().as_millis()
        );
        info!("Successfully synced indexes");

        Ok(())
    }
}

async fn sync_model(model: Arc<dyn IndexedModel>) -> DatabaseResult<()> {
    let start = Instant::now();
    let name = model.name().to_string();

    info!("Start syncing indexes for the {} collection", name);
    model
        .sync_indexes()
        .await
        .map_err(|err| DatabaseError::IndexSync {
            model: name.clone(),
            source: Box::new(err),
        })?;
    info!(
        "Ended syncing indexes for the {} collection in {} ms",
        name,
        start.elapsed().as_millis()
    );

    Ok(())
}
