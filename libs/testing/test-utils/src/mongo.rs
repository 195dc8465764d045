//! MongoDB test infrastructure
//!
//! Provides a `TestMongo` helper that starts a standalone MongoDB container.

use database::mongodb::DatabaseConfig;
use mongodb::{Client, Database};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::mongo::Mongo;

const MONGO_PORT: u16 = 27017;

/// Test MongoDB wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestMongo;
///
/// # async fn example() {
/// let mongo = TestMongo::new().await;
/// let db = mongo.database("counters_test");
///
/// let names = db.list_collection_names().await.unwrap();
/// assert!(names.is_empty());
/// # }
/// ```
pub struct TestMongo {
    #[allow(dead_code)]
    container: ContainerAsync<Mongo>,
    client: Client,
    pub host: String,
    pub port: u16,
    pub connection_string: String,
}

impl TestMongo {
    /// Create a new test MongoDB instance
    ///
    /// Uses the MongoDB 8 image. The server is standalone, so transactions are
    /// not available.
    pub async fn new() -> Self {
        let container = Mongo::default()
            .with_tag("8")
            .start()
            .await
            .expect("Failed to start MongoDB container");

        let port = container
            .get_host_port_ipv4(MONGO_PORT)
            .await
            .expect("Failed to get MongoDB port");

        let host = "127.0.0.1".to_string();
        let connection_string = format!("mongodb://{}:{}/", host, port);

        let client = Client::with_uri_str(&connection_string)
            .await
            .expect("Failed to create MongoDB client");

        tracing::info!(port, "Test MongoDB ready (mongo:8)");

        Self {
            container,
            client,
            host,
            port,
            connection_string,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Handle to a database on the test server
    pub fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    /// Connection config pointing at the container
    pub fn database_config(&self, database: &str) -> DatabaseConfig {
        DatabaseConfig::with_host(self.host.clone())
            .port(self.port)
            .database(database)
    }
}
