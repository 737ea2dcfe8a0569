//! Direct MongoDB connection implementation.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    error::ErrorKind,
    options::{ClientOptions, FindOptions},
};
use std::future::Future;
use std::time::Duration;

use crate::config::{ConnectionConfig, TimeoutConfig};
use crate::connection::{BookCollection, UpdateOutcome};
use crate::error::{Result, RunnerError};
use crate::query::{IndexSpec, QuerySpec};

/// Server error code for a missing database or collection.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// The books collection reached through the official driver.
/// The client is connected eagerly and shut down by [`BookCollection::close`].
pub struct MongoCollection {
    client: Client,
    database: Database,
    collection: Collection<Document>,
    operation_timeout: Duration,
}

impl MongoCollection {
    /// Connect and verify the deployment answers a `ping`.
    pub async fn connect(config: &ConnectionConfig, timeouts: &TimeoutConfig) -> Result<Self> {
        tracing::info!(
            "Connecting to MongoDB for {}.{}",
            config.database_name,
            config.collection_name
        );

        let mut client_options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| RunnerError::from_driver("parse connection URI", e))?;

        client_options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        client_options.connect_timeout = Some(Duration::from_secs(timeouts.connect_secs));
        client_options.server_selection_timeout =
            Some(Duration::from_secs(timeouts.server_selection_secs));

        let client = Client::with_options(client_options)
            .map_err(|e| RunnerError::from_driver("create client", e))?;
        let database = client.database(&config.database_name);

        let connection = Self {
            collection: database.collection::<Document>(&config.collection_name),
            database,
            client,
            operation_timeout: Duration::from_secs(timeouts.operation_secs),
        };

        // Surface unreachable hosts and bad credentials before the catalog starts
        let ping = connection
            .bounded("ping", async {
                connection
                    .database
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map_err(|e| RunnerError::from_driver("ping", e))
            })
            .await;

        if let Err(e) = ping {
            connection.client.clone().shutdown().await;
            return Err(e);
        }

        tracing::info!("Connected to {}", connection.namespace());
        Ok(connection)
    }

    /// Indexes currently on the collection. A collection that does not exist
    /// yet has none.
    async fn existing_indexes(&self) -> Result<Vec<IndexModel>> {
        let cursor = match self.collection.list_indexes().await {
            Ok(cursor) => cursor,
            Err(e) if is_namespace_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(RunnerError::from_driver("list_indexes", e)),
        };
        cursor
            .try_collect()
            .await
            .map_err(|e| RunnerError::from_driver("list_indexes", e))
    }

    /// Run `fut` under the per-operation timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RunnerError::Timeout {
                operation,
                secs: self.operation_timeout.as_secs(),
            }),
        }
    }
}

fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND)
}

#[async_trait]
impl BookCollection for MongoCollection {
    fn namespace(&self) -> String {
        self.collection.namespace().to_string()
    }

    async fn find(&self, spec: &QuerySpec) -> Result<Vec<Document>> {
        let mut find_options = FindOptions::default();
        find_options.sort = spec.sort_document();
        find_options.projection = spec.projection.clone();
        find_options.skip = spec.skip;
        find_options.limit = spec.limit;

        tracing::debug!("find {} with {:?}", self.namespace(), spec);

        self.bounded("find", async {
            let cursor = self
                .collection
                .find(spec.filter.clone())
                .with_options(find_options)
                .await
                .map_err(|e| RunnerError::from_driver("find", e))?;
            cursor
                .try_collect()
                .await
                .map_err(|e| RunnerError::from_driver("find", e))
        })
        .await
    }

    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateOutcome> {
        self.bounded("update_one", async {
            let result = self
                .collection
                .update_one(filter, update)
                .await
                .map_err(|e| RunnerError::from_driver("update_one", e))?;
            Ok(UpdateOutcome {
                matched_count: result.matched_count,
                modified_count: result.modified_count,
            })
        })
        .await
    }

    async fn delete_one(&self, filter: Document) -> Result<u64> {
        self.bounded("delete_one", async {
            let result = self
                .collection
                .delete_one(filter)
                .await
                .map_err(|e| RunnerError::from_driver("delete_one", e))?;
            Ok(result.deleted_count)
        })
        .await
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        self.bounded("insert_many", async {
            let result = self
                .collection
                .insert_many(documents)
                .await
                .map_err(|e| RunnerError::from_driver("insert_many", e))?;
            Ok(result.inserted_ids.len())
        })
        .await
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        self.bounded("aggregate", async {
            let cursor = self
                .collection
                .aggregate(pipeline)
                .await
                .map_err(|e| RunnerError::from_driver("aggregate", e))?;
            cursor
                .try_collect()
                .await
                .map_err(|e| RunnerError::from_driver("aggregate", e))
        })
        .await
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<String> {
        tracing::debug!("Ensuring index {} on {}", spec.default_name(), self.namespace());
        self.bounded("create_index", async {
            // The driver names new indexes client-side, so an equivalent index
            // under another name would be rejected instead of returned
            let existing = self.existing_indexes().await?;
            if let Some(name) = existing
                .into_iter()
                .filter(|index| spec.matches_keys(&index.keys))
                .find_map(|index| index.options.and_then(|options| options.name))
            {
                tracing::debug!("Index {} already covers {}", name, spec.keys());
                return Ok(name);
            }

            let model = IndexModel::builder().keys(spec.keys()).build();
            let result = self
                .collection
                .create_index(model)
                .await
                .map_err(|e| RunnerError::from_driver("create_index", e))?;
            Ok(result.index_name)
        })
        .await
    }

    async fn explain(&self, filter: Document) -> Result<Document> {
        let command = doc! {
            "explain": {
                "find": self.collection.name(),
                "filter": filter,
            },
            "verbosity": "executionStats",
        };
        self.bounded("explain", async {
            self.database
                .run_command(command)
                .await
                .map_err(|e| RunnerError::from_driver("explain", e))
        })
        .await
    }

    async fn close(&self) {
        tracing::info!("Closing connection to {}", self.namespace());
        self.client.clone().shutdown().await;
    }
}
