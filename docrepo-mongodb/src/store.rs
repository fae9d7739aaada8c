use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    options::{ClientOptions, CountOptions, FindOneOptions, FindOptions},
};
use tracing::{debug, trace};

use docrepo_core::{
    backend::{StoreBackend, StoreBackendBuilder, UpsertOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Query, Sort},
};


#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    /// Name of the database every collection handle resolves against.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

fn find_options(query: &Query) -> FindOptions {
    let mut options = FindOptions::default();

    if let Some(limit) = query.limit {
        options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(skip) = query.skip {
        options.skip = Some(skip);
    }
    if !query.sort.is_empty() {
        options.sort = Some(Sort::to_document(&query.sort));
    }
    options.projection = query.projection.clone();

    options
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_one(&self, document: Document, collection: &str) -> DocumentStoreResult<Bson> {
        let result = self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        trace!(collection, id = %result.inserted_id, "inserted");

        Ok(result.inserted_id)
    }

    async fn find(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let options = find_options(&query);

        self.get_collection(collection)
            .find(query.filter)
            .with_options(options)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn find_one(
        &self,
        filter: Document,
        projection: Option<Document>,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut options = FindOneOptions::default();
        options.projection = projection;

        self.get_collection(collection)
            .find_one(filter)
            .with_options(options)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn count(&self, filter: Document, limit: Option<u64>, collection: &str) -> DocumentStoreResult<u64> {
        let mut options = CountOptions::default();
        options.limit = limit;

        self.get_collection(collection)
            .count_documents(filter)
            .with_options(options)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn update_one(&self, filter: Document, set: Document, collection: &str) -> DocumentStoreResult<u64> {
        Ok(
            self.get_collection(collection)
                .update_one(filter, doc! { "$set": set })
                .await
                .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
                .matched_count
        )
    }

    async fn upsert_one(
        &self,
        filter: Document,
        set: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpsertOutcome> {
        let result = self.get_collection(collection)
            .update_one(filter, doc! { "$set": set })
            .upsert(true)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        if result.upserted_id.is_some() {
            trace!(collection, "upserted");
        }

        Ok(UpsertOutcome {
            matched: result.matched_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, filter: Document, collection: &str) -> DocumentStoreResult<u64> {
        Ok(
            self.get_collection(collection)
                .delete_one(filter)
                .await
                .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
                .deleted_count
        )
    }

    async fn aggregate(&self, pipeline: Vec<Document>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, stages = pipeline.len(), "aggregating");

        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown().await
    }
}

/// Connection settings for a [`MongoDbStore`].
///
/// The client connects lazily; `build` only parses and validates the DSN.
#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
    max_pool_size: Option<u32>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
            max_pool_size: None,
        }
    }

    /// Application name reported to the server in the connection handshake.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn max_pool_size(mut self, max_pool_size: u32) -> Self {
        self.max_pool_size = Some(max_pool_size);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        if self.database.is_empty() {
            return Err(DocumentStoreError::Initialization("database name must not be empty".into()));
        }

        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }
        if self.max_pool_size.is_some() {
            options.max_pool_size = self.max_pool_size;
        }

        debug!(database = %self.database, "mongodb client configured");

        Ok(MongoDbStore::new(
            Client::with_options(options)
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
