//! Storage backend abstraction for the repository layer.
//!
//! A [`StoreBackend`] is the document database the repository talks to. Each
//! method is a single request/response against one collection; the repository
//! layer adds typing, identity handling, patch computation and joins on top.
//!
//! # Examples
//!
//! ```ignore
//! use docrepo::backend::StoreBackend;
//! use docrepo::query::Query;
//! use bson::doc;
//!
//! let id = backend.insert_one(doc! { "name": "Alice", "age": 30 }, "users").await?;
//! let adults = backend
//!     .find(Query::builder().filter(doc! { "age": { "$gte": 18 } }).build(), "users")
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{error::DocumentStoreResult, query::Query};

/// Outcome of an atomic insert-or-merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOutcome {
    /// Number of existing documents the filter matched.
    pub matched: u64,
    /// Identity of the inserted document, when the store reports one.
    pub upserted_id: Option<Bson>,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// Implementations must be safe to share across tasks; the repository holds
/// only a shared reference.
///
/// # Error Handling
///
/// Driver failures are reported as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend);
/// the repository annotates them with the operation and collection.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts a document and returns the identity the store assigned or kept.
    ///
    /// A document without `_id` receives a freshly generated object id.
    async fn insert_one(&self, document: Document, collection: &str) -> DocumentStoreResult<Bson>;

    /// Returns every document matching the query, honoring projection, sort,
    /// skip and limit.
    async fn find(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(
        &self,
        filter: Document,
        projection: Option<Document>,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Counts documents matching `filter`, stopping at `limit` when given.
    async fn count(&self, filter: Document, limit: Option<u64>, collection: &str) -> DocumentStoreResult<u64>;

    /// Merges `set` into the first document matching `filter`.
    ///
    /// Returns the number of matched documents (0 or 1).
    async fn update_one(&self, filter: Document, set: Document, collection: &str) -> DocumentStoreResult<u64>;

    /// Merges `set` into the first document matching `filter`, inserting a new
    /// document seeded from the filter's equality fields when none matches.
    async fn upsert_one(
        &self,
        filter: Document,
        set: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpsertOutcome>;

    /// Deletes the first document matching `filter` and returns how many were removed.
    async fn delete_one(&self, filter: Document, collection: &str) -> DocumentStoreResult<u64>;

    /// Runs an aggregation pipeline and returns its output documents.
    async fn aggregate(&self, pipeline: Vec<Document>, collection: &str) -> DocumentStoreResult<Vec<Document>>;

    /// Releases backend resources. The default implementation does nothing.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert_one(&self, document: Document, collection: &str) -> DocumentStoreResult<Bson> {
        (*self)
            .insert_one(document, collection)
            .await
    }

    async fn find(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        (*self).find(query, collection).await
    }

    async fn find_one(
        &self,
        filter: Document,
        projection: Option<Document>,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        (*self)
            .find_one(filter, projection, collection)
            .await
    }

    async fn count(&self, filter: Document, limit: Option<u64>, collection: &str) -> DocumentStoreResult<u64> {
        (*self)
            .count(filter, limit, collection)
            .await
    }

    async fn update_one(&self, filter: Document, set: Document, collection: &str) -> DocumentStoreResult<u64> {
        (*self)
            .update_one(filter, set, collection)
            .await
    }

    async fn upsert_one(
        &self,
        filter: Document,
        set: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpsertOutcome> {
        (*self)
            .upsert_one(filter, set, collection)
            .await
    }

    async fn delete_one(&self, filter: Document, collection: &str) -> DocumentStoreResult<u64> {
        (*self)
            .delete_one(filter, collection)
            .await
    }

    async fn aggregate(&self, pipeline: Vec<Document>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .aggregate(pipeline, collection)
            .await
    }
}

/// Factory for backend instances, carrying the backend's configuration.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
