//! Collection handles for repository operations.
//!
//! - [`Collection`] is a raw handle: a collection name bound to a backend, working
//!   on untyped documents. Joins operate on these.
//! - [`TypedCollection`] is the generic repository over one record type: CRUD,
//!   existence and count checks, paged listing, partial updates and upserts.
//!
//! Every operation takes a [`Context`]; the store call is aborted when the
//! context is cancelled or its deadline passes.
//!
//! # Example
//!
//! ```ignore
//! use docrepo::{context::Context, query::{Filter, Projection, Sort}};
//!
//! let users = store.typed_collection::<User>("users");
//! let ctx = Context::background();
//!
//! let id = users.insert_one(&ctx, &user).await?;
//! let ana = users.find_by_id(&ctx, &id, Some(&Projection::select(["name"]))).await?;
//! let page = users
//!     .find_paged(&ctx, Some(&Filter::new().gte("age", 18)), None, 0, 20, vec![Sort::asc("name")])
//!     .await?;
//! ```

use std::marker::PhantomData;

use bson::{Bson, Document as BsonDocument, doc};
use tracing::{debug, warn};

use crate::{
    backend::StoreBackend,
    context::Context,
    document::{Document, DocumentExt, identity_to_string, parse_identity},
    error::{DocumentStoreError, DocumentStoreResult},
    page::PagedResult,
    patch::{IDENTITY_FIELD, PatchSource, partial_update},
    query::{Filter, Projection, Query, Sort},
};

/// An untyped collection bound to a storage backend.
///
/// A handle with an empty name is unbound; pipeline joins reject it.
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
}

impl<B: StoreBackend> Clone for Collection<'_, B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            backend: self.backend,
        }
    }
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, backend: &'a B) -> Self {
        Self { name, backend }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the handle refers to a named collection.
    pub fn is_bound(&self) -> bool {
        !self.name.is_empty()
    }

    pub(crate) fn backend(&self) -> &'a B {
        self.backend
    }

    /// Returns a typed view of this collection.
    pub fn typed<T: Document>(&self) -> TypedCollection<'a, B, T> {
        TypedCollection {
            inner: self.clone(),
            _marker: PhantomData,
        }
    }

    /// Fetches the first document matching `filter`.
    pub async fn find_one(&self, ctx: &Context, filter: BsonDocument) -> DocumentStoreResult<Option<BsonDocument>> {
        ctx.run(self.backend.find_one(filter, None, &self.name))
            .await
            .map_err(|err| err.in_operation("find_one", &self.name))
    }

    /// Fetches every document matching `filter`, in store order.
    pub async fn find(&self, ctx: &Context, filter: BsonDocument) -> DocumentStoreResult<Vec<BsonDocument>> {
        let query = Query::builder().filter(filter).build();

        ctx.run(self.backend.find(query, &self.name))
            .await
            .map_err(|err| err.in_operation("find", &self.name))
    }

    /// Runs an aggregation pipeline against this collection.
    pub async fn aggregate(&self, ctx: &Context, pipeline: Vec<BsonDocument>) -> DocumentStoreResult<Vec<BsonDocument>> {
        ctx.run(self.backend.aggregate(pipeline, &self.name))
            .await
            .map_err(|err| err.in_operation("aggregate", &self.name))
    }
}

/// A generic repository bound to one collection and one record type.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The storage backend type
/// * `T` - The record type stored in the collection
#[derive(Debug)]
pub struct TypedCollection<'a, B: StoreBackend, T: Document> {
    inner: Collection<'a, B>,
    _marker: PhantomData<T>,
}

impl<B: StoreBackend, T: Document> Clone for TypedCollection<'_, B, T> {
    fn clone(&self) -> Self {
        self.inner.typed()
    }
}

fn filter_document(filter: Option<&Filter>) -> BsonDocument {
    filter
        .map(Filter::build)
        .unwrap_or_default()
}

fn decode_all<T: Document>(documents: Vec<BsonDocument>) -> DocumentStoreResult<Vec<T>> {
    documents
        .into_iter()
        .map(T::from_document)
        .collect()
}

impl<'a, B: StoreBackend, T: Document> TypedCollection<'a, B, T> {
    pub(crate) fn new(name: String, backend: &'a B) -> Self {
        Collection::new(name, backend).typed()
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns the raw handle of this collection.
    pub fn untyped(&self) -> Collection<'a, B> {
        self.inner.clone()
    }

    async fn call<F, R>(&self, ctx: &Context, operation: &'static str, call: F) -> DocumentStoreResult<R>
    where
        F: Future<Output = DocumentStoreResult<R>>,
    {
        ctx.run(call)
            .await
            .map_err(|err| err.in_operation(operation, self.name()))
    }

    /// Inserts a record and returns its identity as a hex string.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::IdentityConversion`] if the store reports an
    /// identity that is not an object id.
    pub async fn insert_one(&self, ctx: &Context, record: &T) -> DocumentStoreResult<String> {
        let document = record.to_document()?;
        let id = self
            .call(ctx, "insert_one", self.inner.backend().insert_one(document, self.name()))
            .await?;
        let id = identity_to_string(&id)?;

        debug!(collection = self.name(), id = %id, "inserted document");

        Ok(id)
    }

    /// Fetches the record with the given identity.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIdentity`] for a malformed identity and
    /// [`DocumentStoreError::NotFound`] when no record has it.
    pub async fn find_by_id(&self, ctx: &Context, id: &str, projection: Option<&Projection>) -> DocumentStoreResult<T> {
        let oid = parse_identity(id)?;

        let document = self
            .call(
                ctx,
                "find_by_id",
                self.inner.backend().find_one(
                    doc! { IDENTITY_FIELD: oid },
                    projection.map(Projection::build),
                    self.name(),
                ),
            )
            .await?
            .ok_or_else(|| DocumentStoreError::NotFound(id.to_string(), self.name().to_string()))?;

        T::from_document(document)
    }

    /// Fetches every record matching `filter`; no filter matches all records.
    pub async fn find(
        &self,
        ctx: &Context,
        filter: Option<&Filter>,
        projection: Option<&Projection>,
    ) -> DocumentStoreResult<Vec<T>> {
        let mut query = Query::builder().filter(filter_document(filter));
        if let Some(projection) = projection {
            query = query.projection(projection.build());
        }

        let documents = self
            .call(ctx, "find", self.inner.backend().find(query.build(), self.name()))
            .await?;

        debug!(collection = self.name(), matched = documents.len(), "find");

        decode_all(documents)
    }

    /// Fetches every record of the collection.
    pub async fn find_all(&self, ctx: &Context) -> DocumentStoreResult<Vec<T>> {
        self.find(ctx, None, None).await
    }

    /// Counts the records matching `filter`.
    pub async fn count(&self, ctx: &Context, filter: Option<&Filter>) -> DocumentStoreResult<u64> {
        self.call(
            ctx,
            "count",
            self.inner
                .backend()
                .count(filter_document(filter), None, self.name()),
        )
        .await
    }

    /// Whether at least one record matches `filter`.
    ///
    /// The underlying count stops at the first match.
    pub async fn exists(&self, ctx: &Context, filter: Option<&Filter>) -> DocumentStoreResult<bool> {
        let count = self
            .call(
                ctx,
                "exists",
                self.inner
                    .backend()
                    .count(filter_document(filter), Some(1), self.name()),
            )
            .await?;

        Ok(count > 0)
    }

    /// Fetches one page of matching records plus the total match count.
    ///
    /// `total` comes from a separate count over the same filter, so it is not
    /// affected by `skip`, `limit` or `sort`. A `limit` of 0 leaves the page
    /// unbounded.
    pub async fn find_paged(
        &self,
        ctx: &Context,
        filter: Option<&Filter>,
        projection: Option<&Projection>,
        skip: u64,
        limit: u64,
        sort: Vec<Sort>,
    ) -> DocumentStoreResult<PagedResult<T>> {
        let filter = filter_document(filter);

        let total = self
            .call(
                ctx,
                "find_paged",
                self.inner
                    .backend()
                    .count(filter.clone(), None, self.name()),
            )
            .await?;

        let mut query = Query::builder()
            .filter(filter)
            .sorts(sort)
            .skip(skip);
        if limit > 0 {
            query = query.limit(limit);
        }
        if let Some(projection) = projection {
            query = query.projection(projection.build());
        }

        let documents = self
            .call(ctx, "find_paged", self.inner.backend().find(query.build(), self.name()))
            .await?;

        debug!(
            collection = self.name(),
            skip,
            limit,
            total,
            returned = documents.len(),
            "find_paged"
        );

        Ok(PagedResult::new(decode_all(documents)?, total))
    }

    /// Merges the explicitly-provided fields of `patch` into the record with the
    /// given identity.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIdentity`] for a malformed identity,
    /// [`DocumentStoreError::InvalidShape`] if `patch` is not record-shaped and
    /// [`DocumentStoreError::EmptyUpdate`] if it provides no field.
    pub async fn update_by_id<P>(&self, ctx: &Context, id: &str, patch: &P) -> DocumentStoreResult<()>
    where
        P: PatchSource + ?Sized,
    {
        let oid = parse_identity(id)?;

        let mut set = partial_update(patch)?;
        set.remove(IDENTITY_FIELD);
        if set.is_empty() {
            return Err(DocumentStoreError::EmptyUpdate);
        }

        let fields = set.len();
        let matched = self
            .call(
                ctx,
                "update_by_id",
                self.inner
                    .backend()
                    .update_one(doc! { IDENTITY_FIELD: oid }, set, self.name()),
            )
            .await?;

        debug!(collection = self.name(), id, fields, matched, "update_by_id");

        Ok(())
    }

    /// Deletes the record with the given identity. Deleting a missing record succeeds.
    pub async fn delete_by_id(&self, ctx: &Context, id: &str) -> DocumentStoreResult<()> {
        let oid = parse_identity(id)?;

        let deleted = self
            .call(
                ctx,
                "delete_by_id",
                self.inner
                    .backend()
                    .delete_one(doc! { IDENTITY_FIELD: oid }, self.name()),
            )
            .await?;

        debug!(collection = self.name(), id, deleted, "delete_by_id");

        Ok(())
    }

    /// Inserts the record if nothing matches `filter`, otherwise merges its
    /// explicitly-provided fields into the match.
    ///
    /// Returns the identity of the written record and whether it was inserted.
    ///
    /// When the store does not report the identity of a merged record, it is
    /// recovered by a second lookup on `filter`. That lookup is not atomic with
    /// the upsert: a concurrent writer matching the same filter can make it
    /// return the other writer's record.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::EmptyFilter`] for an empty filter and
    /// [`DocumentStoreError::EmptyUpdate`] if `record` provides no field.
    pub async fn upsert_by_filter<P>(&self, ctx: &Context, filter: &Filter, record: &P) -> DocumentStoreResult<(String, bool)>
    where
        P: PatchSource + ?Sized,
    {
        if filter.is_empty() {
            return Err(DocumentStoreError::EmptyFilter);
        }

        let mut set = partial_update(record)?;
        set.remove(IDENTITY_FIELD);
        if set.is_empty() {
            return Err(DocumentStoreError::EmptyUpdate);
        }

        let filter = filter.build();
        let outcome = self
            .call(
                ctx,
                "upsert_by_filter",
                self.inner
                    .backend()
                    .upsert_one(filter.clone(), set, self.name()),
            )
            .await?;

        if let Some(id) = outcome.upserted_id {
            let id = identity_to_string(&id)?;
            debug!(collection = self.name(), id = %id, "upsert inserted document");
            return Ok((id, true));
        }

        warn!(
            collection = self.name(),
            matched = outcome.matched,
            "upsert did not report an identity, looking it up by filter"
        );

        let document = self
            .call(
                ctx,
                "upsert_by_filter",
                self.inner.backend().find_one(
                    filter.clone(),
                    Some(doc! { IDENTITY_FIELD: 1 }),
                    self.name(),
                ),
            )
            .await?
            .ok_or_else(|| DocumentStoreError::NotFound(filter.to_string(), self.name().to_string()))?;

        let id = identity_to_string(document.get(IDENTITY_FIELD).unwrap_or(&Bson::Null))?;

        Ok((id, outcome.matched == 0))
    }
}
