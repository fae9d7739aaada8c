//! In-memory storage implementation for document stores.
//!
//! Documents live in insertion order per collection, behind an async-safe
//! read-write lock. Filters, projections, sorting, `$set` merges, upserts and the
//! aggregation subset used by pipeline joins are evaluated in process.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::trace;

use docrepo_core::{
    backend::{StoreBackend, StoreBackendBuilder, UpsertOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    patch::IDENTITY_FIELD,
    query::{Expr, Query, Sort, SortDirection},
};

use crate::{
    evaluator::{DocumentEvaluator, compare_values, lookup_path, values_equal},
    pipeline,
};

pub(crate) type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing).
///
/// # Example
///
/// ```ignore
/// use docrepo_memory::InMemoryStore;
/// use docrepo::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert_one(doc! { "name": "Alice", "age": 30 }, "users").await?;
/// let alice = store.find_one(doc! { "_id": id }, None, "users").await?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::with_collections(StoreMap::new())
    }

    fn with_collections(collections: StoreMap) -> Self {
        Self {
            store: Arc::new(RwLock::new(collections)),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore` with seeded collections.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

fn select<'a>(documents: &'a [Document], filter: &Document) -> DocumentStoreResult<Vec<&'a Document>> {
    if filter.is_empty() {
        return Ok(documents.iter().collect());
    }

    let expr = Expr::parse(filter)?;
    let mut matched = Vec::new();
    for document in documents {
        if DocumentEvaluator::new(document).evaluate(&expr)? {
            matched.push(document);
        }
    }

    Ok(matched)
}

fn position(documents: &[Document], filter: &Document) -> DocumentStoreResult<Option<usize>> {
    let expr = Expr::parse(filter)?;

    for (index, document) in documents.iter().enumerate() {
        if DocumentEvaluator::new(document).evaluate(&expr)? {
            return Ok(Some(index));
        }
    }

    Ok(None)
}

fn sort_cmp(left: &Document, right: &Document, sorts: &[Sort]) -> Ordering {
    for sort in sorts {
        let ordering = compare_values(lookup_path(left, &sort.field), lookup_path(right, &sort.field));
        let ordering = match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn window(value: Option<u64>, default: usize) -> usize {
    value
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
        .unwrap_or(default)
}

/// Sets a possibly dotted path, creating embedded documents on the way.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn projection_flag(value: &Bson) -> bool {
    !matches!(
        value,
        Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false)
    ) && !matches!(value, Bson::Double(v) if *v == 0.0)
}

/// Applies an inclusion or exclusion projection.
///
/// The identity is kept unless excluded explicitly.
///
/// # Errors
///
/// Returns a backend error for projections mixing inclusion and exclusion.
pub(crate) fn apply_projection(document: Document, projection: &Document) -> DocumentStoreResult<Document> {
    if projection.is_empty() {
        return Ok(document);
    }

    let keep_identity = projection
        .get(IDENTITY_FIELD)
        .is_none_or(projection_flag);
    let fields = projection
        .iter()
        .filter(|(field, _)| field.as_str() != IDENTITY_FIELD)
        .map(|(field, flag)| (field.as_str(), projection_flag(flag)))
        .collect::<Vec<_>>();

    let includes = fields.iter().any(|(_, flag)| *flag);
    let excludes = fields.iter().any(|(_, flag)| !*flag);
    if includes && excludes {
        return Err(DocumentStoreError::Backend(
            "projection cannot mix inclusion and exclusion".to_string(),
        ));
    }

    if includes {
        let mut projected = Document::new();
        if keep_identity && let Some(id) = document.get(IDENTITY_FIELD) {
            projected.insert(IDENTITY_FIELD, id.clone());
        }
        for (field, _) in fields {
            if let Some(value) = lookup_path(&document, field) {
                set_path(&mut projected, field, value.clone());
            }
        }
        return Ok(projected);
    }

    let mut projected = document;
    if !keep_identity {
        projected.remove(IDENTITY_FIELD);
    }
    for (field, _) in fields {
        remove_path(&mut projected, field);
    }

    Ok(projected)
}

fn apply_set(document: &mut Document, set: Document) {
    for (field, value) in set {
        set_path(document, &field, value);
    }
}

// equality conditions of a filter become the initial fields of an upserted document
fn seed_from_filter(filter: &Document) -> Document {
    let mut seed = Document::new();

    for (field, condition) in filter {
        if field.starts_with('$') {
            continue;
        }
        match condition {
            Bson::Document(ops) if ops.keys().any(|key| key.starts_with('$')) => {
                if let Some(value) = ops.get("$eq") {
                    set_path(&mut seed, field, value.clone());
                }
            }
            literal => set_path(&mut seed, field, literal.clone()),
        }
    }

    seed
}

fn store_document(documents: &mut Vec<Document>, document: Document, collection: &str) -> DocumentStoreResult<Bson> {
    let id = document
        .get(IDENTITY_FIELD)
        .cloned()
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

    let duplicate = documents.iter().any(|existing| {
        existing
            .get(IDENTITY_FIELD)
            .is_some_and(|existing| values_equal(existing, &id))
    });
    if duplicate {
        return Err(DocumentStoreError::Backend(format!(
            "duplicate key {id} in collection {collection}"
        )));
    }

    let mut stored = Document::new();
    stored.insert(IDENTITY_FIELD, id.clone());
    for (field, value) in document {
        if field != IDENTITY_FIELD {
            stored.insert(field, value);
        }
    }
    documents.push(stored);

    Ok(id)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_one(&self, document: Document, collection: &str) -> DocumentStoreResult<Bson> {
        let mut store = self.store.write().await;
        let documents = store
            .entry(collection.to_string())
            .or_default();

        let id = store_document(documents, document, collection)?;
        trace!(collection, id = %id, "inserted");

        Ok(id)
    }

    async fn find(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = select(documents, &query.filter)?;
        if !query.sort.is_empty() {
            matched.sort_by(|a, b| sort_cmp(a, b, &query.sort));
        }

        matched
            .into_iter()
            .skip(window(query.skip, 0))
            .take(window(query.limit, usize::MAX))
            .map(|document| match &query.projection {
                Some(projection) => apply_projection(document.clone(), projection),
                None => Ok(document.clone()),
            })
            .collect()
    }

    async fn find_one(
        &self,
        filter: Document,
        projection: Option<Document>,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(None);
        };

        position(documents, &filter)?
            .map(|index| match &projection {
                Some(projection) => apply_projection(documents[index].clone(), projection),
                None => Ok(documents[index].clone()),
            })
            .transpose()
    }

    async fn count(&self, filter: Document, limit: Option<u64>, collection: &str) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(0);
        };

        let matched = select(documents, &filter)?.len();

        Ok((matched as u64).min(limit.unwrap_or(u64::MAX)))
    }

    async fn update_one(&self, filter: Document, set: Document, collection: &str) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        match position(documents, &filter)? {
            Some(index) => {
                apply_set(&mut documents[index], set);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn upsert_one(
        &self,
        filter: Document,
        set: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpsertOutcome> {
        let mut store = self.store.write().await;
        let documents = store
            .entry(collection.to_string())
            .or_default();

        if let Some(index) = position(documents, &filter)? {
            apply_set(&mut documents[index], set);
            return Ok(UpsertOutcome {
                matched: 1,
                upserted_id: None,
            });
        }

        let mut document = seed_from_filter(&filter);
        apply_set(&mut document, set);
        let id = store_document(documents, document, collection)?;
        trace!(collection, id = %id, "upserted");

        Ok(UpsertOutcome {
            matched: 0,
            upserted_id: Some(id),
        })
    }

    async fn delete_one(&self, filter: Document, collection: &str) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        match position(documents, &filter)? {
            Some(index) => {
                documents.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn aggregate(&self, stages: Vec<Document>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let input = store
            .get(collection)
            .cloned()
            .unwrap_or_default();

        pipeline::run(&stages, input, &store, &Document::new())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docrepo_memory::InMemoryStore;
/// use docrepo::backend::StoreBackendBuilder;
/// use bson::doc;
///
/// let store = InMemoryStore::builder()
///     .collection("users", vec![doc! { "name": "Ana" }])
///     .build()
///     .await?;
/// ```
#[derive(Default, Debug)]
pub struct InMemoryStoreBuilder {
    collections: Vec<(String, Vec<Document>)>,
}

impl InMemoryStoreBuilder {
    /// Seeds a collection; documents without `_id` receive a generated one.
    pub fn collection(mut self, name: impl Into<String>, documents: Vec<Document>) -> Self {
        self.collections
            .push((name.into(), documents));
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds a store holding the seeded collections.
    ///
    /// Fails if a seeded collection repeats an `_id`.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut collections = StoreMap::new();

        for (name, documents) in self.collections {
            let stored = collections.entry(name.clone()).or_default();
            for document in documents {
                store_document(stored, document, &name)
                    .map_err(|err| DocumentStoreError::Initialization(err.to_string()))?;
            }
        }

        Ok(InMemoryStore::with_collections(collections))
    }
}
