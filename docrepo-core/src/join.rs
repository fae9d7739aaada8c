//! Multi-collection joins on a shared key value.
//!
//! Three strategies merge documents from several collections into one result:
//!
//! - [`join`] fetches at most one document per source;
//! - [`join_all`] fetches every matching document per source;
//! - [`join_with_lookup`] runs one aggregation pipeline with a `$lookup` stage per
//!   linked collection, so the store does the merge.
//!
//! Sources are fetched concurrently, but merged in the order given: on key
//! collisions the later source wins.
//!
//! # Example
//!
//! ```ignore
//! use docrepo::join::{JoinSource, Lookup, join, join_with_lookup};
//!
//! let merged = join(&ctx, user_id, &[
//!     JoinSource::new(store.collection("users"), "_id"),
//!     JoinSource::new(store.collection("profiles"), "user_id").alias("profile"),
//! ]).await?;
//!
//! let with_orders = join_with_lookup(
//!     &ctx,
//!     &store.collection("users"),
//!     "_id",
//!     user_id,
//!     &[Lookup::new("orders", "user_id", "orders")],
//! ).await?;
//! // with_orders.get_array("orders") is always an array, possibly empty.
//! ```

use bson::{Bson, Document, doc};
use futures::future::try_join_all;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    collection::Collection,
    context::Context,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Name of the pipeline variable bound to the base document's local field.
const JOIN_KEY: &str = "joinKey";

/// One collection taking part in a [`join`] or [`join_all`].
#[derive(Debug)]
pub struct JoinSource<'a, B: StoreBackend> {
    pub collection: Collection<'a, B>,
    /// Field of this collection holding the shared key.
    pub local_field: String,
    /// Key to nest this source's documents under; `None` flattens them into the result.
    pub alias: Option<String>,
}

impl<'a, B: StoreBackend> JoinSource<'a, B> {
    pub fn new(collection: Collection<'a, B>, local_field: impl Into<String>) -> Self {
        Self {
            collection,
            local_field: local_field.into(),
            alias: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn filter(&self, value: &Bson) -> Document {
        doc! { self.local_field.as_str(): value.clone() }
    }

    fn nested_under(&self) -> Option<&str> {
        self.alias
            .as_deref()
            .filter(|alias| !alias.is_empty())
    }
}

/// One linked collection of a [`join_with_lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Name of the linked collection.
    pub from: String,
    /// Field of the linked collection matched against the base key.
    pub foreign_field: String,
    /// Output field holding the array of linked documents.
    pub as_field: String,
}

impl Lookup {
    pub fn new(from: impl Into<String>, foreign_field: impl Into<String>, as_field: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        }
    }

    fn validate(&self) -> DocumentStoreResult<()> {
        let missing = [
            ("from", &self.from),
            ("foreign_field", &self.foreign_field),
            ("as", &self.as_field),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        match missing {
            Some((name, _)) => Err(DocumentStoreError::InvalidLookupConfig(format!(
                "lookup {:?} has an empty {name}",
                self
            ))),
            None => Ok(()),
        }
    }
}

fn flatten_into(result: &mut Document, document: Document) {
    for (key, value) in document {
        result.insert(key, value);
    }
}

/// Merges at most one document per source.
///
/// Sources without a matching document are skipped. An aliased source is nested
/// under its alias; other sources are flattened into the result, later sources
/// overwriting earlier ones.
///
/// # Errors
///
/// Returns [`DocumentStoreError::EmptySources`] if `sources` is empty and
/// [`DocumentStoreError::NoMatch`] if no source contributed anything.
pub async fn join<B: StoreBackend>(
    ctx: &Context,
    value: impl Into<Bson>,
    sources: &[JoinSource<'_, B>],
) -> DocumentStoreResult<Document> {
    if sources.is_empty() {
        return Err(DocumentStoreError::EmptySources);
    }

    let value = value.into();
    let fetched = try_join_all(
        sources
            .iter()
            .map(|source| source.collection.find_one(ctx, source.filter(&value))),
    )
    .await?;

    let mut result = Document::new();
    for (source, found) in sources.iter().zip(fetched) {
        let Some(found) = found else {
            debug!(collection = source.collection.name(), "join source had no match, skipping");
            continue;
        };

        match source.nested_under() {
            Some(alias) => {
                result.insert(alias, found);
            }
            None => flatten_into(&mut result, found),
        }
    }

    if result.is_empty() {
        return Err(DocumentStoreError::NoMatch);
    }

    debug!(sources = sources.len(), fields = result.len(), "join");

    Ok(result)
}

/// Merges every matching document per source.
///
/// An aliased source contributes nothing for zero matches, a nested document for
/// one match and a nested array for several. An unaliased source only
/// contributes its first match, flattened; further matches are dropped.
///
/// # Errors
///
/// Returns [`DocumentStoreError::EmptySources`] if `sources` is empty and
/// [`DocumentStoreError::NoMatch`] if no source contributed anything.
pub async fn join_all<B: StoreBackend>(
    ctx: &Context,
    value: impl Into<Bson>,
    sources: &[JoinSource<'_, B>],
) -> DocumentStoreResult<Document> {
    if sources.is_empty() {
        return Err(DocumentStoreError::EmptySources);
    }

    let value = value.into();
    let fetched = try_join_all(
        sources
            .iter()
            .map(|source| source.collection.find(ctx, source.filter(&value))),
    )
    .await?;

    let mut result = Document::new();
    for (source, mut found) in sources.iter().zip(fetched) {
        match (source.nested_under(), found.len()) {
            (_, 0) => {
                debug!(collection = source.collection.name(), "join source had no match, skipping");
            }
            (Some(alias), 1) => {
                result.insert(alias, found.remove(0));
            }
            (Some(alias), _) => {
                result.insert(alias, found.into_iter().map(Bson::Document).collect::<Vec<_>>());
            }
            (None, matched) => {
                if matched > 1 {
                    debug!(
                        collection = source.collection.name(),
                        matched,
                        "unaliased join source matched several documents, merging the first"
                    );
                }
                flatten_into(&mut result, found.remove(0));
            }
        }
    }

    if result.is_empty() {
        return Err(DocumentStoreError::NoMatch);
    }

    debug!(sources = sources.len(), fields = result.len(), "join_all");

    Ok(result)
}

/// Builds the aggregation pipeline used by [`join_with_lookup`].
///
/// The pipeline matches the base document, links each lookup through a
/// let-bound join key (dropping the foreign key from linked documents) and keeps
/// one base document.
pub fn lookup_pipeline(local_field: &str, value: Bson, lookups: &[Lookup]) -> Vec<Document> {
    let mut pipeline = Vec::with_capacity(lookups.len() + 2);
    pipeline.push(doc! { "$match": { local_field: value } });

    for lookup in lookups {
        pipeline.push(doc! {
            "$lookup": {
                "from": lookup.from.as_str(),
                "let": { JOIN_KEY: format!("${local_field}") },
                "pipeline": [
                    { "$match": { "$expr": { "$eq": [ format!("${}", lookup.foreign_field), format!("$${JOIN_KEY}") ] } } },
                    { "$project": { lookup.foreign_field.as_str(): 0 } },
                ],
                "as": lookup.as_field.as_str(),
            }
        });
    }

    pipeline.push(doc! { "$limit": 1 });
    pipeline
}

/// Joins linked collections onto one base document with a single pipeline.
///
/// Each lookup's output field is always an array, possibly empty, even when at
/// most one linked document can match.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidLookupConfig`] if a lookup has an empty
/// field, [`DocumentStoreError::UnboundCollection`] if `base` has no name and
/// [`DocumentStoreError::NoMatch`] if no base document matches.
pub async fn join_with_lookup<B: StoreBackend>(
    ctx: &Context,
    base: &Collection<'_, B>,
    local_field: &str,
    value: impl Into<Bson>,
    lookups: &[Lookup],
) -> DocumentStoreResult<Document> {
    for lookup in lookups {
        lookup.validate()?;
    }
    if !base.is_bound() {
        return Err(DocumentStoreError::UnboundCollection);
    }

    let pipeline = lookup_pipeline(local_field, value.into(), lookups);
    let mut documents = base.aggregate(ctx, pipeline).await?;

    debug!(
        collection = base.name(),
        lookups = lookups.len(),
        matched = documents.len(),
        "join_with_lookup"
    );

    if documents.is_empty() {
        return Err(DocumentStoreError::NoMatch);
    }

    Ok(documents.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_matches_links_and_limits() {
        let pipeline = lookup_pipeline(
            "_id",
            Bson::Int32(7),
            &[Lookup::new("orders", "user_id", "orders")],
        );

        assert_eq!(
            pipeline,
            vec![
                doc! { "$match": { "_id": 7 } },
                doc! {
                    "$lookup": {
                        "from": "orders",
                        "let": { "joinKey": "$_id" },
                        "pipeline": [
                            { "$match": { "$expr": { "$eq": ["$user_id", "$$joinKey"] } } },
                            { "$project": { "user_id": 0 } },
                        ],
                        "as": "orders",
                    }
                },
                doc! { "$limit": 1 },
            ]
        );
    }

    #[test]
    fn pipeline_without_lookups_still_matches_and_limits() {
        let pipeline = lookup_pipeline("code", Bson::String("x".into()), &[]);

        assert_eq!(
            pipeline,
            vec![doc! { "$match": { "code": "x" } }, doc! { "$limit": 1 }]
        );
    }

    #[test]
    fn lookups_with_empty_fields_are_rejected() {
        assert!(Lookup::new("orders", "user_id", "orders").validate().is_ok());

        for lookup in [
            Lookup::new("", "user_id", "orders"),
            Lookup::new("orders", "", "orders"),
            Lookup::new("orders", "user_id", ""),
        ] {
            assert!(matches!(
                lookup.validate(),
                Err(DocumentStoreError::InvalidLookupConfig(_))
            ));
        }
    }
}
