//! A thin generic repository layer over JSON document databases.
//!
//! This crate is the primary entry point of the docrepo project. It re-exports the
//! core repository types, the `Record` derive and the available storage backends.
//!
//! # Features
//!
//! - **Typed collections** - CRUD, counting, existence checks and paged listing for any Serde type
//! - **Partial updates** - Only the fields a record explicitly provides are written
//! - **Upserts** - Insert-or-merge on an arbitrary filter
//! - **Joins** - Merge documents from several collections, client-side or through an aggregation pipeline
//! - **Cancellation** - Every call runs under a [`context::Context`] with an optional deadline
//!
//! # Quick Start
//!
//! ```ignore
//! use docrepo::{prelude::*, memory::InMemoryStore};
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub email: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let users = store.typed_collection::<User>("users");
//!     let ctx = Context::background();
//!
//!     let id = users
//!         .insert_one(&ctx, &User { name: "Ana".into(), email: "ana@example.com".into(), ..Default::default() })
//!         .await?;
//!
//!     // Only `name` is provided, so `email` is left untouched.
//!     users
//!         .update_by_id(&ctx, &id, &User { name: "Ana Maria".into(), ..Default::default() })
//!         .await?;
//!
//!     let ana = users
//!         .find_by_id(&ctx, &id, Some(&Projection::select(["name"])))
//!         .await?;
//!     println!("{ana:?}");
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Joins
//!
//! ```ignore
//! use docrepo::join::{JoinSource, Lookup, join, join_with_lookup};
//!
//! let profile = join(
//!     &ctx,
//!     user_id,
//!     &[
//!         JoinSource::new(store.collection("users"), "_id"),
//!         JoinSource::new(store.collection("settings"), "user_id").alias("settings"),
//!     ],
//! )
//! .await?;
//!
//! let with_orders = join_with_lookup(
//!     &ctx,
//!     &store.collection("users"),
//!     "_id",
//!     user_id,
//!     &[Lookup::new("orders", "user_id", "orders")],
//! )
//! .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-process storage for development and testing
//! - [`mongodb`] - MongoDB through the official driver (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docrepo;

pub mod prelude;

pub use docrepo_core::{backend, collection, context, document, error, join, page, patch, query, store};
pub use docrepo_core::store::DocumentStore;
#[doc(hidden)]
pub use docrepo_core::__private;
pub use docrepo_macros::Record;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docrepo_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docrepo_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
