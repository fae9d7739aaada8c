//! In-memory document storage backend for docrepo.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development
//! and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Predicate evaluation** - Comparison operators, `$in`, `$and`/`$or` and dotted paths
//! - **Windowed queries** - Projection, multi-key sorting, skip and limit
//! - **Merge updates and upserts** - `$set` semantics, upserts seeded from equality filters
//! - **Pipelines** - The `$match`/`$lookup`/`$project`/`$limit` subset used by pipeline joins
//!
//! # Quick Start
//!
//! ```ignore
//! use docrepo::{DocumentStore, context::Context, memory::InMemoryStore};
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::new());
//!     let users = store.typed_collection::<User>("users");
//!
//!     let id = users
//!         .insert_one(&Context::background(), &User { id: None, name: "Alice".into() })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_memory;

mod evaluator;
mod pipeline;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
