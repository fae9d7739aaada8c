//! MongoDB storage backend for docrepo.
//!
//! [`MongoDbStore`] forwards each repository request to the official MongoDB
//! driver: predicates, projections and sort documents are passed through
//! unchanged, partial updates become `$set` updates, and pipeline joins run as
//! server-side aggregations.
//!
//! ```ignore
//! use docrepo::{DocumentStore, mongodb::MongoDbStore};
//! use docrepo::backend::StoreBackendBuilder;
//!
//! let backend = MongoDbStore::builder("mongodb://localhost:27017", "app")
//!     .app_name("billing")
//!     .build()
//!     .await?;
//! let store = DocumentStore::new(backend);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
