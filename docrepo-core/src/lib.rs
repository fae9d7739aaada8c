//! A generic document-repository layer over document database backends.
//!
//! This crate is the core of the docrepo project and provides:
//!
//! - **Predicate and projection builders** ([`query`]) - Fluent construction of filters, projections and sorts
//! - **Partial-update differ** ([`patch`]) - Minimal flat patches from typed records
//! - **Collection handles** ([`collection`]) - Typed CRUD, counting and paged listing over one collection
//! - **Join composer** ([`join`]) - Merging documents from several collections on a shared key
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Document store** ([`store`]) - Entry point owning a backend
//! - **Operation context** ([`context`]) - Cancellation and deadlines for store calls
//! - **Error handling** ([`error`]) - Error types and result types
//! - **Paged results** ([`page`]) - The page type returned by windowed listings
//!
//! # Example
//!
//! ```ignore
//! use docrepo::{Record, context::Context, query::{Filter, Projection}};
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! let users = store.typed_collection::<User>("users");
//! let ctx = Context::background();
//!
//! let id = users.insert_one(&ctx, &user).await?;
//! let adults = users.find(&ctx, Some(&Filter::new().gte("age", 18)), None).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_core;

pub mod backend;
pub mod collection;
pub mod context;
pub mod document;
pub mod error;
pub mod join;
pub mod page;
pub mod patch;
pub mod query;
pub mod store;

// used by `#[derive(Record)]` expansions
#[doc(hidden)]
pub mod __private {
    pub use serde::Serialize;
}
