//! Convenient re-exports of commonly used types from docrepo.
//!
//! ```ignore
//! use docrepo::prelude::*;
//! ```
//!
//! This provides access to:
//! - Document traits and the `Record` derive
//! - Store backends and builders
//! - Filter, projection and sort construction
//! - Collection handles, joins and the operation context
//! - Error types

pub use docrepo_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::{Collection, TypedCollection},
    context::Context,
    document::{Document, DocumentExt},
    error::{DocumentStoreError, DocumentStoreResult},
    join::{JoinSource, Lookup},
    page::PagedResult,
    patch::{PatchSource, Record},
    query::{Filter, Projection, Query, QueryBuilder, Sort, SortDirection},
    store::DocumentStore,
};
pub use docrepo_macros::Record;
