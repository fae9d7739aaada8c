//! Entry point owning a storage backend.
//!
//! # Example
//!
//! ```ignore
//! use docrepo::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! let users = store.typed_collection::<User>("users");
//! let orders = store.collection("orders");
//! ```

use crate::{
    backend::StoreBackend,
    collection::{Collection, TypedCollection},
    document::Document,
    error::DocumentStoreResult,
};

/// A document store bound to a specific backend implementation.
///
/// The store owns the backend; collection handles borrow it.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets a typed repository over the named collection.
    pub fn typed_collection<'a, T: Document>(&'a self, name: &str) -> TypedCollection<'a, B, T> {
        TypedCollection::new(name.to_string(), &self.backend)
    }

    /// Gets an untyped collection with the given name.
    ///
    /// An empty name yields an unbound handle.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), &self.backend)
    }

    /// Shuts down the store and releases backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to shut down.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await?;

        Ok(())
    }
}
