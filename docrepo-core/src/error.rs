//! Error types and result types for repository operations.
//!
//! Every public operation returns either a usable value or exactly one
//! [`DocumentStoreError`]. Use [`DocumentStoreResult<T>`] as the return type for
//! fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when working with a document repository.
///
/// The variants fall into three groups: input validation (identities, filters,
/// patches, join descriptors), lookup outcomes (`NotFound`, `NoMatch`) and
/// failures surfaced from the store backend.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The identity string could not be parsed into the store's identity type.
    #[error("Invalid identity {0:?}: {1}")]
    InvalidIdentity(String, String),
    /// No record matched a single-result lookup.
    /// The first argument is the identity, the second is the collection name.
    #[error("Document {0} not found in collection {1}")]
    NotFound(String, String),
    /// The partial-update differ received a value that is not record-shaped.
    #[error("Invalid shape: expected a record, got {0}")]
    InvalidShape(String),
    /// The patch resolved to no fields.
    #[error("No fields to update")]
    EmptyUpdate,
    /// An upsert was attempted with an empty filter.
    #[error("Upsert requires a non-empty filter")]
    EmptyFilter,
    /// The store returned an identity that is not an ObjectId.
    #[error("Unexpected identity returned by store: {0}")]
    IdentityConversion(String),
    /// A join was requested without any source.
    #[error("Join requires at least one source")]
    EmptySources,
    /// A join produced no document.
    #[error("No documents matched the join")]
    NoMatch,
    /// A lookup descriptor has an empty `from`, `foreign_field` or `as` field.
    #[error("Invalid lookup configuration: {0}")]
    InvalidLookupConfig(String),
    /// The base collection of a pipeline join is not bound to a collection name.
    #[error("Base collection is not bound")]
    UnboundCollection,
    /// The operation context was cancelled before the store call completed.
    #[error("Operation cancelled")]
    Cancelled,
    /// The operation context deadline elapsed before the store call completed.
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,
    /// A backend failure annotated with the repository operation that issued it.
    #[error("{operation} on collection {collection} failed: {message}")]
    Store {
        operation: &'static str,
        collection: String,
        message: String,
    },
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for repository operations.
///
/// This type alias is used throughout the crate to indicate operations that may fail
/// with a [`DocumentStoreError`].
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Attaches operation context to backend-level failures.
    ///
    /// Only [`DocumentStoreError::Backend`] is rewritten; typed errors and
    /// cancellation pass through unchanged so callers can still match on them.
    pub fn in_operation(self, operation: &'static str, collection: &str) -> Self {
        match self {
            DocumentStoreError::Backend(message) => DocumentStoreError::Store {
                operation,
                collection: collection.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_gain_operation_context() {
        let err = DocumentStoreError::Backend("connection reset".into())
            .in_operation("find", "users");

        match &err {
            DocumentStoreError::Store { operation, collection, message } => {
                assert_eq!(*operation, "find");
                assert_eq!(collection, "users");
                assert_eq!(message, "connection reset");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "find on collection users failed: connection reset");
    }

    #[test]
    fn typed_errors_pass_through_unchanged() {
        let err = DocumentStoreError::Cancelled.in_operation("count", "users");
        assert!(matches!(err, DocumentStoreError::Cancelled));

        let err = DocumentStoreError::NotFound("abc".into(), "users".into())
            .in_operation("find_by_id", "users");
        assert!(matches!(err, DocumentStoreError::NotFound(..)));
    }
}
