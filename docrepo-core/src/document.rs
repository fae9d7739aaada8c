//! Record conversion between typed values and stored documents.
//!
//! Any serde-serializable type can be stored; the identity lives in the `_id`
//! field of the stored document, which callers usually map with
//! `#[serde(rename = "_id", skip_serializing_if = "Option::is_none")]` on an
//! `Option<ObjectId>` so the store assigns one on insert.

use bson::{Bson, de::deserialize_from_bson, oid::ObjectId, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Marker trait for types that can be stored in a typed collection.
///
/// Implemented for every `Serialize + DeserializeOwned` type that is safe to move
/// across tasks.
///
/// # Example
///
/// ```ignore
/// use bson::oid::ObjectId;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub name: String,
/// }
///
/// let users = store.typed_collection::<User>("users");
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}

impl<T> Document for T where T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}

/// Extension trait providing conversions for documents.
///
/// This trait is automatically implemented for all types that implement [`Document`].
pub trait DocumentExt: Document {
    /// Converts this record into the document shape handed to the store.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Serialization`] if the record does not
    /// serialize to a document (for example a bare scalar).
    fn to_document(&self) -> DocumentStoreResult<bson::Document>;

    /// Converts this record to a BSON value.
    fn to_bson(&self) -> DocumentStoreResult<Bson>;

    /// Decodes a record from a stored document.
    fn from_document(document: bson::Document) -> DocumentStoreResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_document(&self) -> DocumentStoreResult<bson::Document> {
        match self.to_bson()? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::Serialization(format!(
                "expected a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    fn to_bson(&self) -> DocumentStoreResult<Bson> {
        Ok(serialize_to_bson(self)?)
    }

    fn from_document(document: bson::Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }
}

/// Parses an externally supplied identity string.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidIdentity`] if `id` is not a 24-character
/// hex object id.
pub fn parse_identity(id: &str) -> DocumentStoreResult<ObjectId> {
    ObjectId::parse_str(id).map_err(|err| DocumentStoreError::InvalidIdentity(id.to_string(), err.to_string()))
}

/// Renders an identity reported by the store as its external hex form.
///
/// # Errors
///
/// Returns [`DocumentStoreError::IdentityConversion`] if the store reported an
/// identity that is not an object id.
pub fn identity_to_string(id: &Bson) -> DocumentStoreResult<String> {
    match id {
        Bson::ObjectId(oid) => Ok(oid.to_hex()),
        other => Err(DocumentStoreError::IdentityConversion(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        body: String,
    }

    #[test]
    fn records_convert_to_and_from_documents() {
        let note = Note { id: None, body: "hi".into() };
        let document = note.to_document().unwrap();

        assert_eq!(document, doc! { "body": "hi" });
        assert_eq!(Note::from_document(document).unwrap(), note);
    }

    #[test]
    fn scalars_are_not_documents() {
        assert!(matches!(
            5i32.to_document(),
            Err(DocumentStoreError::Serialization(_))
        ));
    }

    #[test]
    fn identities_parse_and_render() {
        let oid = ObjectId::new();

        assert_eq!(parse_identity(&oid.to_hex()).unwrap(), oid);
        assert!(matches!(
            parse_identity("not-an-id"),
            Err(DocumentStoreError::InvalidIdentity(..))
        ));
        assert_eq!(identity_to_string(&Bson::ObjectId(oid)).unwrap(), oid.to_hex());
        assert!(matches!(
            identity_to_string(&Bson::String("abc".into())),
            Err(DocumentStoreError::IdentityConversion(_))
        ));
    }
}
