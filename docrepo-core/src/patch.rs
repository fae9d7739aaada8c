//! Partial-update differ.
//!
//! [`partial_update`] turns a record into a flat patch document holding only the
//! fields that were explicitly provided. The record describes itself through
//! [`Record::describe`], normally generated by `#[derive(Record)]`:
//!
//! ```ignore
//! use docrepo::{Record, patch::{partial_update, value}};
//! use serde::Serialize;
//!
//! #[derive(Serialize, Record)]
//! pub struct UserPatch {
//!     pub name: String,             // skipped while empty
//!     pub active: Option<bool>,     // skipped while None, kept even when Some(false)
//!     #[serde(rename = "_id")]
//!     pub id: Option<ObjectId>,     // never patched
//!     #[serde(flatten)]
//!     pub audit: Audit,             // sub-fields flatten into the patch
//! }
//!
//! let patch = partial_update(&UserPatch { active: value(false), ..Default::default() })?;
//! // { "active": false }
//! ```
//!
//! # Rules
//!
//! Fields are visited in declaration order:
//!
//! 1. fields that are not `pub` are skipped;
//! 2. fields whose storage name is `-` are skipped;
//! 3. inline fields, and fields holding an embedded record, are diffed recursively and
//!    their entries merged into the parent;
//! 4. the storage name is the rename, or the field name;
//! 5. the `_id` field is skipped;
//! 6. optional fields are skipped when absent and always kept when present;
//! 7. plain fields are skipped while equal to their type's zero value.
//!
//! Optional fields are therefore the only way to write a zero value (`0`, `""`,
//! `false`) through a patch; [`value`] lifts a plain value into that wrapper.

use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
};

use bson::{Bson, Document, oid::ObjectId, ser::serialize_to_bson};
use serde::Serialize;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Storage name of the identity field.
pub const IDENTITY_FIELD: &str = "_id";

/// Storage name marking a field as excluded from persistence.
pub const SKIPPED_FIELD: &str = "-";

/// Lifts a value into the explicitly-provided wrapper.
///
/// Optional record fields set through this helper reach the patch even when the
/// value is its type's zero value.
pub fn value<T>(v: T) -> Option<T> {
    Some(v)
}

/// The value side of a [`FieldDescriptor`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// An optional field holding nothing.
    Absent,
    /// An optional field holding a value; kept even when the value is zero.
    Provided(Bson),
    /// A plain field; dropped when `zero` is set.
    Value { value: Bson, zero: bool },
    /// An embedded record whose fields flatten into the parent.
    Record(Vec<FieldDescriptor>),
}

impl FieldValue {
    /// Serializes `value` as a plain field value.
    pub fn plain<T: Serialize + ?Sized>(value: &T, zero: bool) -> DocumentStoreResult<Self> {
        Ok(FieldValue::Value {
            value: serialize_to_bson(value)?,
            zero,
        })
    }

    /// Serializes `value` as a plain field value that is zero when it equals
    /// its type's `Default`.
    ///
    /// Used for `#[record(default)]` fields whose type has no [`PatchField`] impl.
    pub fn defaulted<T: Serialize + Default + PartialEq>(value: &T) -> DocumentStoreResult<Self> {
        Self::plain(value, value == &T::default())
    }

    /// Describes an embedded value for flattening.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidShape`] if the value is not record-shaped.
    pub fn embedded<P: PatchSource + ?Sized>(source: &P) -> DocumentStoreResult<Self> {
        Ok(match source.shape() {
            Shape::Absent => FieldValue::Absent,
            Shape::Record(record) => FieldValue::Record(record.describe()?),
            Shape::Document(doc) => FieldValue::Record(dynamic_fields(doc)),
            Shape::Invalid(kind) => return Err(DocumentStoreError::InvalidShape(kind)),
        })
    }
}

/// One declared field of a record, as seen by the differ.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Declared field name.
    pub name: Cow<'static, str>,
    /// Storage name override; `-` excludes the field.
    pub rename: Option<Cow<'static, str>>,
    /// Whether the field is externally visible.
    pub visible: bool,
    /// Whether the field's sub-fields flatten into the parent.
    pub inline: bool,
    pub value: FieldValue,
}

impl FieldDescriptor {
    /// A visible, non-inline field with no rename.
    pub fn new(name: impl Into<Cow<'static, str>>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            rename: None,
            visible: true,
            inline: false,
            value,
        }
    }

    pub fn renamed(mut self, rename: impl Into<Cow<'static, str>>) -> Self {
        self.rename = Some(rename.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    /// The name the field is stored under.
    pub fn storage_name(&self) -> &str {
        self.rename
            .as_deref()
            .unwrap_or(&self.name)
    }

    fn is_skipped(&self) -> bool {
        self.rename.as_deref() == Some(SKIPPED_FIELD)
    }
}

/// A record-shaped value that can describe its fields.
///
/// Implemented by `#[derive(Record)]`; implement it by hand to register a
/// descriptor for a type the derive cannot handle.
pub trait Record {
    fn describe(&self) -> DocumentStoreResult<Vec<FieldDescriptor>>;
}

/// How a patch source presents itself to the differ.
pub enum Shape<'a> {
    /// Nothing to diff; yields an empty patch.
    Absent,
    /// A typed record.
    Record(&'a dyn Record),
    /// An untyped document; every non-null entry is treated as provided.
    Document(&'a Document),
    /// Anything else, named for the error message.
    Invalid(String),
}

/// A value the differ accepts as input.
///
/// At most one optional level is unwrapped; `Some(Some(record))` is rejected.
pub trait PatchSource {
    #[doc(hidden)]
    const OPTIONAL: bool = false;

    fn shape(&self) -> Shape<'_>;
}

impl<T: PatchSource> PatchSource for Option<T> {
    const OPTIONAL: bool = true;

    fn shape(&self) -> Shape<'_> {
        match self {
            None => Shape::Absent,
            Some(_) if T::OPTIONAL => Shape::Invalid("a nested optional value".to_string()),
            Some(inner) => inner.shape(),
        }
    }
}

impl<T: PatchSource + ?Sized> PatchSource for &T {
    const OPTIONAL: bool = T::OPTIONAL;

    fn shape(&self) -> Shape<'_> {
        (**self).shape()
    }
}

impl<T: PatchSource + ?Sized> PatchSource for Box<T> {
    const OPTIONAL: bool = T::OPTIONAL;

    fn shape(&self) -> Shape<'_> {
        (**self).shape()
    }
}

impl PatchSource for Document {
    fn shape(&self) -> Shape<'_> {
        Shape::Document(self)
    }
}

impl PatchSource for Bson {
    fn shape(&self) -> Shape<'_> {
        match self {
            Bson::Null => Shape::Absent,
            Bson::Document(doc) => Shape::Document(doc),
            other => Shape::Invalid(format!("{:?}", other.element_type())),
        }
    }
}

fn dynamic_fields(doc: &Document) -> Vec<FieldDescriptor> {
    doc.iter()
        .map(|(key, value)| {
            FieldDescriptor::new(
                key.clone(),
                match value {
                    Bson::Null => FieldValue::Absent,
                    other => FieldValue::Provided(other.clone()),
                },
            )
        })
        .collect()
}

/// Builds the patch document for `source`.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidShape`] if `source` (after unwrapping one
/// optional level) or one of its inline fields is not record-shaped, and
/// [`DocumentStoreError::Serialization`] if a field value cannot be encoded.
pub fn partial_update<P: PatchSource + ?Sized>(source: &P) -> DocumentStoreResult<Document> {
    let mut patch = Document::new();

    match source.shape() {
        Shape::Absent => {}
        Shape::Record(record) => collect(record.describe()?, &mut patch)?,
        Shape::Document(doc) => collect(dynamic_fields(doc), &mut patch)?,
        Shape::Invalid(kind) => return Err(DocumentStoreError::InvalidShape(kind)),
    }

    Ok(patch)
}

fn collect(fields: Vec<FieldDescriptor>, patch: &mut Document) -> DocumentStoreResult<()> {
    for field in fields {
        if !field.visible || field.is_skipped() {
            continue;
        }

        if field.inline || matches!(field.value, FieldValue::Record(_)) {
            match field.value {
                FieldValue::Record(fields) => collect(fields, patch)?,
                FieldValue::Absent => {}
                _ => {
                    return Err(DocumentStoreError::InvalidShape(format!(
                        "a non-record value in inline field {}",
                        field.name
                    )));
                }
            }
            continue;
        }

        let name = field.storage_name().to_string();
        if name == IDENTITY_FIELD {
            continue;
        }

        match field.value {
            FieldValue::Provided(value) => {
                patch.insert(name, value);
            }
            FieldValue::Value { value, zero: false } => {
                patch.insert(name, value);
            }
            FieldValue::Absent | FieldValue::Value { zero: true, .. } | FieldValue::Record(_) => {}
        }
    }

    Ok(())
}

/// A field type the differ can inspect.
///
/// Plain types report whether they hold their zero value; `Option<T>` reports
/// absence or an explicitly provided value.
pub trait PatchField {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue>;
}

macro_rules! impl_patch_field_default {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PatchField for $ty {
                fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
                    FieldValue::plain(self, self == &<$ty as Default>::default())
                }
            }
        )*
    };
}

impl_patch_field_default!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    isize,
    usize,
    f32,
    f64,
    String,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
);

impl PatchField for str {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        FieldValue::plain(self, self.is_empty())
    }
}

impl PatchField for ObjectId {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        Ok(FieldValue::Value {
            value: Bson::ObjectId(*self),
            zero: self.bytes() == [0; 12],
        })
    }
}

impl PatchField for bson::DateTime {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        Ok(FieldValue::Value {
            value: Bson::DateTime(*self),
            zero: self.timestamp_millis() == 0,
        })
    }
}

impl PatchField for Bson {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        Ok(FieldValue::Value {
            value: self.clone(),
            zero: matches!(self, Bson::Null),
        })
    }
}

impl PatchField for Document {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        Ok(FieldValue::Value {
            value: Bson::Document(self.clone()),
            zero: self.is_empty(),
        })
    }
}

impl<T: Serialize> PatchField for Vec<T> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        FieldValue::plain(self, self.is_empty())
    }
}

impl<T: Serialize> PatchField for VecDeque<T> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        FieldValue::plain(self, self.is_empty())
    }
}

impl<T: Serialize> PatchField for HashSet<T> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        FieldValue::plain(self, self.is_empty())
    }
}

impl<T: Serialize> PatchField for BTreeSet<T> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        FieldValue::plain(self, self.is_empty())
    }
}

impl<V: Serialize> PatchField for HashMap<String, V> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        FieldValue::plain(self, self.is_empty())
    }
}

impl<V: Serialize> PatchField for BTreeMap<String, V> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        FieldValue::plain(self, self.is_empty())
    }
}

impl<T: PatchField + ?Sized> PatchField for Box<T> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        (**self).patch_value()
    }
}

impl<T: PatchField + ?Sized> PatchField for &T {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        (**self).patch_value()
    }
}

impl<T: PatchField> PatchField for Option<T> {
    fn patch_value(&self) -> DocumentStoreResult<FieldValue> {
        Ok(match self {
            None => FieldValue::Absent,
            Some(inner) => match inner.patch_value()? {
                FieldValue::Value { value, .. } | FieldValue::Provided(value) => FieldValue::Provided(value),
                FieldValue::Absent => FieldValue::Provided(Bson::Null),
                FieldValue::Record(fields) => FieldValue::Record(fields),
            },
        })
    }
}
