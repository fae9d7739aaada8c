//! Predicate evaluation for in-memory document filtering.
//!
//! Predicate documents are parsed into an [`Expr`] tree and evaluated per
//! document. Field paths may be dotted (`address.city`) to reach into embedded
//! documents.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docrepo_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Comparable representation of BSON values.
///
/// Integers compare exactly with each other; mixed integer and double
/// comparisons go through f64, so `Int32(1)` equals `Double(1.0)`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Types without a defined comparison; never equal to anything.
    Opaque,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Int(i64::from(*value)),
            Bson::Int64(value) => Comparable::Int(*value),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr.iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>(),
            ),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            _ => Comparable::Opaque,
        }
    }
}

impl Comparable<'_> {
    // position of the value's type in the store's cross-type sort order
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Int(_) | Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
            Comparable::Opaque => 8,
        }
    }

    /// Total order used for sorting; values of different types order by type.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Int(a), Comparable::Int(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::Int(a), Comparable::Number(b)) | (Comparable::Number(b), Comparable::Int(a)) => *a as f64 == *b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Int(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Number(b)) => (*a as f64).partial_cmp(b),
            (Comparable::Number(a), Comparable::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a possibly dotted field path inside a document.
pub(crate) fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => document.get(path),
        Some((head, rest)) => match document.get(head)? {
            Bson::Document(inner) => lookup_path(inner, rest),
            _ => None,
        },
    }
}

pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Orders two possibly missing field values; a missing value sorts as null.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left
        .map(Comparable::from)
        .unwrap_or(Comparable::Null);
    let right = right
        .map(Comparable::from)
        .unwrap_or(Comparable::Null);

    left.sort_cmp(&right)
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Returns `true` if the document matches the predicate document.
    pub fn matches(document: &Document, filter: &Document) -> DocumentStoreResult<bool> {
        if filter.is_empty() {
            return Ok(true);
        }

        DocumentEvaluator::new(document).evaluate(&Expr::parse(filter)?)
    }

    fn equals(field_value: Option<&Bson>, value: &Bson) -> bool {
        let Some(field_value) = field_value else {
            // a missing field equals null
            return matches!(value, Bson::Null);
        };

        let expected = Comparable::from(value);
        match Comparable::from(field_value) {
            // array fields match when any element does
            Comparable::Array(items) if !matches!(value, Bson::Array(_)) => {
                items.iter().any(|item| item == &expected)
            }
            actual => actual == expected,
        }
    }

    fn orders(field_value: Option<&Bson>, value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
        let Some(field_value) = field_value else {
            return false;
        };

        let expected = Comparable::from(value);
        let accepts = |actual: &Comparable<'_>| {
            actual
                .partial_cmp(&expected)
                .is_some_and(&accept)
        };

        match Comparable::from(field_value) {
            Comparable::Array(items) if !matches!(value, Bson::Array(_)) => items.iter().any(accepts),
            actual => accepts(&actual),
        }
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = lookup_path(self.document, field);

        Ok(match op {
            FieldOp::Eq => Self::equals(field_value, value),
            FieldOp::Ne => !Self::equals(field_value, value),
            FieldOp::Gt => Self::orders(field_value, value, |o| o == Ordering::Greater),
            FieldOp::Gte => Self::orders(field_value, value, |o| o != Ordering::Less),
            FieldOp::Lt => Self::orders(field_value, value, |o| o == Ordering::Less),
            FieldOp::Lte => Self::orders(field_value, value, |o| o != Ordering::Greater),
            FieldOp::In => match value {
                Bson::Array(candidates) => candidates
                    .iter()
                    .any(|candidate| Self::equals(field_value, candidate)),
                _ => {
                    return Err(DocumentStoreError::Backend(format!(
                        "$in on {field} expects an array"
                    )));
                }
            },
        })
    }
}
