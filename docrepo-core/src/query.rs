//! Predicate, projection and query construction for repository operations.
//!
//! This module provides the fluent builders callers use to describe what to fetch,
//! the [`Query`] passed down to store backends, and a parsed expression tree with a
//! visitor for backends that evaluate predicates themselves.
//!
//! # Predicate Building
//!
//! ```ignore
//! use docrepo::query::{Filter, Projection};
//!
//! let adults = Filter::new()
//!     .greater_or_equal("age", 18)
//!     .equal("active", true)
//!     .build();
//! // { "age": { "$gte": 18 }, "active": true }
//!
//! let either = Filter::new()
//!     .or([Filter::new().eq("role", "admin"), Filter::new().eq("role", "owner")]);
//!
//! let names_only = Projection::select(["name"]);
//! ```
//!
//! Each comparator sets (and overwrites) the entry of its field: calling
//! `gt("age", 18)` then `lt("age", 65)` leaves only `{ "age": { "$lt": 65 } }`.
//! Combine conditions on one field with [`Filter::and`].

use bson::{Bson, Document, doc};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The numeric direction used by document stores (`1` or `-1`).
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort specification for one field.
///
/// A sort is an ordered list of these; earlier entries take precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self { field: field.into(), direction }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }

    /// Renders an ordered sort list as a sort document, preserving order.
    pub fn to_document(sorts: &[Sort]) -> Document {
        sorts
            .iter()
            .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_i32())))
            .collect()
    }
}

/// Fluent builder for predicate documents.
///
/// Every method records one entry keyed by field name (or `$and` / `$or`) and
/// returns the builder, so calls chain. A later call on the same key replaces the
/// earlier entry. [`Filter::build`] returns a snapshot of the accumulated mapping.
///
/// # Example
///
/// ```ignore
/// use docrepo::query::Filter;
///
/// let filter = Filter::new()
///     .gt("age", 18)
///     .member_of("status", ["active", "pending"])
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Filter {
    doc: Document,
}

impl Filter {
    /// Creates an empty predicate, which matches every document.
    pub fn new() -> Self {
        Self { doc: Document::new() }
    }

    fn set(mut self, field: impl Into<String>, value: Bson) -> Self {
        self.doc.insert(field.into(), value);
        self
    }

    fn set_op(self, field: impl Into<String>, op: &str, value: Bson) -> Self {
        self.set(field, Bson::Document(doc! { op: value }))
    }

    /// Implicit equality: `{field: value}`.
    pub fn equal(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set(field, value.into())
    }

    /// Short alias for [`Filter::equal`].
    pub fn eq(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.equal(field, value)
    }

    /// `{field: {$ne: value}}`
    pub fn not_equal(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set_op(field, "$ne", value.into())
    }

    /// Short alias for [`Filter::not_equal`].
    pub fn ne(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.not_equal(field, value)
    }

    /// `{field: {$gt: value}}`
    pub fn greater_than(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set_op(field, "$gt", value.into())
    }

    /// Short alias for [`Filter::greater_than`].
    pub fn gt(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.greater_than(field, value)
    }

    /// `{field: {$gte: value}}`
    pub fn greater_or_equal(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set_op(field, "$gte", value.into())
    }

    /// Short alias for [`Filter::greater_or_equal`].
    pub fn gte(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.greater_or_equal(field, value)
    }

    /// `{field: {$lt: value}}`
    pub fn less_than(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set_op(field, "$lt", value.into())
    }

    /// Short alias for [`Filter::less_than`].
    pub fn lt(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.less_than(field, value)
    }

    /// `{field: {$lte: value}}`
    pub fn less_or_equal(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set_op(field, "$lte", value.into())
    }

    /// Short alias for [`Filter::less_or_equal`].
    pub fn lte(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.less_or_equal(field, value)
    }

    /// Set membership: `{field: {$in: [values..]}}`.
    pub fn member_of<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values = values
            .into_iter()
            .map(Into::into)
            .collect::<Vec<Bson>>();

        self.set_op(field, "$in", Bson::Array(values))
    }

    /// Short alias for [`Filter::member_of`].
    pub fn in_values<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.member_of(field, values)
    }

    /// Stores the built sub-expressions, in order, under `$and`.
    pub fn and(self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.set("$and", Self::collect(filters))
    }

    /// Stores the built sub-expressions, in order, under `$or`.
    pub fn or(self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.set("$or", Self::collect(filters))
    }

    fn collect(filters: impl IntoIterator<Item = Filter>) -> Bson {
        Bson::Array(
            filters
                .into_iter()
                .map(|filter| Bson::Document(filter.doc))
                .collect(),
        )
    }

    /// Returns `true` if no entry has been recorded.
    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }

    /// Returns a snapshot of the predicate mapping.
    pub fn build(&self) -> Document {
        self.doc.clone()
    }
}

impl From<Filter> for Document {
    fn from(filter: Filter) -> Self {
        filter.doc
    }
}

/// Field selection applied to fetched documents.
///
/// A projection either includes the named fields (`1`) or excludes them (`0`).
/// Stores reject projections that mix both; this type never produces one.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    doc: Document,
}

impl Projection {
    fn with_flag<I, S>(fields: I, flag: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            doc: fields
                .into_iter()
                .map(|field| (field.into(), Bson::Int32(flag)))
                .collect(),
        }
    }

    /// Returns only the named fields (plus the identity, as stores do).
    pub fn select<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_flag(fields, 1)
    }

    /// Returns every field except the named ones.
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_flag(fields, 0)
    }

    /// Returns a snapshot of the projection mapping.
    pub fn build(&self) -> Document {
        self.doc.clone()
    }
}

/// A structured query handed to a store backend.
///
/// This struct carries the predicate, projection, sort order and window of a
/// fetch. Use [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Predicate document; empty matches everything.
    pub filter: Document,
    /// Optional field selection.
    pub projection: Option<Document>,
    /// Ordered sort specification.
    pub sort: Vec<Sort>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
}

impl Query {
    /// Creates a new query that matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the predicate document.
    pub fn filter(mut self, filter: impl Into<Document>) -> Self {
        self.query.filter = filter.into();
        self
    }

    /// Sets the projection document.
    pub fn projection(mut self, projection: Document) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Appends a sort key after any existing ones.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort::new(field, direction));
        self
    }

    /// Replaces the sort specification.
    pub fn sorts(mut self, sorts: Vec<Sort>) -> Self {
        self.query.sort = sorts;
        self
    }

    /// Sets the number of documents to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.query.skip = Some(skip);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Field comparison operators understood in predicate documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (`$eq`, or a bare literal).
    Eq,
    /// Not equal to (`$ne`).
    Ne,
    /// Greater than (`$gt`).
    Gt,
    /// Greater than or equal to (`$gte`).
    Gte,
    /// Less than (`$lt`).
    Lt,
    /// Less than or equal to (`$lte`).
    Lte,
    /// Member of a set of values (`$in`).
    In,
}

impl FieldOp {
    fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::In,
            _ => return None,
        })
    }
}

/// A predicate document parsed into a boolean expression tree.
///
/// Backends that cannot hand predicate documents to a server evaluate this tree
/// instead, typically through a [`QueryVisitor`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Field comparison expression.
    Field {
        /// The (possibly dotted) field path to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Parses a predicate document; the top level is an implicit AND.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Backend`] for operators outside the supported set.
    pub fn parse(filter: &Document) -> DocumentStoreResult<Expr> {
        Ok(Expr::And(
            filter
                .iter()
                .map(|(key, value)| Self::parse_entry(key, value))
                .collect::<DocumentStoreResult<Vec<_>>>()?,
        ))
    }

    fn parse_entry(key: &str, value: &Bson) -> DocumentStoreResult<Expr> {
        match key {
            "$and" => Ok(Expr::And(Self::parse_list(key, value)?)),
            "$or" => Ok(Expr::Or(Self::parse_list(key, value)?)),
            _ if key.starts_with('$') => Err(DocumentStoreError::Backend(format!(
                "unsupported top-level operator {key}"
            ))),
            _ => match value {
                Bson::Document(ops) if Self::is_operator_document(ops) => Ok(Expr::And(
                    ops.iter()
                        .map(|(op, operand)| {
                            FieldOp::from_operator(op)
                                .map(|op| Expr::Field {
                                    field: key.to_string(),
                                    op,
                                    value: operand.clone(),
                                })
                                .ok_or_else(|| {
                                    DocumentStoreError::Backend(format!("unsupported operator {op}"))
                                })
                        })
                        .collect::<DocumentStoreResult<Vec<_>>>()?,
                )),
                _ => Ok(Expr::Field {
                    field: key.to_string(),
                    op: FieldOp::Eq,
                    value: value.clone(),
                }),
            },
        }
    }

    fn parse_list(key: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
        match value {
            Bson::Array(items) => items
                .iter()
                .map(|item| match item {
                    Bson::Document(sub) => Self::parse(sub),
                    _ => Err(DocumentStoreError::Backend(format!(
                        "{key} expects an array of documents"
                    ))),
                })
                .collect(),
            _ => Err(DocumentStoreError::Backend(format!("{key} expects an array"))),
        }
    }

    fn is_operator_document(doc: &Document) -> bool {
        !doc.is_empty() && doc.keys().all(|key| key.starts_with('$'))
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparators_render_operator_documents() {
        let filter = Filter::new()
            .equal("name", "Ana")
            .not_equal("role", "guest")
            .greater_than("age", 18)
            .greater_or_equal("score", 10)
            .less_than("rank", 5)
            .less_or_equal("level", 3)
            .member_of("status", ["active", "pending"])
            .build();

        assert_eq!(
            filter,
            doc! {
                "name": "Ana",
                "role": { "$ne": "guest" },
                "age": { "$gt": 18 },
                "score": { "$gte": 10 },
                "rank": { "$lt": 5 },
                "level": { "$lte": 3 },
                "status": { "$in": ["active", "pending"] },
            }
        );
    }

    #[test]
    fn same_field_overwrites_instead_of_merging() {
        let filter = Filter::new()
            .gt("age", 18)
            .lt("age", 65)
            .build();

        assert_eq!(filter, doc! { "age": { "$lt": 65 } });
    }

    #[test]
    fn aliases_match_long_forms() {
        let short = Filter::new()
            .eq("a", 1)
            .ne("b", 2)
            .gt("c", 3)
            .gte("d", 4)
            .lt("e", 5)
            .lte("f", 6)
            .in_values("g", [7, 8])
            .build();
        let long = Filter::new()
            .equal("a", 1)
            .not_equal("b", 2)
            .greater_than("c", 3)
            .greater_or_equal("d", 4)
            .less_than("e", 5)
            .less_or_equal("f", 6)
            .member_of("g", [7, 8])
            .build();

        assert_eq!(short, long);
    }

    #[test]
    fn logical_operators_store_built_subexpressions_in_order() {
        let filter = Filter::new()
            .eq("active", true)
            .or([Filter::new().eq("role", "admin"), Filter::new().gt("age", 30)])
            .build();

        assert_eq!(
            filter,
            doc! {
                "active": true,
                "$or": [ { "role": "admin" }, { "age": { "$gt": 30 } } ],
            }
        );

        let replaced = Filter::new()
            .and([Filter::new().eq("a", 1)])
            .and(Vec::new())
            .build();
        assert_eq!(replaced, doc! { "$and": [] });
    }

    #[test]
    fn build_returns_a_snapshot() {
        let filter = Filter::new().eq("a", 1);
        let first = filter.build();
        let filter = filter.eq("b", 2);

        assert_eq!(first, doc! { "a": 1 });
        assert_eq!(filter.build(), doc! { "a": 1, "b": 2 });
    }

    #[test]
    fn projections_mark_inclusion_or_exclusion() {
        assert_eq!(Projection::select(["name", "age"]).build(), doc! { "name": 1, "age": 1 });
        assert_eq!(Projection::exclude(["secret"]).build(), doc! { "secret": 0 });
    }

    #[test]
    fn sort_document_preserves_order() {
        let sort = Sort::to_document(&[Sort::desc("created"), Sort::asc("name")]);
        let keys = sort.keys().cloned().collect::<Vec<_>>();

        assert_eq!(keys, vec!["created".to_string(), "name".to_string()]);
        assert_eq!(sort, doc! { "created": -1, "name": 1 });
    }

    #[test]
    fn parse_builds_expression_tree() {
        let expr = Expr::parse(&doc! {
            "name": "Ana",
            "age": { "$gte": 18, "$lt": 65 },
            "$or": [ { "role": "admin" } ],
        })
        .unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::Field { field: "name".into(), op: FieldOp::Eq, value: "Ana".into() },
                Expr::And(vec![
                    Expr::Field { field: "age".into(), op: FieldOp::Gte, value: 18.into() },
                    Expr::Field { field: "age".into(), op: FieldOp::Lt, value: 65.into() },
                ]),
                Expr::Or(vec![Expr::And(vec![Expr::Field {
                    field: "role".into(),
                    op: FieldOp::Eq,
                    value: "admin".into(),
                }])]),
            ])
        );
    }

    #[test]
    fn parse_treats_plain_subdocuments_as_literals() {
        let expr = Expr::parse(&doc! { "address": { "city": "Lisbon" } }).unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![Expr::Field {
                field: "address".into(),
                op: FieldOp::Eq,
                value: Bson::Document(doc! { "city": "Lisbon" }),
            }])
        );
    }

    #[test]
    fn parse_rejects_unknown_operators() {
        assert!(Expr::parse(&doc! { "age": { "$mod": [2, 0] } }).is_err());
        assert!(Expr::parse(&doc! { "$where": "true" }).is_err());
    }
}
