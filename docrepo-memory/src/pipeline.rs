//! Aggregation pipeline execution over in-memory collections.
//!
//! Supported stages: `$match` (including `$expr`), `$lookup` (both the
//! `localField`/`foreignField` form and the `let`/`pipeline` form), `$project`,
//! `$skip` and `$limit`. Inside `$expr`, `$eq`, `$ne`, `$and` and `$or` are
//! understood; operands are `"$field"` paths, `"$$variable"` references or
//! literals.

use bson::{Bson, Document};

use docrepo_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::{
    evaluator::{DocumentEvaluator, lookup_path, values_equal},
    store::{StoreMap, apply_projection},
};

/// Runs `pipeline` over `input`, resolving `$lookup` sources from `store`.
pub(crate) fn run(
    pipeline: &[Document],
    input: Vec<Document>,
    store: &StoreMap,
    variables: &Document,
) -> DocumentStoreResult<Vec<Document>> {
    pipeline
        .iter()
        .try_fold(input, |documents, stage| run_stage(stage, documents, store, variables))
}

fn run_stage(
    stage: &Document,
    documents: Vec<Document>,
    store: &StoreMap,
    variables: &Document,
) -> DocumentStoreResult<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, options)), None) = (entries.next(), entries.next()) else {
        return Err(DocumentStoreError::Backend(
            "pipeline stage must have exactly one operator".to_string(),
        ));
    };

    match (name.as_str(), options) {
        ("$match", Bson::Document(filter)) => match_stage(filter, documents, variables),
        ("$lookup", Bson::Document(options)) => lookup_stage(options, documents, store, variables),
        ("$project", Bson::Document(projection)) => documents
            .into_iter()
            .map(|document| apply_projection(document, projection))
            .collect(),
        ("$skip", count) => Ok(documents
            .into_iter()
            .skip(stage_count(name, count)?)
            .collect()),
        ("$limit", count) => Ok(documents
            .into_iter()
            .take(stage_count(name, count)?)
            .collect()),
        (name, _) => Err(DocumentStoreError::Backend(format!(
            "unsupported pipeline stage {name}"
        ))),
    }
}

fn stage_count(name: &str, count: &Bson) -> DocumentStoreResult<usize> {
    let count = match count {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        _ => -1,
    };

    usize::try_from(count)
        .map_err(|_| DocumentStoreError::Backend(format!("{name} expects a non-negative integer")))
}

fn match_stage(filter: &Document, documents: Vec<Document>, variables: &Document) -> DocumentStoreResult<Vec<Document>> {
    let mut fields = filter.clone();
    let expr = fields.remove("$expr");

    let mut matched = Vec::new();
    for document in documents {
        if !DocumentEvaluator::matches(&document, &fields)? {
            continue;
        }
        if let Some(expr) = &expr
            && !truthy(&evaluate_expr(expr, &document, variables)?)
        {
            continue;
        }
        matched.push(document);
    }

    Ok(matched)
}

fn truthy(value: &Bson) -> bool {
    !matches!(value, Bson::Null | Bson::Undefined | Bson::Boolean(false))
}

fn operand_pair<'a>(operator: &str, args: &'a Bson) -> DocumentStoreResult<(&'a Bson, &'a Bson)> {
    match args {
        Bson::Array(items) if items.len() == 2 => Ok((&items[0], &items[1])),
        _ => Err(DocumentStoreError::Backend(format!(
            "{operator} expects an array of two operands"
        ))),
    }
}

fn evaluate_expr(expr: &Bson, document: &Document, variables: &Document) -> DocumentStoreResult<Bson> {
    match expr {
        Bson::String(path) if path.starts_with("$$") => Ok(lookup_path(variables, &path[2..])
            .cloned()
            .unwrap_or(Bson::Null)),
        Bson::String(path) if path.starts_with('$') => Ok(lookup_path(document, &path[1..])
            .cloned()
            .unwrap_or(Bson::Null)),
        Bson::Document(operation) if operation.len() == 1 && operation.keys().all(|key| key.starts_with('$')) => {
            let Some((operator, args)) = operation.iter().next() else {
                return Ok(Bson::Null);
            };

            match operator.as_str() {
                "$eq" | "$ne" => {
                    let (left, right) = operand_pair(operator, args)?;
                    let equal = values_equal(
                        &evaluate_expr(left, document, variables)?,
                        &evaluate_expr(right, document, variables)?,
                    );
                    Ok(Bson::Boolean(equal == (operator == "$eq")))
                }
                "$and" | "$or" => {
                    let Bson::Array(items) = args else {
                        return Err(DocumentStoreError::Backend(format!("{operator} expects an array")));
                    };
                    let mut results = Vec::with_capacity(items.len());
                    for item in items {
                        results.push(truthy(&evaluate_expr(item, document, variables)?));
                    }
                    Ok(Bson::Boolean(if operator == "$and" {
                        results.into_iter().all(|r| r)
                    } else {
                        results.into_iter().any(|r| r)
                    }))
                }
                other => Err(DocumentStoreError::Backend(format!(
                    "unsupported expression operator {other}"
                ))),
            }
        }
        literal => Ok(literal.clone()),
    }
}

fn string_field<'a>(options: &'a Document, key: &str) -> DocumentStoreResult<&'a str> {
    match options.get(key) {
        Some(Bson::String(value)) => Ok(value),
        _ => Err(DocumentStoreError::Backend(format!("$lookup requires a string {key}"))),
    }
}

fn lookup_stage(
    options: &Document,
    documents: Vec<Document>,
    store: &StoreMap,
    variables: &Document,
) -> DocumentStoreResult<Vec<Document>> {
    let from = string_field(options, "from")?;
    let as_field = string_field(options, "as")?;
    let foreign = store
        .get(from)
        .map(Vec::as_slice)
        .unwrap_or_default();

    documents
        .into_iter()
        .map(|mut document| {
            let linked = match (options.get("localField"), options.get("foreignField")) {
                (Some(Bson::String(local)), Some(Bson::String(foreign_field))) => {
                    let value = lookup_path(&document, local)
                        .cloned()
                        .unwrap_or(Bson::Null);

                    foreign
                        .iter()
                        .filter(|candidate| {
                            values_equal(
                                lookup_path(candidate, foreign_field).unwrap_or(&Bson::Null),
                                &value,
                            )
                        })
                        .cloned()
                        .collect::<Vec<_>>()
                }
                _ => {
                    let mut scope = variables.clone();
                    if let Some(Bson::Document(bindings)) = options.get("let") {
                        for (name, binding) in bindings {
                            scope.insert(name.clone(), evaluate_expr(binding, &document, variables)?);
                        }
                    }

                    let inner = match options.get("pipeline") {
                        Some(Bson::Array(stages)) => stages
                            .iter()
                            .map(|stage| match stage {
                                Bson::Document(stage) => Ok(stage.clone()),
                                _ => Err(DocumentStoreError::Backend(
                                    "$lookup pipeline stages must be documents".to_string(),
                                )),
                            })
                            .collect::<DocumentStoreResult<Vec<_>>>()?,
                        None => Vec::new(),
                        Some(_) => {
                            return Err(DocumentStoreError::Backend(
                                "$lookup pipeline must be an array".to_string(),
                            ));
                        }
                    };

                    run(&inner, foreign.to_vec(), store, &scope)?
                }
            };

            document.insert(
                as_field,
                linked
                    .into_iter()
                    .map(Bson::Document)
                    .collect::<Vec<_>>(),
            );

            Ok(document)
        })
        .collect()
}
