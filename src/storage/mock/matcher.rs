//! Filter, projection and update evaluation for the mock store.
//!
//! Covers the subset of the query language the persisters use.

use bson::{Bson, Document};

use crate::storage::{StoreError, StoreResult};

/// Does `document` satisfy `filter`?
pub(crate) fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(document, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(document, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(StoreError::Unsupported(format!("filter operator {}", op)));
            }
            field => matches_field(document.get(field), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Bson) -> StoreResult<Vec<&'a Document>> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(d) => Ok(d),
                _ => Err(StoreError::Unsupported(format!("{} expects documents", op))),
            })
            .collect(),
        _ => Err(StoreError::Unsupported(format!("{} expects an array", op))),
    }
}

fn is_operator_document(condition: &Bson) -> bool {
    match condition {
        Bson::Document(d) => d.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> StoreResult<bool> {
    if !is_operator_document(condition) {
        return Ok(equals(value, condition));
    }

    let Bson::Document(operators) = condition else {
        return Ok(false);
    };

    for (op, argument) in operators {
        let satisfied = match op.as_str() {
            "$eq" => equals(value, argument),
            "$ne" => !equals(value, argument),
            "$in" => match argument {
                Bson::Array(candidates) => candidates.iter().any(|c| equals(value, c)),
                _ => return Err(StoreError::Unsupported("$in expects an array".into())),
            },
            "$exists" => {
                let wanted = truthy(argument);
                value.is_some() == wanted
            }
            other => {
                return Err(StoreError::Unsupported(format!("field operator {}", other)));
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with the server's semantics for missing fields and arrays.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(actual) => {
            if values_equal(actual, expected) {
                return true;
            }
            match actual {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                _ => false,
            }
        }
    }
}

/// Value equality; numbers compare by value regardless of width.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

/// Apply an inclusion or exclusion projection.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let include_id = projection.get("_id").map(truthy).unwrap_or(true);
    let inclusions: Vec<&String> = projection
        .iter()
        .filter(|(field, value)| field.as_str() != "_id" && truthy(value))
        .map(|(field, _)| field)
        .collect();

    if inclusions.is_empty() {
        let mut projected = document.clone();
        for (field, value) in projection {
            if !truthy(value) {
                projected.remove(field);
            }
        }
        return projected;
    }

    let mut projected = Document::new();
    if include_id {
        if let Some(id) = document.get("_id") {
            projected.insert("_id", id.clone());
        }
    }
    for field in inclusions {
        if let Some(value) = document.get(field) {
            projected.insert(field.clone(), value.clone());
        }
    }
    projected
}

/// Apply `$set` to an existing document.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> StoreResult<()> {
    for (op, fields) in update {
        match op.as_str() {
            "$set" => set_fields(document, op, fields)?,
            "$setOnInsert" => {}
            other => {
                return Err(StoreError::Unsupported(format!("update operator {}", other)));
            }
        }
    }
    Ok(())
}

/// Build the document an upsert inserts: equality fields of the filter
/// followed by `$set` and `$setOnInsert` fields.
pub(crate) fn upsert_document(filter: &Document, update: &Document) -> StoreResult<Document> {
    let mut document = Document::new();
    for (field, condition) in filter {
        if field.starts_with('$') {
            continue;
        }
        match condition {
            Bson::Document(ops) if is_operator_document(condition) => {
                if let Some(value) = ops.get("$eq") {
                    document.insert(field.clone(), value.clone());
                }
            }
            value => {
                document.insert(field.clone(), value.clone());
            }
        }
    }
    apply_update(&mut document, update)?;
    if let Some(fields) = update.get("$setOnInsert") {
        set_fields(&mut document, "$setOnInsert", fields)?;
    }
    Ok(document)
}

fn set_fields(document: &mut Document, op: &str, fields: &Bson) -> StoreResult<()> {
    match fields {
        Bson::Document(fields) => {
            for (field, value) in fields {
                document.insert(field.clone(), value.clone());
            }
            Ok(())
        }
        _ => Err(StoreError::Unsupported(format!("{} expects a document", op))),
    }
}
