//! Filter matching, update application and projection over in-memory
//! documents.

use crate::dotted;
use crate::error::{LayerError, Result};
use crate::fields::is_truthy;
use crate::options::SortOrder;
use crate::types::{RawDocument, ID_FIELD};
use serde_json::Value;
use std::cmp::Ordering;

/// Equality with numeric normalization (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Rank used to order values of different types when sorting.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    compare(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn equals_or_contains(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn eval_operator(actual: Option<&Value>, op: &str, operand: &Value) -> Result<bool> {
    let ordered = |want: &[Ordering]| -> bool {
        actual
            .and_then(|a| compare(a, operand))
            .map(|o| want.contains(&o))
            .unwrap_or(false)
    };

    Ok(match op {
        "$eq" => equals_or_contains(actual, operand),
        "$ne" => !equals_or_contains(actual, operand),
        "$in" | "$nin" => {
            let candidates = operand.as_array().ok_or_else(|| {
                LayerError::InvalidArgument(format!("{} needs an array", op))
            })?;
            let found = candidates.iter().any(|c| equals_or_contains(actual, c));
            if op == "$in" {
                found
            } else {
                !found
            }
        }
        "$exists" => actual.is_some() == is_truthy(operand),
        "$gt" => ordered(&[Ordering::Greater]),
        "$gte" => ordered(&[Ordering::Greater, Ordering::Equal]),
        "$lt" => ordered(&[Ordering::Less]),
        "$lte" => ordered(&[Ordering::Less, Ordering::Equal]),
        other => {
            return Err(LayerError::InvalidArgument(format!(
                "unsupported query operator {}",
                other
            )))
        }
    })
}

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &RawDocument, filter: &RawDocument) -> Result<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" | "$or" => {
                let clauses = condition.as_array().ok_or_else(|| {
                    LayerError::InvalidArgument(format!("{} needs an array", key))
                })?;
                let mut results = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let clause = clause.as_object().ok_or_else(|| {
                        LayerError::InvalidArgument(format!("{} clauses must be documents", key))
                    })?;
                    results.push(matches(doc, clause)?);
                }
                if key == "$and" {
                    results.iter().all(|r| *r)
                } else {
                    results.iter().any(|r| *r)
                }
            }
            _ => {
                let actual = dotted::get(doc, key);
                if is_operator_document(condition) {
                    let mut all = true;
                    if let Value::Object(ops) = condition {
                        for (op, operand) in ops {
                            if !eval_operator(actual, op, operand)? {
                                all = false;
                                break;
                            }
                        }
                    }
                    all
                } else {
                    equals_or_contains(actual, condition)
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Apply an update document (`$set`, `$unset`, `$inc`, `$push`,
/// `$setOnInsert`) to `doc`.
pub fn apply_update(doc: &mut RawDocument, update: &RawDocument, inserting: bool) -> Result<()> {
    for (op, payload) in update {
        let payload = payload.as_object().ok_or_else(|| {
            LayerError::InvalidArgument(format!("{} needs a document, got {}", op, payload))
        })?;

        match op.as_str() {
            "$set" => {
                for (path, value) in payload {
                    dotted::set(doc, path, value.clone())?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in payload {
                        dotted::set(doc, path, value.clone())?;
                    }
                }
            }
            "$unset" => {
                for path in payload.keys() {
                    dotted::remove(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in payload {
                    let next = match (dotted::get(doc, path), delta) {
                        (None, d) => d.clone(),
                        (Some(Value::Number(cur)), Value::Number(d)) => {
                            match (cur.as_i64(), d.as_i64()) {
                                (Some(a), Some(b)) => Value::from(a + b),
                                _ => Value::from(
                                    cur.as_f64().unwrap_or(0.0) + d.as_f64().unwrap_or(0.0),
                                ),
                            }
                        }
                        (Some(other), _) => {
                            return Err(LayerError::InvalidArgument(format!(
                                "cannot $inc non-numeric value at {}: {}",
                                path, other
                            )))
                        }
                    };
                    dotted::set(doc, path, next)?;
                }
            }
            "$push" => {
                for (path, item) in payload {
                    let next = match dotted::get(doc, path) {
                        None => Value::Array(vec![item.clone()]),
                        Some(Value::Array(items)) => {
                            let mut items = items.clone();
                            items.push(item.clone());
                            Value::Array(items)
                        }
                        Some(other) => {
                            return Err(LayerError::InvalidArgument(format!(
                                "cannot $push to non-array value at {}: {}",
                                path, other
                            )))
                        }
                    };
                    dotted::set(doc, path, next)?;
                }
            }
            other if !other.starts_with('$') => {
                return Err(LayerError::InvalidArgument(
                    "update documents must only contain operators".into(),
                ))
            }
            other => {
                return Err(LayerError::InvalidArgument(format!(
                    "unsupported update operator {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Plain equality clauses of a filter, used to seed upserted documents.
pub fn upsert_seed(filter: &RawDocument) -> Result<RawDocument> {
    let mut seed = RawDocument::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        match condition {
            Value::Object(ops) if is_operator_document(condition) => {
                if let Some(eq) = ops.get("$eq") {
                    dotted::set(&mut seed, key, eq.clone())?;
                }
            }
            value => dotted::set(&mut seed, key, value.clone())?,
        }
    }
    Ok(seed)
}

/// Apply a projection document. Include mode when any non-`_id` flag is
/// truthy (or `_id` is the only flag and is truthy), exclude mode
/// otherwise. `_id` is kept unless explicitly excluded.
pub fn project(doc: &RawDocument, projection: &RawDocument) -> RawDocument {
    let include_mode = projection
        .iter()
        .any(|(k, v)| is_truthy(v) && (k != ID_FIELD || projection.len() == 1));
    let keep_id = projection.get(ID_FIELD).map(is_truthy).unwrap_or(true);

    if include_mode {
        let mut out = RawDocument::new();
        if keep_id {
            if let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD.into(), id.clone());
            }
        }
        for (path, flag) in projection {
            if path == ID_FIELD || !is_truthy(flag) {
                continue;
            }
            if let Some(value) = dotted::get(doc, path) {
                // Paths only traverse mappings, so this cannot fail.
                let _ = dotted::set(&mut out, path, value.clone());
            }
        }
        out
    } else {
        let mut out = doc.clone();
        for (path, flag) in projection {
            if !is_truthy(flag) {
                dotted::remove(&mut out, path);
            }
        }
        if !keep_id {
            out.remove(ID_FIELD);
        }
        out
    }
}

/// Sort documents in place.
pub fn sort_documents(docs: &mut [RawDocument], sort: &[(String, SortOrder)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, order) in sort {
            let ord = sort_cmp(dotted::get(a, path), dotted::get(b, path));
            let ord = match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> RawDocument {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_equality_and_nested_paths() {
        let d = doc(json!({"name": "x", "stats": {"n": 2}, "tags": ["a", "b"]}));
        assert!(matches(&d, &doc(json!({"name": "x"}))).unwrap());
        assert!(matches(&d, &doc(json!({"stats.n": 2.0}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": "b"}))).unwrap());
        assert!(!matches(&d, &doc(json!({"name": "y"}))).unwrap());
        assert!(matches(&d, &doc(json!({}))).unwrap());
    }

    #[test]
    fn test_operators() {
        let d = doc(json!({"_id": 3, "a": 5}));
        assert!(matches(&d, &doc(json!({"_id": {"$in": [1, 3]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"_id": {"$nin": [1, 2]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"a": {"$gt": 4, "$lte": 5}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"a": {"$lt": 5}}))).unwrap());
        assert!(matches(&d, &doc(json!({"b": {"$exists": false}}))).unwrap());
        assert!(matches(&d, &doc(json!({"a": {"$ne": 4}}))).unwrap());
        assert!(matches(&d, &doc(json!({"$or": [{"a": 1}, {"a": 5}]}))).unwrap());
        assert!(matches(&d, &doc(json!({"a": {"$regex": "x"}}))).is_err());
    }

    #[test]
    fn test_apply_update_operators() {
        let mut d = doc(json!({"a": {"b": 1, "c": 2}, "n": 1, "list": [1]}));
        apply_update(
            &mut d,
            &doc(json!({
                "$set": {"a.b": 30},
                "$inc": {"n": 2, "m": 1},
                "$push": {"list": 2},
                "$unset": {"a.c": ""}
            })),
            false,
        )
        .unwrap();
        assert_eq!(Value::Object(d), json!({"a": {"b": 30}, "n": 3, "list": [1, 2], "m": 1}));
    }

    #[test]
    fn test_update_requires_operators() {
        let mut d = RawDocument::new();
        assert!(apply_update(&mut d, &doc(json!({"a": 1})), false).is_err());
    }

    #[test]
    fn test_project_include_and_exclude() {
        let d = doc(json!({"_id": 1, "name": "x", "url": "u", "stats": {"n": 2, "m": 3}}));
        assert_eq!(
            project(&d, &doc(json!({"name": true, "_id": false}))),
            doc(json!({"name": "x"}))
        );
        assert_eq!(
            project(&d, &doc(json!({"stats.n": true}))),
            doc(json!({"_id": 1, "stats": {"n": 2}}))
        );
        assert_eq!(
            project(&d, &doc(json!({"stats": false, "url": 0}))),
            doc(json!({"_id": 1, "name": "x"}))
        );
        assert_eq!(project(&d, &doc(json!({"_id": 1}))), doc(json!({"_id": 1})));
    }

    #[test]
    fn test_upsert_seed() {
        let seed = upsert_seed(&doc(json!({"a": 1, "b": {"$gt": 2}, "c.d": {"$eq": 4}}))).unwrap();
        assert_eq!(Value::Object(seed), json!({"a": 1, "c": {"d": 4}}));
    }

    #[test]
    fn test_sort_documents() {
        let mut docs = vec![doc(json!({"a": 2})), doc(json!({"a": 1})), doc(json!({}))];
        sort_documents(&mut docs, &[("a".into(), SortOrder::Descending)]);
        assert_eq!(docs[0], doc(json!({"a": 2})));
        assert_eq!(docs[2], doc(json!({})));
    }
}
