//! Dotted-path access into nested documents (`"a.b.c"`).

use crate::error::{LayerError, Result};
use crate::types::RawDocument;
use serde_json::Value;

/// First segment of a dotted path.
pub fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Look up a dotted path.
pub fn get<'a>(doc: &'a RawDocument, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => match doc.get(head)? {
            Value::Object(inner) => get(inner, rest),
            _ => None,
        },
    }
}

pub fn contains(doc: &RawDocument, path: &str) -> bool {
    get(doc, path).is_some()
}

/// Set a dotted path, creating intermediate mappings as needed.
///
/// Fails when an intermediate segment holds a non-mapping value.
pub fn set(doc: &mut RawDocument, path: &str, value: Value) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let target = doc
                .entry(head)
                .or_insert_with(|| Value::Object(RawDocument::new()));
            match target {
                Value::Object(inner) => set(inner, rest, value),
                other => Err(LayerError::InvalidPath {
                    path: path.to_string(),
                    reason: format!("cannot set \"{}\" in \"{}\" ({})", rest, head, other),
                }),
            }
        }
    }
}

/// Remove a dotted path. Returns the removed value, if any.
pub fn remove(doc: &mut RawDocument, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Value::Object(inner) => remove(inner, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> RawDocument {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_get_nested() {
        let d = doc(json!({"a": {"b": {"c": 2}}, "x": 1}));
        assert_eq!(get(&d, "a.b.c"), Some(&json!(2)));
        assert_eq!(get(&d, "x"), Some(&json!(1)));
        assert_eq!(get(&d, "x.y"), None);
        assert_eq!(get(&d, "a.z"), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut d = RawDocument::new();
        set(&mut d, "life.stars.planets", json!(2)).unwrap();
        assert_eq!(Value::Object(d), json!({"life": {"stars": {"planets": 2}}}));
    }

    #[test]
    fn test_set_preserves_siblings() {
        let mut d = doc(json!({"p": {"normal": {"ok": 10, "date": "d"}}}));
        set(&mut d, "p.normal.ok", json!(30)).unwrap();
        assert_eq!(get(&d, "p.normal.ok"), Some(&json!(30)));
        assert_eq!(get(&d, "p.normal.date"), Some(&json!("d")));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut d = doc(json!({"a": 1}));
        let result = set(&mut d, "a.b", json!(2));
        assert!(matches!(result, Err(LayerError::InvalidPath { .. })));
    }

    #[test]
    fn test_remove_nested() {
        let mut d = doc(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove(&mut d, "a.b"), Some(json!(1)));
        assert_eq!(Value::Object(d), json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_top_level() {
        assert_eq!(top_level("a.b.c"), "a");
        assert_eq!(top_level("a"), "a");
    }
}
