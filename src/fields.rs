//! Field sets and projection normalization.
//!
//! A [`FieldSet`] names the top-level fields of a record that are known to be
//! current. Projections passed to find-style calls are normalized here: the
//! `_id` field is never implicitly included, so the normalized projection
//! always carries an explicit `_id` flag.

use crate::types::{RawDocument, ID_FIELD};
use serde_json::Value;
use std::collections::BTreeSet;

/// Immutable, order-independent set of field names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldSet(BTreeSet<String>);

impl FieldSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// New set holding the names of both sets.
    pub fn union<I, S>(&self, names: I) -> FieldSet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut merged = self.0.clone();
        merged.extend(names.into_iter().map(Into::into));
        FieldSet(merged)
    }

    /// Names from `keys` that are not in this set, in input order.
    pub fn missing<'a>(&self, keys: &'a [String]) -> Vec<&'a String> {
        keys.iter().filter(|k| !self.0.contains(k.as_str())).collect()
    }
}

impl<S: Into<String>> FromIterator<S> for FieldSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        FieldSet(iter.into_iter().map(Into::into).collect())
    }
}

/// Which fields of a record are known to be fresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched {
    /// Unfiltered load, or record built from application data.
    All,
    /// Only these top-level fields were loaded.
    Only(FieldSet),
}

impl Fetched {
    pub fn is_all(&self) -> bool {
        matches!(self, Fetched::All)
    }

    /// Whether `name` is known to be fresh.
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Fetched::All => true,
            Fetched::Only(set) => set.contains(name),
        }
    }

    /// Record that `names` are now fresh. `All` stays `All`.
    pub fn merge<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Fetched::Only(set) = self {
            *set = set.union(names);
        }
    }

    pub fn field_set(&self) -> Option<&FieldSet> {
        match self {
            Fetched::All => None,
            Fetched::Only(set) => Some(set),
        }
    }
}

/// Projection argument to find-style calls.
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// Include exactly these names.
    Names(Vec<String>),
    /// Name -> include flag.
    Flags(Vec<(String, bool)>),
}

impl Projection {
    /// Projection including the given names.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Names(names.into_iter().map(Into::into).collect())
    }

    /// Store-facing projection document. `_id` is set to `false` unless the
    /// caller mentioned it.
    pub fn normalize(&self) -> RawDocument {
        let mut doc = RawDocument::new();
        match self {
            Projection::Names(names) => {
                for name in names {
                    doc.insert(name.clone(), Value::Bool(true));
                }
            }
            Projection::Flags(flags) => {
                for (name, include) in flags {
                    doc.insert(name.clone(), Value::Bool(*include));
                }
            }
        }
        doc.entry(ID_FIELD).or_insert(Value::Bool(false));
        doc
    }

    /// Names the projection asks for.
    pub fn requested(&self) -> FieldSet {
        match self {
            Projection::Names(names) => names.iter().cloned().collect(),
            Projection::Flags(flags) => flags
                .iter()
                .filter(|(_, include)| *include)
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    /// True when only `_id` is requested.
    pub fn is_id_only(&self) -> bool {
        let requested = self.requested();
        requested.len() == 1 && requested.contains(ID_FIELD)
    }
}

/// Fetch state for a record loaded with `projection`.
pub fn fetched_for(projection: Option<&Projection>) -> Fetched {
    match projection {
        None => Fetched::All,
        Some(p) => Fetched::Only(p.requested()),
    }
}

/// Truthiness of a flag value in a mapping projection.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl From<Vec<String>> for Projection {
    fn from(names: Vec<String>) -> Self {
        Projection::Names(names)
    }
}

impl From<Vec<&str>> for Projection {
    fn from(names: Vec<&str>) -> Self {
        Projection::names(names)
    }
}

impl From<&[&str]> for Projection {
    fn from(names: &[&str]) -> Self {
        Projection::names(names.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Projection {
    fn from(names: [&str; N]) -> Self {
        Projection::names(names)
    }
}

impl From<&FieldSet> for Projection {
    fn from(set: &FieldSet) -> Self {
        Projection::names(set.iter())
    }
}

impl From<RawDocument> for Projection {
    fn from(doc: RawDocument) -> Self {
        Projection::Flags(doc.into_iter().map(|(k, v)| (k, is_truthy(&v))).collect())
    }
}

impl From<Vec<(&str, bool)>> for Projection {
    fn from(flags: Vec<(&str, bool)>) -> Self {
        Projection::Flags(flags.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}
