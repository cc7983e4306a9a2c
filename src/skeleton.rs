//! Structure templates and skeleton generation.
//!
//! A [`Structure`] describes the expected shape of a collection's documents.
//! When a record is built, [`fill_skeleton`] adds every templated key that is
//! absent, using a default derived from the template entry. Existing keys are
//! never overwritten or removed.

use crate::types::RawDocument;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Scalar kinds a template can name. They all default to `null`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
    Date,
    Id,
    Any,
}

/// Factory producing a default value.
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// One template entry.
#[derive(Clone)]
pub enum Template {
    /// Nested structure; missing keys get an empty mapping, then recurse.
    Nested(Structure),
    /// Bare mapping marker.
    Map,
    /// Default produced by a factory.
    Factory(DefaultFactory),
    /// Bare list marker.
    List,
    /// List of items of the given template.
    ListOf(Box<Template>),
    /// Fixed-length tuple; defaults to a list of `null` of that length.
    Tuple(Vec<Template>),
    /// Scalar value.
    Scalar(ScalarKind),
}

impl Template {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Template::Factory(Arc::new(f))
    }

    /// Default value for a missing key.
    fn default_value(&self) -> Value {
        match self {
            Template::Nested(_) | Template::Map => Value::Object(RawDocument::new()),
            Template::Factory(f) => f(),
            Template::List | Template::ListOf(_) => Value::Array(Vec::new()),
            Template::Tuple(items) => Value::Array(vec![Value::Null; items.len()]),
            Template::Scalar(_) => Value::Null,
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::Nested(s) => f.debug_tuple("Nested").field(s).finish(),
            Template::Map => write!(f, "Map"),
            Template::Factory(_) => write!(f, "Factory(..)"),
            Template::List => write!(f, "List"),
            Template::ListOf(t) => f.debug_tuple("ListOf").field(t).finish(),
            Template::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Template::Scalar(k) => f.debug_tuple("Scalar").field(k).finish(),
        }
    }
}

/// Key of a structure entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateKey {
    /// A concrete field name.
    Field(String),
    /// Describes arbitrary keys of the named type. Never materialized.
    Typed(ScalarKind),
}

/// Nested template describing default field shapes.
#[derive(Clone, Debug, Default)]
pub struct Structure {
    entries: Vec<(TemplateKey, Template)>,
}

impl Structure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named field.
    pub fn field(mut self, name: impl Into<String>, template: Template) -> Self {
        self.entries.push((TemplateKey::Field(name.into()), template));
        self
    }

    /// Add a wildcard entry describing keys of type `kind`.
    pub fn typed(mut self, kind: ScalarKind, template: Template) -> Self {
        self.entries.push((TemplateKey::Typed(kind), template));
        self
    }

    /// Concrete top-level field names.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|(key, _)| match key {
            TemplateKey::Field(name) => Some(name.as_str()),
            TemplateKey::Typed(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Add every key described by `structure` that `doc` lacks.
pub fn fill_skeleton(doc: &mut RawDocument, structure: &Structure) {
    for (key, template) in &structure.entries {
        let name = match key {
            TemplateKey::Field(name) => name,
            TemplateKey::Typed(_) => continue,
        };

        if !doc.contains_key(name) {
            doc.insert(name.clone(), template.default_value());
        }

        if let Template::Nested(inner) = template {
            if let Some(Value::Object(child)) = doc.get_mut(name) {
                fill_skeleton(child, inner);
            }
        }
    }
}
