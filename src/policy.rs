//! Write policy enforcement: immutability and protected fields.
//!
//! Every mutating collection method runs its payload through a
//! [`WritePolicy`] before the store is called. Deletes are not guarded.

use crate::dotted;
use crate::error::{LayerError, Result};
use crate::types::{RawDocument, ID_FIELD};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

/// Update operators whose payload sets fields.
const SETTING_OPERATORS: [&str; 2] = ["$set", "$setOnInsert"];

/// Per-collection write restrictions.
#[derive(Clone, Debug, Default)]
pub struct WritePolicy {
    collection: String,
    immutable: bool,
    protected_fields: BTreeSet<String>,
}

impl WritePolicy {
    pub fn new(
        collection: impl Into<String>,
        immutable: bool,
        protected_fields: BTreeSet<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            immutable,
            protected_fields,
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn protected_fields(&self) -> &BTreeSet<String> {
        &self.protected_fields
    }

    /// Inserts create new documents, so only protected fields apply.
    pub fn check_insert(&self, document: &RawDocument, allow_protected: bool) -> Result<()> {
        self.check_protected(document.keys().map(String::as_str), allow_protected)
    }

    /// Full replacement of an existing document.
    pub fn check_replace(&self, replacement: &RawDocument, allow_protected: bool) -> Result<()> {
        self.check_mutable()?;
        self.check_protected(replacement.keys().map(String::as_str), allow_protected)
    }

    /// Partial update; only the setting operators are inspected for
    /// protected fields.
    pub fn check_update(&self, update: &RawDocument, allow_protected: bool) -> Result<()> {
        self.check_mutable()?;
        let set_keys: Vec<&str> = SETTING_OPERATORS
            .iter()
            .filter_map(|op| update.get(*op))
            .filter_map(Value::as_object)
            .flat_map(|payload| payload.keys().map(String::as_str))
            .collect();
        self.check_protected(set_keys.into_iter(), allow_protected)
    }

    /// Insert-or-replace by identifier. A document that already carries an
    /// `_id` would overwrite a stored one.
    pub fn check_save(&self, document: &RawDocument, allow_protected: bool) -> Result<()> {
        if document.contains_key(ID_FIELD) {
            self.check_mutable()?;
        }
        self.check_protected(document.keys().map(String::as_str), allow_protected)
    }

    fn check_mutable(&self) -> Result<()> {
        if self.immutable {
            warn!(target: "doclayer::policy", collection = %self.collection, "rejected write to immutable collection");
            return Err(LayerError::ImmutableViolation(self.collection.clone()));
        }
        Ok(())
    }

    fn check_protected<'a>(
        &self,
        keys: impl Iterator<Item = &'a str>,
        allow_protected: bool,
    ) -> Result<()> {
        if allow_protected || self.protected_fields.is_empty() {
            return Ok(());
        }

        let forbidden: Vec<String> = keys
            .filter(|k| self.protected_fields.contains(dotted::top_level(k)))
            .map(str::to_string)
            .collect();

        if forbidden.is_empty() {
            Ok(())
        } else {
            warn!(target: "doclayer::policy", collection = %self.collection, fields = ?forbidden, "rejected write to protected fields");
            Err(LayerError::ProtectedFieldViolation(forbidden))
        }
    }
}
