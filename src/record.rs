//! Records: documents bound to a collection, with fetch bookkeeping.
//!
//! A record loaded with a projection only knows the fields it asked for.
//! [`Record::ensure`] brings in missing fields with one targeted primary read,
//! and writes come in two flavors:
//!
//! - [`Record::save`] overwrites the whole remote document, which is only
//!   allowed for records built from application data (or when forced);
//! - [`Record::save_partial`] sends a `$set` of just the patched paths.

use crate::codec::{decode_subdocument, Subdocument};
use crate::collection::Collection;
use crate::dotted;
use crate::error::{LayerError, Result};
use crate::fields::{Fetched, Projection};
use crate::options::{SaveOptions, WriteOptions};
use crate::skeleton::fill_skeleton;
use crate::store::{DeleteResult, UpdateResult};
use crate::types::{DbRef, ObjectId, RawDocument, ID_FIELD};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// A document bound to its owning collection.
#[derive(Clone)]
pub struct Record {
    /// Field values, in store order.
    fields: RawDocument,

    /// Fields known to be current.
    fetched: Fetched,

    /// Built from a plain application mapping rather than a query.
    fully_loaded_as_input: bool,

    /// Owning collection.
    collection: Collection,
}

impl Record {
    /// Record built from application data. Fetch state is `All`.
    pub fn from_input(collection: Collection, fields: RawDocument, generate_skeleton: bool) -> Self {
        let mut record = Self {
            fields,
            fetched: Fetched::All,
            fully_loaded_as_input: true,
            collection,
        };
        if generate_skeleton {
            record.fill_skeleton();
        }
        record
    }

    /// Record built from a store reply.
    ///
    /// The skeleton is only applied to unfiltered loads: filling keys a
    /// projection left out would make them look fetched.
    pub fn from_store(collection: Collection, fields: RawDocument, fetched: Fetched) -> Self {
        let generate_skeleton = collection.generates_skeleton();
        Self::from_store_with(collection, fields, fetched, generate_skeleton)
    }

    /// Like [`Record::from_store`], with the skeleton switch given explicitly.
    pub fn from_store_with(
        collection: Collection,
        fields: RawDocument,
        fetched: Fetched,
        generate_skeleton: bool,
    ) -> Self {
        let mut record = Self {
            fields,
            fetched,
            fully_loaded_as_input: false,
            collection,
        };
        if generate_skeleton && record.fetched.is_all() {
            record.fill_skeleton();
        }
        record
    }

    fn fill_skeleton(&mut self) {
        if let Some(structure) = self.collection.structure() {
            fill_skeleton(&mut self.fields, structure);
        }
    }

    /// Value of a top-level field.
    ///
    /// For a field outside [`Record::fetched`] the result is unspecified: it
    /// may be absent or hold a value that no longer matches the store. Call
    /// [`Record::ensure`] first.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Value at a dotted path.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        dotted::get(&self.fields, path)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn extend(&mut self, other: RawDocument) {
        for (key, value) in other {
            self.fields.insert(key, value);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD)
    }

    /// Base64 form of an `ObjectId` identifier.
    pub fn b64id(&self) -> Option<String> {
        let hex = self.id()?.as_str()?;
        ObjectId::from_hex(hex).ok().map(|id| id.to_base64())
    }

    pub fn fetched(&self) -> &Fetched {
        &self.fetched
    }

    pub fn is_fully_loaded_as_input(&self) -> bool {
        self.fully_loaded_as_input
    }

    pub fn fields(&self) -> &RawDocument {
        &self.fields
    }

    pub fn into_fields(self) -> RawDocument {
        self.fields
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Reference marker stored under `key`, if any.
    pub fn reference(&self, key: &str) -> Option<DbRef> {
        match self.fields.get(key)? {
            Value::Object(sub) => match decode_subdocument(sub.clone()) {
                Subdocument::Reference(reference) => Some(reference),
                Subdocument::Document(_) => None,
            },
            _ => None,
        }
    }

    fn require_id(&self) -> Result<Value> {
        self.id().cloned().ok_or(LayerError::MissingIdentifier)
    }

    fn id_filter(id: Value) -> RawDocument {
        let mut filter = RawDocument::new();
        filter.insert(ID_FIELD.into(), id);
        filter
    }

    /// Make sure `keys` are current, fetching the missing ones.
    pub fn ensure<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<()> {
        self.ensure_with(keys, false)
    }

    /// Like [`Record::ensure`]; `force` refetches every key even if already
    /// fetched.
    pub fn ensure_with<S: AsRef<str>>(&mut self, keys: &[S], force: bool) -> Result<()> {
        if self.fully_loaded_as_input {
            return Ok(());
        }
        let fetched = match &self.fetched {
            Fetched::All => return Ok(()),
            Fetched::Only(set) => set,
        };

        let wanted: Vec<String> = keys
            .iter()
            .map(|k| k.as_ref())
            .filter(|k| force || !fetched.contains(k))
            .map(str::to_string)
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }

        self.require_id()?;
        self.refetch(&wanted)
    }

    /// Load `keys` from the primary and merge them in.
    ///
    /// Keys the store does not return are marked fetched but left untouched
    /// locally.
    pub fn refetch<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<()> {
        let id = self.require_id()?;
        let names: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();

        debug!(target: "doclayer::record", collection = %self.collection.name(), id = %id, fields = ?names, "refetching fields");

        let found = self.collection.read_primary(
            Self::id_filter(id),
            Some(Projection::names(names.iter().cloned())),
            Some(1),
        )?;

        self.fetched.merge(names);
        if let Some(record) = found.into_iter().next() {
            for (key, value) in record.into_fields() {
                self.fields.insert(key, value);
            }
        }
        Ok(())
    }

    /// Remove `keys` remotely with `$unset`, then locally.
    pub fn unset<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<UpdateResult> {
        let id = self.require_id()?;

        let mut paths = RawDocument::new();
        for key in keys {
            paths.insert(key.as_ref().to_string(), Value::String(String::new()));
        }
        let mut update = RawDocument::new();
        update.insert("$unset".into(), Value::Object(paths));

        let result = self
            .collection
            .update_one(&Self::id_filter(id), update, WriteOptions::default())?;

        for key in keys {
            dotted::remove(&mut self.fields, key.as_ref());
        }
        Ok(result)
    }

    /// Replace local content with the full stored document.
    pub fn reload(&mut self) -> Result<()> {
        let id = self.require_id()?;

        let found = self
            .collection
            .read_primary(Self::id_filter(id.clone()), None, Some(1))?;
        let record = found
            .into_iter()
            .next()
            .ok_or(LayerError::StaleReference(id))?;

        self.fields = record.into_fields();
        self.fetched = Fetched::All;
        self.fully_loaded_as_input = false;
        Ok(())
    }

    /// Overwrite the remote document with this record. Returns the id.
    ///
    /// Fails with [`LayerError::NotFullyLoaded`] unless the record was built
    /// from application data or `options.force` is set. Once saved, the
    /// record counts as loaded from the store, so a second plain save fails.
    pub fn save(&mut self, options: SaveOptions) -> Result<Value> {
        if !self.fully_loaded_as_input && !options.force {
            return Err(LayerError::NotFullyLoaded);
        }

        if options.uuid && !self.fields.contains_key(ID_FIELD) {
            let id = format!("{}-{}", self.collection.name(), uuid::Uuid::new_v4());
            self.fields.insert(ID_FIELD.into(), Value::String(id));
        }

        let write = WriteOptions {
            upsert: false,
            allow_protected_fields: options.allow_protected_fields,
        };
        let id = self.collection.save(&mut self.fields, write)?;
        self.fully_loaded_as_input = false;
        Ok(id)
    }

    /// `$set` the given paths (default: every field but `_id`), then apply
    /// them locally.
    pub fn save_partial(
        &mut self,
        patch: Option<RawDocument>,
        options: WriteOptions,
    ) -> Result<UpdateResult> {
        let id = self.require_id()?;

        let patch = match patch {
            Some(patch) => patch,
            None => {
                let mut all = self.fields.clone();
                all.remove(ID_FIELD);
                all
            }
        };
        if patch.is_empty() {
            return Ok(UpdateResult::default());
        }

        let mut update = RawDocument::new();
        update.insert("$set".into(), Value::Object(patch.clone()));
        let result = self
            .collection
            .update_one(&Self::id_filter(id), update, options)?;

        for (path, value) in patch {
            // A nested path only makes part of its parent current.
            if !path.contains('.') {
                self.fetched.merge([path.as_str()]);
            }
            dotted::set(&mut self.fields, &path, value)?;
        }
        self.fully_loaded_as_input = false;
        Ok(result)
    }

    /// Delete the stored document.
    pub fn delete(&self) -> Result<DeleteResult> {
        let id = self.require_id()?;
        self.collection.delete_one(&Self::id_filter(id))
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> Result<usize> {
        Ok(self.collection.codec().encode(&self.fields)?.len())
    }

    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("collection", &self.collection.name())
            .field("fields", &self.fields)
            .field("fetched", &self.fetched)
            .field("fully_loaded_as_input", &self.fully_loaded_as_input)
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields && self.collection.name() == other.collection.name()
    }
}
