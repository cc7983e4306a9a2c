//! Collection client: reads that produce records, and guarded, hooked writes.
//!
//! Every mutating call follows the same pipeline:
//!
//! 1. the write policy checks the payload (no store call on rejection);
//! 2. if hooks of the event family are registered, the affected identifiers
//!    (or, for deletes, full documents) are captured from the primary;
//! 3. the before-hook runs on the captured records;
//! 4. the store primitive runs;
//! 5. the after-hook runs on the captured records, or on the upserted one.
//!
//! Nothing in the pipeline retries, and after-hook failures do not undo the
//! write.

use crate::codec::{decode_with_context, Codec, DecodeContext};
use crate::error::{LayerError, Result};
use crate::fields::{fetched_for, Fetched, Projection};
use crate::hooks::{HookEvent, HookRegistry, HookTargets, Payload};
use crate::options::{FindOptions, NormalizedRead, ReadArgs, ReadPreference, SortOrder, WriteOptions};
use crate::policy::WritePolicy;
use crate::record::Record;
use crate::skeleton::Structure;
use crate::store::{
    BulkWriteResult, DeleteResult, DocumentStore, InsertManyResult, InsertOneResult,
    UpdateResult, WriteModel,
};
use crate::types::{coerce_id, ObjectId, RawDocument, ID_FIELD};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Collection definition.
#[derive(Clone, Debug)]
pub struct CollectionConfig {
    /// Collection name. Empty means "use the store's name".
    pub name: String,

    /// Template used to fill defaults into new and fully loaded records.
    pub structure: Option<Structure>,

    /// Reject every replace/update, and saves of documents with an `_id`.
    pub immutable: bool,

    /// Fields that may only be set with `allow_protected_fields`.
    pub protected_fields: BTreeSet<String>,

    /// Apply the structure when records are built.
    pub generate_skeleton: bool,

    /// Routing for reads that don't pick one explicitly.
    pub read_preference: ReadPreference,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            structure: None,
            immutable: false,
            protected_fields: BTreeSet::new(),
            generate_skeleton: true,
            read_preference: ReadPreference::Primary,
        }
    }
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_structure(mut self, structure: Structure) -> Self {
        self.structure = Some(structure);
        self
    }

    pub fn with_immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }

    pub fn with_protected_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_generate_skeleton(mut self, generate: bool) -> Self {
        self.generate_skeleton = generate;
        self
    }

    pub fn with_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = read_preference;
        self
    }
}

struct CollectionInner {
    name: String,
    config: CollectionConfig,
    policy: WritePolicy,
    hooks: HookRegistry,
    store: Arc<dyn DocumentStore>,
    codec: Arc<dyn Codec>,
}

/// Handle to one collection. Cheap to clone; clones share configuration,
/// hooks and store.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

fn id_filter(id: Value) -> RawDocument {
    let mut filter = RawDocument::new();
    filter.insert(ID_FIELD.into(), id);
    filter
}

fn ids_filter(ids: Vec<Value>) -> RawDocument {
    let mut condition = RawDocument::new();
    condition.insert("$in".into(), Value::Array(ids));
    id_filter(Value::Object(condition))
}

/// Give `document` an `_id` if it has none. Returns the identifier.
fn assign_id(document: &mut RawDocument) -> Value {
    if let Some(id) = document.get(ID_FIELD) {
        return id.clone();
    }
    let id = ObjectId::new().to_value();
    let mut with_id = RawDocument::new();
    with_id.insert(ID_FIELD.into(), id.clone());
    with_id.extend(std::mem::take(document));
    *document = with_id;
    id
}

fn is_operator_document(value: &RawDocument) -> bool {
    !value.is_empty() && value.keys().all(|k| k.starts_with('$'))
}

impl Collection {
    /// Collection without hooks.
    pub fn new(store: Arc<dyn DocumentStore>, config: CollectionConfig) -> Self {
        Self::with_hooks(store, config, HookRegistry::default())
    }

    pub fn with_hooks(
        store: Arc<dyn DocumentStore>,
        config: CollectionConfig,
        hooks: HookRegistry,
    ) -> Self {
        let name = if config.name.is_empty() {
            store.name().to_string()
        } else {
            config.name.clone()
        };
        let policy = WritePolicy::new(
            name.clone(),
            config.immutable,
            config.protected_fields.clone(),
        );
        let codec = store.codec();

        Self {
            inner: Arc::new(CollectionInner {
                name,
                config,
                policy,
                hooks,
                store,
                codec,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.inner.config
    }

    pub fn structure(&self) -> Option<&Structure> {
        self.inner.config.structure.as_ref()
    }

    pub fn generates_skeleton(&self) -> bool {
        self.inner.config.generate_skeleton
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.inner.policy
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.inner.codec
    }

    /// Build a record from application data.
    pub fn record(&self, fields: RawDocument) -> Record {
        Record::from_input(self.clone(), fields, self.generates_skeleton())
    }

    /// Build a record from application data, choosing whether to fill the
    /// skeleton.
    pub fn record_with(&self, fields: RawDocument, generate_skeleton: bool) -> Record {
        Record::from_input(self.clone(), fields, generate_skeleton)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    fn resolve(&self, args: ReadArgs) -> Result<NormalizedRead> {
        let mut read = args.normalize()?;
        if read.read_preference.is_none() {
            read.options.read_preference = self.inner.config.read_preference.clone();
        }
        Ok(read)
    }

    fn run_find(
        &self,
        filter: &RawDocument,
        options: &FindOptions,
        context: DecodeContext,
    ) -> Result<Vec<Record>> {
        let bytes = self.inner.store.find(filter, options)?;
        let replies = decode_with_context(self.inner.codec.as_ref(), &bytes, &context)?;
        Ok(replies.into_iter().flat_map(|reply| reply.batch).collect())
    }

    /// Read from the primary, bypassing the configured read preference.
    ///
    /// Documents come back exactly as stored, without skeleton defaults.
    pub(crate) fn read_primary(
        &self,
        filter: RawDocument,
        projection: Option<Projection>,
        limit: Option<u64>,
    ) -> Result<Vec<Record>> {
        let options = FindOptions {
            projection: projection.as_ref().map(Projection::normalize),
            limit,
            ..FindOptions::primary()
        };
        let context = DecodeContext::new(self.clone(), fetched_for(projection.as_ref()));
        self.run_find(&filter, &options, context.without_skeleton())
    }

    /// First document matching `filter` in `sort` order, read from the primary.
    fn pre_image(&self, filter: &RawDocument, sort: &[(String, SortOrder)]) -> Result<Vec<Record>> {
        let options = FindOptions {
            sort: sort.to_vec(),
            limit: Some(1),
            ..FindOptions::primary()
        };
        let context = DecodeContext::new(self.clone(), Fetched::All);
        self.run_find(filter, &options, context.without_skeleton())
    }

    /// Identifiers currently matching `filter`, read from the primary.
    fn snapshot_ids(
        &self,
        filter: &RawDocument,
        sort: &[(String, SortOrder)],
        limit: Option<u64>,
    ) -> Result<Vec<Value>> {
        let projection = Projection::names([ID_FIELD]);
        let options = FindOptions {
            projection: Some(projection.normalize()),
            sort: sort.to_vec(),
            limit,
            ..FindOptions::primary()
        };
        let context = DecodeContext::new(self.clone(), fetched_for(Some(&projection)));
        let records = self.run_find(filter, &options, context)?;
        Ok(records.iter().filter_map(|r| r.id().cloned()).collect())
    }

    /// Records matching the query.
    pub fn find(&self, args: impl Into<ReadArgs>) -> Result<Vec<Record>> {
        let read = self.resolve(args.into())?;
        debug!(target: "doclayer::collection", collection = %self.name(), filter = ?read.filter, "find");
        let context = DecodeContext::new(self.clone(), read.fetched);
        self.run_find(&read.filter, &read.options, context)
    }

    pub fn find_one(&self, args: impl Into<ReadArgs>) -> Result<Option<Record>> {
        let mut args = args.into();
        args.limit = Some(1);
        Ok(self.find(args)?.into_iter().next())
    }

    /// Accepts a bare identifier or a `{"_id": id}` mapping.
    pub fn find_by_id(&self, id: &Value, args: ReadArgs) -> Result<Option<Record>> {
        let mut args = args;
        args.filter = Some(id_filter(coerce_id(id)));
        args.spec = None;
        self.find_one(args)
    }

    /// `_id: {$in: ids}` query.
    ///
    /// With an `_id`-only projection no query is sent: one record per
    /// identifier is built directly, whether or not it exists.
    pub fn find_by_ids(&self, ids: &[Value], args: ReadArgs) -> Result<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Value> = ids.iter().map(coerce_id).collect();

        let id_only = args
            .fields
            .as_ref()
            .or(args.projection.as_ref())
            .map(Projection::is_id_only)
            .unwrap_or(false);
        if id_only {
            let fetched = Fetched::Only([ID_FIELD].into_iter().collect());
            return Ok(ids
                .into_iter()
                .map(|id| Record::from_store(self.clone(), id_filter(id), fetched.clone()))
                .collect());
        }

        let mut args = args;
        args.filter = Some(ids_filter(ids));
        args.spec = None;
        self.find(args)
    }

    pub fn find_by_b64id(&self, encoded: &str, args: ReadArgs) -> Result<Option<Record>> {
        let id = Self::decode_b64id(encoded)?;
        self.find_by_id(&id, args)
    }

    pub fn find_by_b64ids(&self, encoded: &[&str], args: ReadArgs) -> Result<Vec<Record>> {
        let ids = encoded
            .iter()
            .map(|e| Self::decode_b64id(e))
            .collect::<Result<Vec<_>>>()?;
        self.find_by_ids(&ids, args)
    }

    fn decode_b64id(encoded: &str) -> Result<Value> {
        ObjectId::from_base64(encoded)
            .map(|id| id.to_value())
            .ok_or_else(|| LayerError::InvalidArgument(format!("not a base64 object id: {}", encoded)))
    }

    /// Whether at least one document matches.
    pub fn exists(&self, filter: RawDocument) -> Result<bool> {
        let options = FindOptions {
            limit: Some(1),
            read_preference: self.inner.config.read_preference.clone(),
            ..Default::default()
        };
        Ok(self.inner.store.count(&filter, &options)? > 0)
    }

    pub fn count(&self, args: impl Into<ReadArgs>) -> Result<u64> {
        let read = self.resolve(args.into())?;
        self.inner.store.count(&read.filter, &read.options)
    }

    pub fn distinct(&self, key: &str, filter: RawDocument) -> Result<Vec<Value>> {
        self.inner.store.distinct(key, &filter)
    }

    /// At most one matching record.
    pub fn one(&self, args: impl Into<ReadArgs>) -> Result<Option<Record>> {
        Self::at_most_one(self.find(args)?)
    }

    fn at_most_one(mut found: Vec<Record>) -> Result<Option<Record>> {
        match found.len() {
            0 | 1 => Ok(found.pop()),
            n => Err(LayerError::MultipleResultsFound(n as u64)),
        }
    }

    /// Records that have every top-level field of the structure.
    pub fn fetch(&self, args: impl Into<ReadArgs>) -> Result<Vec<Record>> {
        let mut args = args.into();
        if let Some(structure) = self.structure() {
            let filter = if args.filter.is_some() || args.spec.is_none() {
                args.filter.get_or_insert_with(RawDocument::new)
            } else {
                args.spec.get_or_insert_with(RawDocument::new)
            };
            for name in structure.field_names() {
                match filter.get_mut(name) {
                    Some(Value::Object(ops)) if is_operator_document(ops) => {
                        ops.insert("$exists".into(), Value::Bool(true));
                    }
                    Some(_) => {}
                    None => {
                        let mut exists = RawDocument::new();
                        exists.insert("$exists".into(), Value::Bool(true));
                        filter.insert(name.to_string(), Value::Object(exists));
                    }
                }
            }
        }
        self.find(args)
    }

    /// Like [`Collection::fetch`], expecting at most one record.
    pub fn fetch_one(&self, args: impl Into<ReadArgs>) -> Result<Option<Record>> {
        Self::at_most_one(self.fetch(args)?)
    }

    /// Values of one (dotted) field across matching documents.
    ///
    /// Yields [`LayerError::MissingField`] for documents lacking it.
    pub fn iter_column(
        &self,
        args: impl Into<ReadArgs>,
        field: &str,
    ) -> Result<impl Iterator<Item = Result<Value>>> {
        let mut args = args.into();
        args.fields = Some(Projection::names([field]));
        args.projection = None;
        let records = self.find(args)?;

        let field = field.to_string();
        Ok(records.into_iter().map(move |record| {
            record
                .get_path(&field)
                .cloned()
                .ok_or_else(|| LayerError::MissingField(field.clone()))
        }))
    }

    pub fn list_column(&self, args: impl Into<ReadArgs>, field: &str) -> Result<Vec<Value>> {
        self.iter_column(args, field)?.collect()
    }

    // ---------------------------------------------------------------------
    // Hooks
    // ---------------------------------------------------------------------

    pub fn has_trigger(&self, event: HookEvent) -> bool {
        self.inner.hooks.has(event)
    }

    /// Resolve `targets` and run the `event` hook on each record.
    ///
    /// Returns the records the hook saw. When no hook is registered for
    /// `event` nothing is queried: explicit records come back untouched and
    /// identifier or filter targets yield nothing.
    pub fn trigger(
        &self,
        event: HookEvent,
        targets: HookTargets,
        payload: &Payload,
    ) -> Result<Vec<Record>> {
        if !self.has_trigger(event) {
            return Ok(match targets {
                HookTargets::Records(records) => records,
                HookTargets::Ids(_) | HookTargets::Filter(_) => Vec::new(),
            });
        }

        let mut records = match targets {
            HookTargets::Records(records) => records,
            HookTargets::Ids(ids) if ids.is_empty() => Vec::new(),
            HookTargets::Ids(ids) => self.read_primary(ids_filter(ids), None, None)?,
            HookTargets::Filter(filter) => self.read_primary(filter, None, None)?,
        };

        self.inner.hooks.dispatch(event, &mut records, payload)?;
        Ok(records)
    }

    fn save_payload(&self, build: impl FnOnce() -> Payload) -> Payload {
        if self.inner.hooks.has_save_hooks() {
            build()
        } else {
            Payload::None
        }
    }

    /// After-save rule for replace/update: upserted id if any, else the
    /// snapshot when something was modified, else nothing.
    fn after_update(&self, result: &UpdateResult, before_ids: Vec<Value>, payload: &Payload) -> Result<()> {
        let ids = match &result.upserted_id {
            Some(id) => vec![id.clone()],
            None if result.modified_count > 0 => before_ids,
            None => return Ok(()),
        };
        self.trigger(HookEvent::AfterSave, HookTargets::Ids(ids), payload)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    pub fn insert_one(&self, document: RawDocument, options: WriteOptions) -> Result<InsertOneResult> {
        self.inner
            .policy
            .check_insert(&document, options.allow_protected_fields)?;

        let mut document = document;
        assign_id(&mut document);
        let payload = self.save_payload(|| Payload::Replacement(document.clone()));

        debug!(target: "doclayer::collection", collection = %self.name(), "insert_one");
        let result = self.inner.store.insert_one(document)?;

        self.trigger(
            HookEvent::AfterSave,
            HookTargets::Ids(vec![result.inserted_id.clone()]),
            &payload,
        )?;
        Ok(result)
    }

    pub fn insert_many(
        &self,
        documents: Vec<RawDocument>,
        options: WriteOptions,
    ) -> Result<InsertManyResult> {
        for document in &documents {
            self.inner
                .policy
                .check_insert(document, options.allow_protected_fields)?;
        }

        let mut documents = documents;
        for document in documents.iter_mut() {
            assign_id(document);
        }
        let payload = self.save_payload(|| Payload::Replacements(documents.clone()));

        debug!(target: "doclayer::collection", collection = %self.name(), count = documents.len(), "insert_many");
        let result = self.inner.store.insert_many(documents)?;

        self.trigger(
            HookEvent::AfterSave,
            HookTargets::Ids(result.inserted_ids.clone()),
            &payload,
        )?;
        Ok(result)
    }

    pub fn replace_one(
        &self,
        filter: &RawDocument,
        replacement: RawDocument,
        options: WriteOptions,
    ) -> Result<UpdateResult> {
        self.inner
            .policy
            .check_replace(&replacement, options.allow_protected_fields)?;

        let hooked = self.inner.hooks.has_save_hooks();
        let before_ids = if hooked {
            self.snapshot_ids(filter, &[], Some(1))?
        } else {
            Vec::new()
        };
        let payload = self.save_payload(|| Payload::Replacement(replacement.clone()));
        self.trigger(HookEvent::BeforeSave, HookTargets::Ids(before_ids.clone()), &payload)?;

        debug!(target: "doclayer::collection", collection = %self.name(), filter = ?filter, upsert = options.upsert, "replace_one");
        let result = self
            .inner
            .store
            .replace_one(filter, replacement, options.upsert)?;

        self.after_update(&result, before_ids, &payload)?;
        Ok(result)
    }

    pub fn update_one(
        &self,
        filter: &RawDocument,
        update: RawDocument,
        options: WriteOptions,
    ) -> Result<UpdateResult> {
        self.update_with(filter, update, options, false)
    }

    pub fn update_many(
        &self,
        filter: &RawDocument,
        update: RawDocument,
        options: WriteOptions,
    ) -> Result<UpdateResult> {
        self.update_with(filter, update, options, true)
    }

    fn update_with(
        &self,
        filter: &RawDocument,
        update: RawDocument,
        options: WriteOptions,
        multi: bool,
    ) -> Result<UpdateResult> {
        self.inner
            .policy
            .check_update(&update, options.allow_protected_fields)?;

        let hooked = self.inner.hooks.has_save_hooks();
        let before_ids = if hooked {
            self.snapshot_ids(filter, &[], if multi { None } else { Some(1) })?
        } else {
            Vec::new()
        };
        let payload = self.save_payload(|| Payload::Update(update.clone()));
        self.trigger(HookEvent::BeforeSave, HookTargets::Ids(before_ids.clone()), &payload)?;

        debug!(target: "doclayer::collection", collection = %self.name(), filter = ?filter, multi, upsert = options.upsert, "update");
        let result = if multi {
            self.inner.store.update_many(filter, &update, options.upsert)?
        } else {
            self.inner.store.update_one(filter, &update, options.upsert)?
        };

        self.after_update(&result, before_ids, &payload)?;
        Ok(result)
    }

    pub fn delete_one(&self, filter: &RawDocument) -> Result<DeleteResult> {
        self.delete_with(filter, false)
    }

    pub fn delete_many(&self, filter: &RawDocument) -> Result<DeleteResult> {
        self.delete_with(filter, true)
    }

    fn delete_with(&self, filter: &RawDocument, multi: bool) -> Result<DeleteResult> {
        let pre_images = if self.inner.hooks.has_delete_hooks() {
            self.read_primary(filter.clone(), None, if multi { None } else { Some(1) })?
        } else {
            Vec::new()
        };
        let pre_images =
            self.trigger(HookEvent::BeforeDelete, HookTargets::Records(pre_images), &Payload::None)?;

        debug!(target: "doclayer::collection", collection = %self.name(), filter = ?filter, multi, "delete");
        let result = if multi {
            self.inner.store.delete_many(filter)?
        } else {
            self.inner.store.delete_one(filter)?
        };

        if result.deleted_count > 0 {
            self.trigger(HookEvent::AfterDelete, HookTargets::Records(pre_images), &Payload::None)?;
        }
        Ok(result)
    }

    /// Delete the first match and return it.
    pub fn find_one_and_delete(&self, filter: RawDocument, args: ReadArgs) -> Result<Option<Record>> {
        let read = self.resolve(args.with_filter(filter))?;

        if self.has_trigger(HookEvent::BeforeDelete) {
            let pre = self.pre_image(&read.filter, &read.options.sort)?;
            self.trigger(HookEvent::BeforeDelete, HookTargets::Records(pre), &Payload::None)?;
        }

        let options = read.find_and_modify(false);
        let Some(document) = self.inner.store.find_one_and_delete(&read.filter, &options)? else {
            return Ok(None);
        };

        let record = Record::from_store(self.clone(), document, read.fetched.clone());
        let mut records =
            self.trigger(HookEvent::AfterDelete, HookTargets::Records(vec![record]), &Payload::None)?;
        Ok(records.pop())
    }

    /// Replace the first match. Returns the document before or after the
    /// change, per `return_document`. `after_save` runs only when the write
    /// changed or created a document.
    pub fn find_one_and_replace(
        &self,
        filter: RawDocument,
        replacement: RawDocument,
        args: ReadArgs,
        options: WriteOptions,
    ) -> Result<Option<Record>> {
        self.inner
            .policy
            .check_replace(&replacement, options.allow_protected_fields)?;
        let read = self.resolve(args.with_filter(filter))?;
        let payload = self.save_payload(|| Payload::Replacement(replacement.clone()));

        let before_ids = if self.inner.hooks.has_save_hooks() {
            self.snapshot_ids(&read.filter, &read.options.sort, Some(1))?
        } else {
            Vec::new()
        };
        self.trigger(HookEvent::BeforeSave, HookTargets::Ids(before_ids.clone()), &payload)?;

        let fam = read.find_and_modify(options.upsert);
        let outcome = self.inner.store.find_one_and_replace(&read.filter, replacement, &fam)?;

        self.after_update(&outcome.as_update(), before_ids, &payload)?;
        Ok(outcome
            .value
            .map(|document| Record::from_store(self.clone(), document, read.fetched)))
    }

    /// Update the first match. Returns the document before or after the
    /// change, per `return_document`. Hooks run as for `find_one_and_replace`.
    pub fn find_one_and_update(
        &self,
        filter: RawDocument,
        update: RawDocument,
        args: ReadArgs,
        options: WriteOptions,
    ) -> Result<Option<Record>> {
        self.inner
            .policy
            .check_update(&update, options.allow_protected_fields)?;
        let read = self.resolve(args.with_filter(filter))?;
        let payload = self.save_payload(|| Payload::Update(update.clone()));

        let before_ids = if self.inner.hooks.has_save_hooks() {
            self.snapshot_ids(&read.filter, &read.options.sort, Some(1))?
        } else {
            Vec::new()
        };
        self.trigger(HookEvent::BeforeSave, HookTargets::Ids(before_ids.clone()), &payload)?;

        let fam = read.find_and_modify(options.upsert);
        let outcome = self.inner.store.find_one_and_update(&read.filter, &update, &fam)?;

        self.after_update(&outcome.as_update(), before_ids, &payload)?;
        Ok(outcome
            .value
            .map(|document| Record::from_store(self.clone(), document, read.fetched)))
    }

    /// Guarded batch write. Hooks do not run for bulk writes.
    pub fn bulk_write(&self, requests: Vec<WriteModel>, options: WriteOptions) -> Result<BulkWriteResult> {
        let allow = options.allow_protected_fields;
        for request in &requests {
            match request {
                WriteModel::InsertOne { document } => self.inner.policy.check_insert(document, allow)?,
                WriteModel::ReplaceOne { replacement, .. } => {
                    self.inner.policy.check_replace(replacement, allow)?
                }
                WriteModel::UpdateOne { update, .. } | WriteModel::UpdateMany { update, .. } => {
                    self.inner.policy.check_update(update, allow)?
                }
                WriteModel::DeleteOne { .. } | WriteModel::DeleteMany { .. } => {}
            }
        }

        debug!(target: "doclayer::collection", collection = %self.name(), requests = requests.len(), "bulk_write without hooks");
        self.inner.store.bulk_write(requests)
    }

    // ---------------------------------------------------------------------
    // Legacy surface
    // ---------------------------------------------------------------------

    /// Build a record from `data`, save it, return its id.
    pub fn insert(&self, data: RawDocument) -> Result<Value> {
        Ok(self.insert_record(data)?.id().cloned().unwrap_or(Value::Null))
    }

    /// Like [`Collection::insert`], returning the saved record.
    pub fn insert_record(&self, data: RawDocument) -> Result<Record> {
        let mut record = self.record(data);
        record.save(Default::default())?;
        Ok(record)
    }

    /// Insert `document`, or replace the stored one with the same `_id`
    /// (upserting). Assigns an `_id` when missing. Returns the id.
    pub fn save(&self, document: &mut RawDocument, options: WriteOptions) -> Result<Value> {
        self.inner
            .policy
            .check_save(document, options.allow_protected_fields)?;

        match document.get(ID_FIELD).cloned() {
            Some(id) => {
                let payload = self.save_payload(|| Payload::Replacement(document.clone()));
                self.trigger(HookEvent::BeforeSave, HookTargets::Ids(vec![id.clone()]), &payload)?;

                debug!(target: "doclayer::collection", collection = %self.name(), id = %id, "save (replace)");
                self.inner
                    .store
                    .replace_one(&id_filter(id.clone()), document.clone(), true)?;

                self.trigger(HookEvent::AfterSave, HookTargets::Ids(vec![id.clone()]), &payload)?;
                Ok(id)
            }
            None => {
                let id = assign_id(document);
                let payload = self.save_payload(|| Payload::Replacement(document.clone()));

                debug!(target: "doclayer::collection", collection = %self.name(), id = %id, "save (insert)");
                self.inner.store.insert_one(document.clone())?;

                self.trigger(HookEvent::AfterSave, HookTargets::Ids(vec![id.clone()]), &payload)?;
                Ok(id)
            }
        }
    }

    /// `update_many` when `multi`, else `update_one`.
    pub fn update(
        &self,
        filter: &RawDocument,
        update: RawDocument,
        multi: bool,
        options: WriteOptions,
    ) -> Result<UpdateResult> {
        self.update_with(filter, update, options, multi)
    }

    /// Delete every match. `spec` is a filter document, an identifier, or
    /// null for everything.
    pub fn remove(&self, spec: &Value) -> Result<DeleteResult> {
        let filter = match spec {
            Value::Null => RawDocument::new(),
            Value::Object(filter) => filter.clone(),
            id => id_filter(id.clone()),
        };
        self.delete_many(&filter)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("immutable", &self.inner.config.immutable)
            .field("protected_fields", &self.inner.config.protected_fields)
            .field("hooks", &self.inner.hooks)
            .finish()
    }
}
