//! In-process document store.
//!
//! Documents live in insertion order behind a read-write lock. Every call
//! through [`DocumentStore`] is appended to an operation log, which tests use
//! to observe call order and count reads.

use super::query::{apply_update, matches, project, sort_documents, upsert_seed, values_equal};
use super::{
    BulkWriteResult, DeleteResult, DocumentStore, FindAndModifyResult, InsertManyResult,
    InsertOneResult, UpdateResult, WriteModel,
};
use crate::codec::{encode_all, Codec, MessagePackCodec};
use crate::dotted;
use crate::error::{LayerError, Result};
use crate::options::{FindAndModifyOptions, FindOptions, ReadPreference, ReturnDocument, SortOrder};
use crate::types::{ObjectId, RawDocument, ID_FIELD};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Store verb recorded in the operation log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Find,
    Count,
    Distinct,
    InsertOne,
    InsertMany,
    ReplaceOne,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    FindOneAndDelete,
    FindOneAndReplace,
    FindOneAndUpdate,
    BulkWrite,
}

impl OpKind {
    pub fn is_read(&self) -> bool {
        matches!(self, OpKind::Find | OpKind::Count | OpKind::Distinct)
    }
}

/// One logged store call.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreOp {
    pub kind: OpKind,
    pub filter: RawDocument,
    /// Set for reads.
    pub read_preference: Option<ReadPreference>,
}

/// In-memory [`DocumentStore`].
pub struct MemoryStore {
    name: String,
    codec: Arc<dyn Codec>,
    documents: RwLock<Vec<RawDocument>>,
    op_log: Mutex<Vec<StoreOp>>,
    next_cursor: AtomicI64,
}

impl MemoryStore {
    /// Empty store using [`MessagePackCodec`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_codec(name, Arc::new(MessagePackCodec))
    }

    pub fn with_codec(name: impl Into<String>, codec: Arc<dyn Codec>) -> Self {
        Self {
            name: name.into(),
            codec,
            documents: RwLock::new(Vec::new()),
            op_log: Mutex::new(Vec::new()),
            next_cursor: AtomicI64::new(1),
        }
    }

    /// Add a document directly, bypassing the log. Assigns an `_id` when
    /// missing.
    pub fn insert_raw(&self, document: RawDocument) -> Value {
        let (id, document) = with_id_first(document, None);
        self.documents.write().push(document);
        id
    }

    /// Snapshot of every stored document.
    pub fn raw_documents(&self) -> Vec<RawDocument> {
        self.documents.read().clone()
    }

    /// Stored document with the given identifier.
    pub fn get_raw(&self, id: &Value) -> Option<RawDocument> {
        self.documents
            .read()
            .iter()
            .find(|d| d.get(ID_FIELD).map(|v| values_equal(v, id)).unwrap_or(false))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    pub fn op_log(&self) -> Vec<StoreOp> {
        self.op_log.lock().clone()
    }

    pub fn clear_op_log(&self) {
        self.op_log.lock().clear();
    }

    /// Number of logged read calls.
    pub fn reads(&self) -> usize {
        self.op_log.lock().iter().filter(|op| op.kind.is_read()).count()
    }

    /// Number of logged calls of `kind`.
    pub fn calls(&self, kind: OpKind) -> usize {
        self.op_log.lock().iter().filter(|op| op.kind == kind).count()
    }

    fn log(&self, kind: OpKind, filter: &RawDocument, read_preference: Option<ReadPreference>) {
        if !kind.is_read() {
            debug!(target: "doclayer::store", store = %self.name, op = ?kind, filter = ?filter, "write");
        }
        self.op_log.lock().push(StoreOp {
            kind,
            filter: filter.clone(),
            read_preference,
        });
    }

    /// Matching documents after sort, skip and limit. A limit of zero means
    /// no limit.
    fn select(
        &self,
        filter: &RawDocument,
        sort: &[(String, SortOrder)],
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<RawDocument>> {
        let mut found = Vec::new();
        for document in self.documents.read().iter() {
            if matches(document, filter)? {
                found.push(document.clone());
            }
        }
        sort_documents(&mut found, sort);

        let skip = skip.unwrap_or(0) as usize;
        let limit = match limit {
            Some(0) | None => usize::MAX,
            Some(n) => n as usize,
        };
        Ok(found.into_iter().skip(skip).take(limit).collect())
    }

    fn reply_frame(&self, cursor_id: i64, key: &str, batch: &[RawDocument]) -> RawDocument {
        let mut cursor = RawDocument::new();
        cursor.insert("id".into(), Value::from(cursor_id));
        cursor.insert("ns".into(), Value::String(self.name.clone()));
        cursor.insert(
            key.into(),
            Value::Array(batch.iter().cloned().map(Value::Object).collect()),
        );

        let mut reply = RawDocument::new();
        reply.insert("cursor".into(), Value::Object(cursor));
        reply.insert("ok".into(), Value::from(1));
        reply
    }
}

/// Put `_id` first, taking it from the document, then `fallback`, then a
/// fresh `ObjectId`.
fn with_id_first(document: RawDocument, fallback: Option<&Value>) -> (Value, RawDocument) {
    let id = document
        .get(ID_FIELD)
        .or(fallback)
        .cloned()
        .unwrap_or_else(|| ObjectId::new().to_value());

    let mut out = RawDocument::new();
    out.insert(ID_FIELD.into(), id.clone());
    for (key, value) in document {
        if key != ID_FIELD {
            out.insert(key, value);
        }
    }
    (id, out)
}

fn position_of(documents: &[RawDocument], id: &Value) -> Option<usize> {
    documents
        .iter()
        .position(|d| d.get(ID_FIELD).map(|v| values_equal(v, id)).unwrap_or(false))
}

fn check_unique(documents: &[RawDocument], id: &Value) -> Result<()> {
    match position_of(documents, id) {
        Some(_) => Err(LayerError::DuplicateKey(id.clone())),
        None => Ok(()),
    }
}

fn check_replacement(replacement: &RawDocument) -> Result<()> {
    if replacement.keys().any(|k| k.starts_with('$')) {
        return Err(LayerError::InvalidArgument(
            "replacement document must not contain update operators".into(),
        ));
    }
    Ok(())
}

fn check_update(update: &RawDocument) -> Result<()> {
    if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
        return Err(LayerError::InvalidArgument(
            "update documents must only contain operators".into(),
        ));
    }
    Ok(())
}

fn first_index(
    documents: &[RawDocument],
    filter: &RawDocument,
    sort: &[(String, SortOrder)],
) -> Result<Option<usize>> {
    if sort.is_empty() {
        for (i, document) in documents.iter().enumerate() {
            if matches(document, filter)? {
                return Ok(Some(i));
            }
        }
        return Ok(None);
    }

    let mut candidates = Vec::new();
    for document in documents {
        if matches(document, filter)? {
            candidates.push(document.clone());
        }
    }
    sort_documents(&mut candidates, sort);
    Ok(candidates
        .first()
        .and_then(|first| first.get(ID_FIELD))
        .and_then(|id| position_of(documents, id)))
}

fn all_indices(documents: &[RawDocument], filter: &RawDocument) -> Result<Vec<usize>> {
    let mut indices = Vec::new();
    for (i, document) in documents.iter().enumerate() {
        if matches(document, filter)? {
            indices.push(i);
        }
    }
    Ok(indices)
}

/// `existing` with its content swapped for `replacement`, keeping `_id`.
fn replaced(existing: &RawDocument, replacement: RawDocument) -> Result<RawDocument> {
    check_replacement(&replacement)?;
    let id = existing.get(ID_FIELD);
    if let (Some(new), Some(old)) = (replacement.get(ID_FIELD), id) {
        if !values_equal(new, old) {
            return Err(LayerError::InvalidArgument("_id is immutable".into()));
        }
    }
    Ok(with_id_first(replacement, id).1)
}

/// `existing` after applying `update`.
fn updated(existing: &RawDocument, update: &RawDocument) -> Result<RawDocument> {
    let mut next = existing.clone();
    apply_update(&mut next, update, false)?;
    let same_id = match (existing.get(ID_FIELD), next.get(ID_FIELD)) {
        (Some(a), Some(b)) => values_equal(a, b),
        (None, None) => true,
        _ => false,
    };
    if !same_id {
        return Err(LayerError::InvalidArgument("_id is immutable".into()));
    }
    Ok(next)
}

fn upsert_replacement(filter: &RawDocument, replacement: RawDocument) -> Result<RawDocument> {
    check_replacement(&replacement)?;
    let seed = upsert_seed(filter)?;
    Ok(with_id_first(replacement, seed.get(ID_FIELD)).1)
}

fn upsert_update(filter: &RawDocument, update: &RawDocument) -> Result<RawDocument> {
    let mut seed = upsert_seed(filter)?;
    apply_update(&mut seed, update, true)?;
    Ok(with_id_first(seed, None).1)
}

fn insert_into(documents: &mut Vec<RawDocument>, document: RawDocument) -> Result<Value> {
    let (id, document) = with_id_first(document, None);
    check_unique(documents, &id)?;
    documents.push(document);
    Ok(id)
}

fn push_upserted(documents: &mut Vec<RawDocument>, document: RawDocument) -> Result<Value> {
    let id = document.get(ID_FIELD).cloned().unwrap_or(Value::Null);
    check_unique(documents, &id)?;
    documents.push(document);
    Ok(id)
}

fn replace_in(
    documents: &mut Vec<RawDocument>,
    filter: &RawDocument,
    replacement: RawDocument,
    upsert: bool,
) -> Result<UpdateResult> {
    match first_index(documents, filter, &[])? {
        Some(i) => {
            let next = replaced(&documents[i], replacement)?;
            let modified = next != documents[i];
            documents[i] = next;
            Ok(UpdateResult {
                matched_count: 1,
                modified_count: u64::from(modified),
                upserted_id: None,
            })
        }
        None if upsert => {
            let document = upsert_replacement(filter, replacement)?;
            let id = push_upserted(documents, document)?;
            Ok(UpdateResult {
                upserted_id: Some(id),
                ..Default::default()
            })
        }
        None => Ok(UpdateResult::default()),
    }
}

fn update_in(
    documents: &mut Vec<RawDocument>,
    filter: &RawDocument,
    update: &RawDocument,
    upsert: bool,
    multi: bool,
) -> Result<UpdateResult> {
    check_update(update)?;
    let indices = if multi {
        all_indices(documents, filter)?
    } else {
        first_index(documents, filter, &[])?.into_iter().collect()
    };

    if indices.is_empty() {
        if !upsert {
            return Ok(UpdateResult::default());
        }
        let document = upsert_update(filter, update)?;
        let id = push_upserted(documents, document)?;
        return Ok(UpdateResult {
            upserted_id: Some(id),
            ..Default::default()
        });
    }

    // Compute every new version before committing any.
    let mut changes = Vec::with_capacity(indices.len());
    for &i in &indices {
        let next = updated(&documents[i], update)?;
        if next != documents[i] {
            changes.push((i, next));
        }
    }

    let modified_count = changes.len() as u64;
    for (i, next) in changes {
        documents[i] = next;
    }
    Ok(UpdateResult {
        matched_count: indices.len() as u64,
        modified_count,
        upserted_id: None,
    })
}

fn delete_in(documents: &mut Vec<RawDocument>, filter: &RawDocument, multi: bool) -> Result<u64> {
    if multi {
        let indices = all_indices(documents, filter)?;
        let mut position = 0;
        documents.retain(|_| {
            let keep = !indices.contains(&position);
            position += 1;
            keep
        });
        Ok(indices.len() as u64)
    } else {
        match first_index(documents, filter, &[])? {
            Some(i) => {
                documents.remove(i);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

fn shape(document: RawDocument, projection: &Option<RawDocument>) -> RawDocument {
    match projection {
        Some(projection) => project(&document, projection),
        None => document,
    }
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.codec)
    }

    fn find(&self, filter: &RawDocument, options: &FindOptions) -> Result<Vec<u8>> {
        self.log(OpKind::Find, filter, Some(options.read_preference.clone()));

        let found: Vec<RawDocument> = self
            .select(filter, &options.sort, options.skip, options.limit)?
            .into_iter()
            .map(|d| shape(d, &options.projection))
            .collect();

        let chunk = match options.batch_size {
            Some(size) if size > 0 => size as usize,
            _ => found.len().max(1),
        };
        let batches: Vec<&[RawDocument]> = if found.is_empty() {
            vec![&found[..]]
        } else {
            found.chunks(chunk).collect()
        };
        let cursor_id = if batches.len() > 1 {
            self.next_cursor.fetch_add(1, Ordering::SeqCst)
        } else {
            0
        };

        let frames: Vec<RawDocument> = batches
            .iter()
            .enumerate()
            .map(|(i, batch)| {
                let key = if i == 0 { "firstBatch" } else { "nextBatch" };
                let id = if i + 1 == batches.len() { 0 } else { cursor_id };
                self.reply_frame(id, key, batch)
            })
            .collect();
        encode_all(self.codec.as_ref(), &frames)
    }

    fn count(&self, filter: &RawDocument, options: &FindOptions) -> Result<u64> {
        self.log(OpKind::Count, filter, Some(options.read_preference.clone()));
        Ok(self.select(filter, &[], options.skip, options.limit)?.len() as u64)
    }

    fn distinct(&self, key: &str, filter: &RawDocument) -> Result<Vec<Value>> {
        self.log(OpKind::Distinct, filter, Some(ReadPreference::Primary));

        let mut values: Vec<Value> = Vec::new();
        let mut push = |value: &Value| {
            if !values.iter().any(|v| values_equal(v, value)) {
                values.push(value.clone());
            }
        };
        for document in self.select(filter, &[], None, None)? {
            match dotted::get(&document, key) {
                Some(Value::Array(items)) => items.iter().for_each(&mut push),
                Some(value) => push(value),
                None => {}
            }
        }
        Ok(values)
    }

    fn insert_one(&self, document: RawDocument) -> Result<InsertOneResult> {
        self.log(OpKind::InsertOne, &RawDocument::new(), None);
        let inserted_id = insert_into(&mut self.documents.write(), document)?;
        Ok(InsertOneResult { inserted_id })
    }

    fn insert_many(&self, documents: Vec<RawDocument>) -> Result<InsertManyResult> {
        self.log(OpKind::InsertMany, &RawDocument::new(), None);

        let mut stored = self.documents.write();
        let prepared: Vec<(Value, RawDocument)> = documents
            .into_iter()
            .map(|d| with_id_first(d, None))
            .collect();
        for (i, (id, _)) in prepared.iter().enumerate() {
            check_unique(&stored, id)?;
            if prepared[..i].iter().any(|(other, _)| values_equal(other, id)) {
                return Err(LayerError::DuplicateKey(id.clone()));
            }
        }

        let mut inserted_ids = Vec::with_capacity(prepared.len());
        for (id, document) in prepared {
            stored.push(document);
            inserted_ids.push(id);
        }
        Ok(InsertManyResult { inserted_ids })
    }

    fn replace_one(
        &self,
        filter: &RawDocument,
        replacement: RawDocument,
        upsert: bool,
    ) -> Result<UpdateResult> {
        self.log(OpKind::ReplaceOne, filter, None);
        replace_in(&mut self.documents.write(), filter, replacement, upsert)
    }

    fn update_one(&self, filter: &RawDocument, update: &RawDocument, upsert: bool) -> Result<UpdateResult> {
        self.log(OpKind::UpdateOne, filter, None);
        update_in(&mut self.documents.write(), filter, update, upsert, false)
    }

    fn update_many(
        &self,
        filter: &RawDocument,
        update: &RawDocument,
        upsert: bool,
    ) -> Result<UpdateResult> {
        self.log(OpKind::UpdateMany, filter, None);
        update_in(&mut self.documents.write(), filter, update, upsert, true)
    }

    fn delete_one(&self, filter: &RawDocument) -> Result<DeleteResult> {
        self.log(OpKind::DeleteOne, filter, None);
        let deleted_count = delete_in(&mut self.documents.write(), filter, false)?;
        Ok(DeleteResult { deleted_count })
    }

    fn delete_many(&self, filter: &RawDocument) -> Result<DeleteResult> {
        self.log(OpKind::DeleteMany, filter, None);
        let deleted_count = delete_in(&mut self.documents.write(), filter, true)?;
        Ok(DeleteResult { deleted_count })
    }

    fn find_one_and_delete(
        &self,
        filter: &RawDocument,
        options: &FindAndModifyOptions,
    ) -> Result<Option<RawDocument>> {
        self.log(OpKind::FindOneAndDelete, filter, None);
        let mut documents = self.documents.write();
        Ok(first_index(&documents, filter, &options.sort)?
            .map(|i| shape(documents.remove(i), &options.projection)))
    }

    fn find_one_and_replace(
        &self,
        filter: &RawDocument,
        replacement: RawDocument,
        options: &FindAndModifyOptions,
    ) -> Result<FindAndModifyResult> {
        self.log(OpKind::FindOneAndReplace, filter, None);
        let mut documents = self.documents.write();

        match first_index(&documents, filter, &options.sort)? {
            Some(i) => {
                let next = replaced(&documents[i], replacement)?;
                let before = std::mem::replace(&mut documents[i], next);
                let modified = before != documents[i];
                let returned = match options.return_document {
                    ReturnDocument::Before => before,
                    ReturnDocument::After => documents[i].clone(),
                };
                Ok(FindAndModifyResult {
                    value: Some(shape(returned, &options.projection)),
                    matched: true,
                    modified,
                    upserted_id: None,
                })
            }
            None if options.upsert => {
                let document = upsert_replacement(filter, replacement)?;
                let id = push_upserted(&mut documents, document.clone())?;
                let value = match options.return_document {
                    ReturnDocument::Before => None,
                    ReturnDocument::After => Some(shape(document, &options.projection)),
                };
                Ok(FindAndModifyResult { value, upserted_id: Some(id), ..Default::default() })
            }
            None => Ok(FindAndModifyResult::default()),
        }
    }

    fn find_one_and_update(
        &self,
        filter: &RawDocument,
        update: &RawDocument,
        options: &FindAndModifyOptions,
    ) -> Result<FindAndModifyResult> {
        self.log(OpKind::FindOneAndUpdate, filter, None);
        check_update(update)?;
        let mut documents = self.documents.write();

        match first_index(&documents, filter, &options.sort)? {
            Some(i) => {
                let next = updated(&documents[i], update)?;
                let before = std::mem::replace(&mut documents[i], next);
                let modified = before != documents[i];
                let returned = match options.return_document {
                    ReturnDocument::Before => before,
                    ReturnDocument::After => documents[i].clone(),
                };
                Ok(FindAndModifyResult {
                    value: Some(shape(returned, &options.projection)),
                    matched: true,
                    modified,
                    upserted_id: None,
                })
            }
            None if options.upsert => {
                let document = upsert_update(filter, update)?;
                let id = push_upserted(&mut documents, document.clone())?;
                let value = match options.return_document {
                    ReturnDocument::Before => None,
                    ReturnDocument::After => Some(shape(document, &options.projection)),
                };
                Ok(FindAndModifyResult { value, upserted_id: Some(id), ..Default::default() })
            }
            None => Ok(FindAndModifyResult::default()),
        }
    }

    fn bulk_write(&self, requests: Vec<WriteModel>) -> Result<BulkWriteResult> {
        self.log(OpKind::BulkWrite, &RawDocument::new(), None);
        let mut documents = self.documents.write();
        let mut result = BulkWriteResult::default();

        for request in requests {
            let outcome = match request {
                WriteModel::InsertOne { document } => {
                    insert_into(&mut documents, document)?;
                    result.inserted_count += 1;
                    continue;
                }
                WriteModel::DeleteOne { filter } => {
                    result.deleted_count += delete_in(&mut documents, &filter, false)?;
                    continue;
                }
                WriteModel::DeleteMany { filter } => {
                    result.deleted_count += delete_in(&mut documents, &filter, true)?;
                    continue;
                }
                WriteModel::ReplaceOne {
                    filter,
                    replacement,
                    upsert,
                } => replace_in(&mut documents, &filter, replacement, upsert)?,
                WriteModel::UpdateOne {
                    filter,
                    update,
                    upsert,
                } => update_in(&mut documents, &filter, &update, upsert, false)?,
                WriteModel::UpdateMany {
                    filter,
                    update,
                    upsert,
                } => update_in(&mut documents, &filter, &update, upsert, true)?,
            };

            result.matched_count += outcome.matched_count;
            result.modified_count += outcome.modified_count;
            result.upserted_ids.extend(outcome.upserted_id);
        }

        Ok(result)
    }
}
