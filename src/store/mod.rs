//! The document store seam.
//!
//! The layer talks to the store only through [`DocumentStore`]: query,
//! insert, update and delete primitives over filter/update documents that
//! report result metadata. Connection management, server selection and the
//! cursor protocol live behind this trait.
//!
//! [`MemoryStore`] is an in-process implementation with enough of the query
//! and update language to back tests and benchmarks.

mod memory;
mod query;

pub use memory::{MemoryStore, OpKind, StoreOp};
pub use query::{apply_update, matches, project, values_equal};

use crate::codec::Codec;
use crate::error::Result;
use crate::options::{FindAndModifyOptions, FindOptions};
use crate::types::RawDocument;
use serde_json::Value;
use std::sync::Arc;

/// Result of `insert_one`.
#[derive(Clone, Debug, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

/// Result of `insert_many`.
#[derive(Clone, Debug, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
}

/// Result of replace and update calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Value>,
}

/// Result of `find_one_and_replace` and `find_one_and_update`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindAndModifyResult {
    /// The matched document before or after the change, per
    /// `return_document`. `None` when nothing matched, or after an upsert
    /// under `Before`.
    pub value: Option<RawDocument>,
    pub matched: bool,
    /// Whether the matched document changed.
    pub modified: bool,
    pub upserted_id: Option<Value>,
}

impl FindAndModifyResult {
    /// The same outcome in `update_one` terms.
    pub fn as_update(&self) -> UpdateResult {
        UpdateResult {
            matched_count: u64::from(self.matched),
            modified_count: u64::from(self.modified),
            upserted_id: self.upserted_id.clone(),
        }
    }
}

/// Result of delete calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// One operation of a bulk write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: RawDocument,
    },
    ReplaceOne {
        filter: RawDocument,
        replacement: RawDocument,
        upsert: bool,
    },
    UpdateOne {
        filter: RawDocument,
        update: RawDocument,
        upsert: bool,
    },
    UpdateMany {
        filter: RawDocument,
        update: RawDocument,
        upsert: bool,
    },
    DeleteOne {
        filter: RawDocument,
    },
    DeleteMany {
        filter: RawDocument,
    },
}

/// Aggregated result of a bulk write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_ids: Vec<Value>,
}

/// Primitives the layer needs from a document store.
///
/// Every call blocks until the store answers. Errors are returned unchanged
/// to the caller; the layer never retries.
pub trait DocumentStore: Send + Sync {
    /// Collection name on the store side.
    fn name(&self) -> &str;

    /// Codec used for replies returned by [`DocumentStore::find`].
    fn codec(&self) -> Arc<dyn Codec>;

    /// Run a query. Returns encoded reply frames whose `cursor.firstBatch`
    /// and `cursor.nextBatch` arrays hold the matching documents.
    fn find(&self, filter: &RawDocument, options: &FindOptions) -> Result<Vec<u8>>;

    fn count(&self, filter: &RawDocument, options: &FindOptions) -> Result<u64>;

    fn distinct(&self, key: &str, filter: &RawDocument) -> Result<Vec<Value>>;

    fn insert_one(&self, document: RawDocument) -> Result<InsertOneResult>;

    fn insert_many(&self, documents: Vec<RawDocument>) -> Result<InsertManyResult>;

    fn replace_one(
        &self,
        filter: &RawDocument,
        replacement: RawDocument,
        upsert: bool,
    ) -> Result<UpdateResult>;

    fn update_one(&self, filter: &RawDocument, update: &RawDocument, upsert: bool)
        -> Result<UpdateResult>;

    fn update_many(
        &self,
        filter: &RawDocument,
        update: &RawDocument,
        upsert: bool,
    ) -> Result<UpdateResult>;

    fn delete_one(&self, filter: &RawDocument) -> Result<DeleteResult>;

    fn delete_many(&self, filter: &RawDocument) -> Result<DeleteResult>;

    fn find_one_and_delete(
        &self,
        filter: &RawDocument,
        options: &FindAndModifyOptions,
    ) -> Result<Option<RawDocument>>;

    fn find_one_and_replace(
        &self,
        filter: &RawDocument,
        replacement: RawDocument,
        options: &FindAndModifyOptions,
    ) -> Result<FindAndModifyResult>;

    fn find_one_and_update(
        &self,
        filter: &RawDocument,
        update: &RawDocument,
        options: &FindAndModifyOptions,
    ) -> Result<FindAndModifyResult>;

    fn bulk_write(&self, requests: Vec<WriteModel>) -> Result<BulkWriteResult>;
}
