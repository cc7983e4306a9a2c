//! # doclayer
//!
//! A client layer over a document store that tracks which fields of a
//! loaded document are current, and runs mutation hooks around writes.
//!
//! ## Core Concepts
//!
//! - **Records**: documents bound to their collection, remembering which
//!   fields were fetched and whether they came from application data
//! - **Partial fetch**: `ensure` loads only the missing fields, once
//! - **Write policy**: immutable collections and protected fields, checked
//!   before anything reaches the store
//! - **Hooks**: before/after save and delete callbacks, resolved against
//!   the primary
//! - **Skeletons**: default shapes filled into new records
//!
//! ## Example
//!
//! ```ignore
//! use doclayer::{Collection, CollectionConfig, MemoryStore, ReadArgs, WriteOptions};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new("sites"));
//! let sites = Collection::new(store, CollectionConfig::new("sites"));
//!
//! let id = sites.insert(json!({"name": "a", "url": "http://a"}).as_object().cloned().unwrap())?;
//!
//! // Load one field, then bring in another on demand
//! let mut site = sites.find_by_id(&id, ReadArgs::new().with_fields(["name"]))?.unwrap();
//! site.ensure(&["url"])?;
//!
//! // Write back a single nested path
//! site.save_partial(Some(json!({"stats.visits": 1}).as_object().cloned().unwrap()), WriteOptions::default())?;
//! ```

pub mod codec;
pub mod collection;
pub mod dotted;
pub mod error;
pub mod fields;
pub mod hooks;
pub mod options;
pub mod policy;
pub mod record;
pub mod skeleton;
pub mod store;
pub mod types;

// Re-exports
pub use codec::{decode_subdocument, decode_with_context, Codec, DecodeContext, DecodedReply, MessagePackCodec, Subdocument};
pub use collection::{Collection, CollectionConfig};
pub use error::{LayerError, Result};
pub use fields::{FieldSet, Fetched, Projection};
pub use hooks::{HookEvent, HookFn, HookPayload, HookRegistry, HookTargets, Payload};
pub use options::{
    FindAndModifyOptions, FindOptions, ReadArgs, ReadPreference, ReturnDocument, SaveOptions,
    SortOrder, WriteOptions,
};
pub use policy::WritePolicy;
pub use record::Record;
pub use skeleton::{fill_skeleton, ScalarKind, Structure, Template, TemplateKey};
pub use store::{
    BulkWriteResult, DeleteResult, DocumentStore, FindAndModifyResult, InsertManyResult, InsertOneResult,
    MemoryStore, OpKind, StoreOp, UpdateResult, WriteModel,
};
pub use types::*;
