//! Binary document codec and context-aware decoding.
//!
//! Stores hand back query replies as encoded frames. Decoding happens with a
//! [`DecodeContext`] naming the owning collection and the fetch state implied
//! by the requested projection, so that every document found in a cursor
//! batch (`firstBatch` / `nextBatch`) comes out as a [`Record`] bound to the
//! right collection with the right fetch state.
//!
//! ## Frame format
//!
//! ```text
//! ┌─────────────┬──────────────────────────────┐
//! │ length (4)  │ MessagePack-encoded document │
//! └─────────────┴──────────────────────────────┘
//! ```
//!
//! `length` is little-endian and covers the whole frame, header included.

use crate::collection::Collection;
use crate::error::{LayerError, Result};
use crate::fields::Fetched;
use crate::record::Record;
use crate::types::{DbRef, RawDocument};
use serde_json::Value;

/// Keys of cursor replies whose array elements are result documents.
pub const BATCH_KEYS: [&str; 2] = ["firstBatch", "nextBatch"];

/// Frame header size.
const FRAME_HEADER: usize = 4;

/// Encodes and decodes documents to and from bytes.
pub trait Codec: Send + Sync {
    /// Encode one document as a single frame.
    fn encode(&self, document: &RawDocument) -> Result<Vec<u8>>;

    /// Decode a sequence of concatenated frames.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<RawDocument>>;
}

/// Length-prefixed MessagePack frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    fn encode(&self, document: &RawDocument) -> Result<Vec<u8>> {
        let body = rmp_serde::to_vec_named(document)?;
        let total = u32::try_from(body.len() + FRAME_HEADER)
            .map_err(|_| LayerError::Serialization("document too large".into()))?;

        let mut frame = Vec::with_capacity(body.len() + FRAME_HEADER);
        frame.extend_from_slice(&total.to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<RawDocument>> {
        let mut docs = Vec::new();
        let mut position = 0;

        while position < bytes.len() {
            if bytes.len() - position < FRAME_HEADER {
                return Err(LayerError::Deserialization("truncated frame header".into()));
            }
            let mut header = [0u8; FRAME_HEADER];
            header.copy_from_slice(&bytes[position..position + FRAME_HEADER]);
            let size = u32::from_le_bytes(header) as usize;

            if size < FRAME_HEADER || bytes.len() - position < size {
                return Err(LayerError::Deserialization("invalid object size".into()));
            }

            let body = &bytes[position + FRAME_HEADER..position + size];
            docs.push(rmp_serde::from_slice::<RawDocument>(body)?);
            position += size;
        }

        Ok(docs)
    }
}

/// Encode several documents back to back.
pub fn encode_all(codec: &dyn Codec, documents: &[RawDocument]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for doc in documents {
        out.extend(codec.encode(doc)?);
    }
    Ok(out)
}

/// Per-call decoding context.
#[derive(Clone, Debug)]
pub struct DecodeContext {
    pub collection: Collection,
    pub fetched: Fetched,
    /// Fill skeleton defaults into full loads. Follows the collection setting
    /// unless turned off.
    pub generate_skeleton: bool,
}

impl DecodeContext {
    pub fn new(collection: Collection, fetched: Fetched) -> Self {
        let generate_skeleton = collection.generates_skeleton();
        Self {
            collection,
            fetched,
            generate_skeleton,
        }
    }

    /// Keep decoded documents exactly as stored.
    pub fn without_skeleton(mut self) -> Self {
        self.generate_skeleton = false;
        self
    }

    /// Wrap a decoded document into a record.
    pub fn record(&self, fields: RawDocument) -> Record {
        Record::from_store_with(
            self.collection.clone(),
            fields,
            self.fetched.clone(),
            self.generate_skeleton,
        )
    }
}

/// A decoded reply frame.
#[derive(Debug)]
pub struct DecodedReply {
    /// The reply with batch arrays emptied.
    pub document: RawDocument,
    /// Records taken from batch arrays, in order.
    pub batch: Vec<Record>,
}

/// Decode reply frames, rewriting cursor batch elements into records.
pub fn decode_with_context(
    codec: &dyn Codec,
    bytes: &[u8],
    context: &DecodeContext,
) -> Result<Vec<DecodedReply>> {
    codec
        .decode(bytes)?
        .into_iter()
        .map(|mut document| {
            let mut batch = Vec::new();
            take_batches(&mut document, context, &mut batch)?;
            Ok(DecodedReply { document, batch })
        })
        .collect()
}

fn take_batches(
    document: &mut RawDocument,
    context: &DecodeContext,
    out: &mut Vec<Record>,
) -> Result<()> {
    for (key, value) in document.iter_mut() {
        match value {
            Value::Array(items) if BATCH_KEYS.contains(&key.as_str()) => {
                for item in std::mem::take(items) {
                    match item {
                        Value::Object(fields) => out.push(context.record(fields)),
                        other => {
                            return Err(LayerError::Deserialization(format!(
                                "{} element is not a document: {}",
                                key, other
                            )))
                        }
                    }
                }
            }
            Value::Object(inner) => take_batches(inner, context, out)?,
            _ => {}
        }
    }
    Ok(())
}

/// A nested document, or a reference marker.
#[derive(Clone, Debug, PartialEq)]
pub enum Subdocument {
    Reference(DbRef),
    Document(RawDocument),
}

/// Interpret a nested document, turning `$ref` markers into [`DbRef`]s.
pub fn decode_subdocument(mut document: RawDocument) -> Subdocument {
    let collection = match document.remove("$ref") {
        Some(Value::String(name)) => name,
        Some(other) => {
            document.insert("$ref".into(), other);
            return Subdocument::Document(document);
        }
        None => return Subdocument::Document(document),
    };
    let id = document.remove("$id").unwrap_or(Value::Null);
    let database = match document.remove("$db") {
        Some(Value::String(db)) => Some(db),
        _ => None,
    };
    Subdocument::Reference(DbRef {
        collection,
        id,
        database,
        extra: document,
    })
}
