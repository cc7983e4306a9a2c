//! Core types shared across the layer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// A document as exchanged with the store: ordered field name -> value.
pub type RawDocument = Map<String, Value>;

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";

/// 12-byte document identifier: 4 bytes of seconds, 5 process-unique bytes,
/// 3 bytes of counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 12]);

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);
static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();

fn process_unique() -> [u8; 5] {
    *PROCESS_UNIQUE.get_or_init(rand::random)
}

impl ObjectId {
    /// Generate a new identifier.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let count = OID_COUNTER.fetch_add(1, Ordering::SeqCst);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&process_unique());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        ObjectId(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 24-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(ObjectId(arr))
    }

    /// Base64 form of the raw bytes.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse from the base64 form.
    pub fn from_base64(s: &str) -> Option<Self> {
        let bytes = BASE64.decode(s).ok()?;
        let arr: [u8; 12] = bytes.try_into().ok()?;
        Some(ObjectId(arr))
    }

    /// The value stored in the `_id` field.
    pub fn to_value(&self) -> Value {
        Value::String(self.to_hex())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Reference marker decoded from a `{"$ref": ..., "$id": ...}` subdocument.
#[derive(Clone, Debug, PartialEq)]
pub struct DbRef {
    pub collection: String,
    pub id: Value,
    pub database: Option<String>,
    /// Any extra fields carried by the marker.
    pub extra: RawDocument,
}

impl DbRef {
    /// Encode back into marker form.
    pub fn to_document(&self) -> RawDocument {
        let mut doc = RawDocument::new();
        doc.insert("$ref".into(), Value::String(self.collection.clone()));
        doc.insert("$id".into(), self.id.clone());
        if let Some(db) = &self.database {
            doc.insert("$db".into(), Value::String(db.clone()));
        }
        for (k, v) in &self.extra {
            doc.insert(k.clone(), v.clone());
        }
        doc
    }
}

/// Normalize anything that looks like an identifier.
///
/// Accepts a bare id value or a `{"_id": id}` mapping.
pub fn coerce_id(value: &Value) -> Value {
    match value {
        Value::Object(map) => map.get(ID_FIELD).cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}
