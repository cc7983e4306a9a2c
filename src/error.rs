//! Error types for the document layer.

use serde_json::Value;
use thiserror::Error;

/// Main error type for collection and record operations.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("Collection {0} is immutable")]
    ImmutableViolation(String),

    #[error("Cannot set protected fields without allow_protected_fields: {0:?}")]
    ProtectedFieldViolation(Vec<String>),

    #[error("Record was not loaded from application data; saving it might remove fields (use force)")]
    NotFullyLoaded,

    #[error("Record has no _id")]
    MissingIdentifier,

    #[error("Document {0} not found in the store")]
    StaleReference(Value),

    #[error("{0} results found, expected at most one")]
    MultipleResultsFound(u64),

    #[error("Hook {event} failed: {message}")]
    Hook { event: &'static str, message: String },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Field not present in result: {0}")]
    MissingField(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(Value),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl LayerError {
    /// Error raised from inside a hook callback.
    pub fn hook(event: &'static str, message: impl Into<String>) -> Self {
        LayerError::Hook {
            event,
            message: message.into(),
        }
    }

    /// True for errors raised ahead of any store call by the write guard.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            LayerError::ImmutableViolation(_) | LayerError::ProtectedFieldViolation(_)
        )
    }
}

impl From<serde_json::Error> for LayerError {
    fn from(e: serde_json::Error) -> Self {
        LayerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LayerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LayerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LayerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LayerError::Deserialization(e.to_string())
    }
}

/// Result type for layer operations.
pub type Result<T> = std::result::Result<T, LayerError>;
