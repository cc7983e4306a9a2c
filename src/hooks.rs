//! Mutation hooks.
//!
//! A collection carries a [`HookRegistry`] populated once when the collection
//! is defined. Write paths ask the registry whether an event family has any
//! hook before resolving affected records, so collections without hooks never
//! pay for the extra reads.
//!
//! Resolution of the affected records (explicit records, identifiers, or a
//! filter) is done by [`Collection::trigger`](crate::Collection::trigger);
//! the registry then calls the callback once per record.

use crate::error::Result;
use crate::record::Record;
use crate::store::values_equal;
use crate::types::{RawDocument, ID_FIELD};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Hook events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

impl HookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::BeforeSave => "before_save",
            HookEvent::AfterSave => "after_save",
            HookEvent::BeforeDelete => "before_delete",
            HookEvent::AfterDelete => "after_delete",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Payload delivered to a hook alongside the record.
#[derive(Clone, Copy, Debug, Default)]
pub struct HookPayload<'a> {
    /// Update document that triggered a save event.
    pub update: Option<&'a RawDocument>,
    /// Replacement (or inserted) document that triggered a save event.
    pub replacement: Option<&'a RawDocument>,
}

/// Event payload as held by the write path.
#[derive(Clone, Debug, Default)]
pub enum Payload {
    #[default]
    None,
    Update(RawDocument),
    Replacement(RawDocument),
    /// One replacement per affected document, matched by `_id`.
    Replacements(Vec<RawDocument>),
}

impl Payload {
    /// The view a hook on `record` receives.
    pub fn for_record(&self, record: &Record) -> HookPayload<'_> {
        match self {
            Payload::None => HookPayload::default(),
            Payload::Update(update) => HookPayload {
                update: Some(update),
                replacement: None,
            },
            Payload::Replacement(doc) => HookPayload {
                update: None,
                replacement: Some(doc),
            },
            Payload::Replacements(docs) => HookPayload {
                update: None,
                replacement: record.id().and_then(|id| {
                    docs.iter()
                        .find(|d| d.get(ID_FIELD).map(|v| values_equal(v, id)).unwrap_or(false))
                }),
            },
        }
    }
}

/// Which records an event applies to.
#[derive(Debug)]
pub enum HookTargets {
    /// Records already in hand.
    Records(Vec<Record>),
    /// Identifiers to resolve with a primary `_id: {$in: ...}` read.
    Ids(Vec<Value>),
    /// Filter to resolve with a primary read.
    Filter(RawDocument),
}

/// Hook callback. Errors propagate to the caller of the write.
pub type HookFn = Arc<dyn Fn(&mut Record, &HookPayload<'_>) -> Result<()> + Send + Sync>;

/// Event -> callback table.
#[derive(Clone, Default)]
pub struct HookRegistry {
    before_save: Option<HookFn>,
    after_save: Option<HookFn>,
    before_delete: Option<HookFn>,
    after_delete: Option<HookFn>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`, replacing any previous one.
    pub fn on<F>(mut self, event: HookEvent, callback: F) -> Self
    where
        F: Fn(&mut Record, &HookPayload<'_>) -> Result<()> + Send + Sync + 'static,
    {
        *self.slot_mut(event) = Some(Arc::new(callback));
        self
    }

    fn slot_mut(&mut self, event: HookEvent) -> &mut Option<HookFn> {
        match event {
            HookEvent::BeforeSave => &mut self.before_save,
            HookEvent::AfterSave => &mut self.after_save,
            HookEvent::BeforeDelete => &mut self.before_delete,
            HookEvent::AfterDelete => &mut self.after_delete,
        }
    }

    pub fn get(&self, event: HookEvent) -> Option<&HookFn> {
        match event {
            HookEvent::BeforeSave => self.before_save.as_ref(),
            HookEvent::AfterSave => self.after_save.as_ref(),
            HookEvent::BeforeDelete => self.before_delete.as_ref(),
            HookEvent::AfterDelete => self.after_delete.as_ref(),
        }
    }

    pub fn has(&self, event: HookEvent) -> bool {
        self.get(event).is_some()
    }

    pub fn has_save_hooks(&self) -> bool {
        self.has(HookEvent::BeforeSave) || self.has(HookEvent::AfterSave)
    }

    pub fn has_delete_hooks(&self) -> bool {
        self.has(HookEvent::BeforeDelete) || self.has(HookEvent::AfterDelete)
    }

    /// Invoke the `event` hook on each record. Stops at the first error.
    pub fn dispatch(&self, event: HookEvent, records: &mut [Record], payload: &Payload) -> Result<()> {
        let Some(callback) = self.get(event) else {
            return Ok(());
        };

        for record in records.iter_mut() {
            debug!(target: "doclayer::hooks", event = event.name(), id = ?record.id(), "dispatching hook");
            let view = payload.for_record(record);
            callback(record, &view)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before_save", &self.before_save.is_some())
            .field("after_save", &self.after_save.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .field("after_delete", &self.after_delete.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_table() {
        let hooks = HookRegistry::new().on(HookEvent::AfterSave, |_, _| Ok(()));
        assert!(hooks.has(HookEvent::AfterSave));
        assert!(!hooks.has(HookEvent::BeforeSave));
        assert!(hooks.has_save_hooks());
        assert!(!hooks.has_delete_hooks());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(HookEvent::BeforeSave.name(), "before_save");
        assert_eq!(HookEvent::AfterDelete.to_string(), "after_delete");
    }
}
