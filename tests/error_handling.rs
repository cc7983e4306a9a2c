//! Error handling and edge case tests.

use doclayer::{
    Codec, Collection, CollectionConfig, Fetched, HookEvent, HookRegistry, LayerError,
    MemoryStore, MessagePackCodec, OpKind, RawDocument, ReadArgs, Record, SaveOptions,
    WriteOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn doc(v: Value) -> RawDocument {
    v.as_object().cloned().unwrap()
}

fn test_collection() -> (Arc<MemoryStore>, Collection) {
    let store = Arc::new(MemoryStore::new("items"));
    store.insert_raw(doc(json!({"_id": 1, "name": "a"})));
    store.insert_raw(doc(json!({"_id": 2, "name": "a"})));
    let items = Collection::new(store.clone(), CollectionConfig::default());
    (store, items)
}

/// A loaded record that lost its identifier.
fn anonymous(items: &Collection) -> Record {
    Record::from_store(
        items.clone(),
        doc(json!({"name": "a"})),
        Fetched::Only(["name"].into_iter().collect()),
    )
}

// --- Record Errors ---

#[test]
fn test_save_requires_input_or_force() {
    let (store, items) = test_collection();
    let mut record = items.find_by_id(&json!(1), ReadArgs::new()).unwrap().unwrap();

    assert!(matches!(
        record.save(SaveOptions::default()),
        Err(LayerError::NotFullyLoaded)
    ));
    assert_eq!(store.calls(OpKind::ReplaceOne), 0);

    record.save(SaveOptions::forced()).unwrap();
    assert_eq!(store.calls(OpKind::ReplaceOne), 1);

    assert!(matches!(
        record.save(SaveOptions::default()),
        Err(LayerError::NotFullyLoaded)
    ));
}

#[test]
fn test_operations_without_id() {
    let (store, items) = test_collection();
    store.clear_op_log();
    let mut record = anonymous(&items);

    assert!(matches!(record.ensure(&["url"]), Err(LayerError::MissingIdentifier)));
    assert!(matches!(record.refetch(&["url"]), Err(LayerError::MissingIdentifier)));
    assert!(matches!(record.reload(), Err(LayerError::MissingIdentifier)));
    assert!(matches!(record.unset(&["name"]), Err(LayerError::MissingIdentifier)));
    assert!(matches!(record.delete(), Err(LayerError::MissingIdentifier)));
    assert!(matches!(
        record.save_partial(None, WriteOptions::default()),
        Err(LayerError::MissingIdentifier)
    ));

    assert!(store.op_log().is_empty());
}

#[test]
fn test_ensure_of_fetched_keys_needs_no_id() {
    let (_, items) = test_collection();
    let mut record = anonymous(&items);
    record.ensure(&["name"]).unwrap();
}

#[test]
fn test_reload_after_remote_delete() {
    let (_, items) = test_collection();
    let mut record = items.find_by_id(&json!(2), ReadArgs::new()).unwrap().unwrap();
    items.delete_one(&doc(json!({"_id": 2}))).unwrap();

    match record.reload() {
        Err(LayerError::StaleReference(id)) => assert_eq!(id, json!(2)),
        other => panic!("expected stale reference, got {:?}", other),
    }
    // Local content is kept on failure.
    assert_eq!(record.get("name"), Some(&json!("a")));
}

// --- Query Errors ---

#[test]
fn test_one_with_several_matches() {
    let (store, items) = test_collection();
    store.clear_op_log();
    let result = items.one(doc(json!({"name": "a"})));
    assert!(matches!(result, Err(LayerError::MultipleResultsFound(2))));
    assert_eq!(store.reads(), 1);
}

#[test]
fn test_filter_and_spec_together() {
    let (_, items) = test_collection();
    let result = items.find(
        ReadArgs::new()
            .with_filter(doc(json!({"_id": 1})))
            .with_spec(doc(json!({"_id": 2}))),
    );
    assert!(matches!(result, Err(LayerError::InvalidArgument(_))));
}

#[test]
fn test_bad_return_document() {
    let (store, items) = test_collection();
    let result = items.find_one_and_update(
        doc(json!({"_id": 1})),
        doc(json!({"$set": {"name": "b"}})),
        ReadArgs::new().with_return_document("sometime"),
        WriteOptions::default(),
    );
    assert!(matches!(result, Err(LayerError::InvalidArgument(_))));
    assert_eq!(store.calls(OpKind::FindOneAndUpdate), 0);
}

#[test]
fn test_unsupported_operator() {
    let (_, items) = test_collection();
    let result = items.find(doc(json!({"name": {"$regex": "a"}})));
    assert!(matches!(result, Err(LayerError::InvalidArgument(_))));
}

// --- Store Errors ---

#[test]
fn test_duplicate_insert_propagates() {
    let (_, items) = test_collection();
    match items.insert_one(doc(json!({"_id": 1})), WriteOptions::default()) {
        Err(LayerError::DuplicateKey(id)) => assert_eq!(id, json!(1)),
        other => panic!("expected duplicate key, got {:?}", other),
    }
}

#[test]
fn test_update_without_operators() {
    let (_, items) = test_collection();
    let result = items.update_one(
        &doc(json!({"_id": 1})),
        doc(json!({"name": "b"})),
        WriteOptions::default(),
    );
    assert!(matches!(result, Err(LayerError::InvalidArgument(_))));
}

// --- Hook Errors ---

#[test]
fn test_before_delete_error_keeps_document() {
    let store = Arc::new(MemoryStore::new("items"));
    store.insert_raw(doc(json!({"_id": 1})));
    let hooks = HookRegistry::new().on(HookEvent::BeforeDelete, |record, _| {
        Err(LayerError::hook(
            "before_delete",
            format!("{:?} is pinned", record.id()),
        ))
    });
    let items = Collection::with_hooks(store.clone(), CollectionConfig::default(), hooks);

    let err = items.delete_many(&RawDocument::new()).unwrap_err();
    assert!(matches!(err, LayerError::Hook { event: "before_delete", .. }));
    assert!(err.to_string().contains("pinned"));
    assert_eq!(store.len(), 1);
}

// --- Codec Errors ---

#[test]
fn test_codec_rejects_bad_frames() {
    let codec = MessagePackCodec;
    let frame = codec.encode(&doc(json!({"a": 1}))).unwrap();

    let mut oversized = frame.clone();
    oversized[0] = 0xff;
    assert!(matches!(codec.decode(&oversized), Err(LayerError::Deserialization(_))));

    assert!(matches!(codec.decode(&frame[..2]), Err(LayerError::Deserialization(_))));

    let mut garbage = frame.clone();
    for byte in garbage.iter_mut().skip(4) {
        *byte = 0xc1;
    }
    assert!(codec.decode(&garbage).is_err());
}

#[test]
fn test_policy_violation_classification() {
    assert!(LayerError::ImmutableViolation("x".into()).is_policy_violation());
    assert!(LayerError::ProtectedFieldViolation(vec!["f".into()]).is_policy_violation());
    assert!(!LayerError::NotFullyLoaded.is_policy_violation());
}
