//! Partial-fetch bookkeeping on records.

use doclayer::{
    Collection, CollectionConfig, FieldSet, Fetched, MemoryStore, OpKind, RawDocument, ReadArgs,
    ReadPreference, SaveOptions, Structure, Template, WriteOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn doc(v: Value) -> RawDocument {
    v.as_object().cloned().unwrap()
}

fn site_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("sites"));
    store.insert_raw(doc(json!({
        "_id": "s1",
        "name": "example",
        "url": "http://example.com",
        "stats": {"visits": 10, "errors": 2},
        "tags": ["a"]
    })));
    store
}

fn sites(store: &Arc<MemoryStore>) -> Collection {
    Collection::new(store.clone(), CollectionConfig::new("sites"))
}

fn fields(names: &[&str]) -> FieldSet {
    names.iter().copied().collect()
}

// --- Projections ---

#[test]
fn test_projection_sets_fetched_fields() {
    let store = site_store();
    let sites = sites(&store);

    let record = sites
        .find_one(ReadArgs::new().with_fields(["name", "url"]))
        .unwrap()
        .unwrap();

    assert_eq!(record.fetched(), &Fetched::Only(fields(&["name", "url"])));
    assert!(!record.is_fully_loaded_as_input());
    // _id is not implicitly included
    assert!(record.id().is_none());
}

#[test]
fn test_mapping_projection_with_id() {
    let store = site_store();
    let sites = sites(&store);

    let record = sites
        .find_one(ReadArgs::new().with_projection(doc(json!({"_id": 1, "name": 1, "url": 0}))))
        .unwrap()
        .unwrap();

    assert_eq!(record.fetched(), &Fetched::Only(fields(&["_id", "name"])));
    assert_eq!(record.id(), Some(&json!("s1")));
}

#[test]
fn test_unfiltered_load_fetches_all() {
    let store = site_store();
    let record = sites(&store).find_one(RawDocument::new()).unwrap().unwrap();
    assert!(record.fetched().is_all());
    assert_eq!(record.get("url"), Some(&json!("http://example.com")));
}

// --- ensure ---

#[test]
fn test_ensure_twice_reads_once() {
    let store = site_store();
    let sites = sites(&store);
    let mut record = sites
        .find_one(ReadArgs::new().with_fields(["_id", "name"]))
        .unwrap()
        .unwrap();
    store.clear_op_log();

    record.ensure(&["stats"]).unwrap();
    record.ensure(&["stats"]).unwrap();

    assert_eq!(store.reads(), 1);
    let op = &store.op_log()[0];
    assert_eq!(op.kind, OpKind::Find);
    assert_eq!(op.filter, doc(json!({"_id": "s1"})));
    assert_eq!(op.read_preference, Some(ReadPreference::Primary));

    assert_eq!(record.get("stats"), Some(&json!({"visits": 10, "errors": 2})));
    assert_eq!(record.fetched(), &Fetched::Only(fields(&["_id", "name", "stats"])));
}

#[test]
fn test_ensure_fetches_only_missing_keys() {
    let store = site_store();
    let sites = sites(&store);
    let mut record = sites
        .find_one(ReadArgs::new().with_fields(["_id", "name"]))
        .unwrap()
        .unwrap();
    store.clear_op_log();

    record.ensure(&["name"]).unwrap();
    assert_eq!(store.reads(), 0);

    record.ensure(&["name", "url"]).unwrap();
    assert_eq!(store.reads(), 1);
    assert_eq!(record.get("url"), Some(&json!("http://example.com")));
}

#[test]
fn test_ensure_on_full_load_is_noop() {
    let store = site_store();
    let mut record = sites(&store).find_one(RawDocument::new()).unwrap().unwrap();
    store.clear_op_log();
    record.ensure_with(&["name"], true).unwrap();
    assert_eq!(store.reads(), 0);
}

#[test]
fn test_forced_ensure_overwrites_local_edits() {
    let store = site_store();
    let sites = sites(&store);
    let mut record = sites
        .find_one(ReadArgs::new().with_fields(["_id", "name"]))
        .unwrap()
        .unwrap();

    record.insert("name", json!("edited"));
    record.ensure(&["name"]).unwrap();
    assert_eq!(record.get("name"), Some(&json!("edited")));

    record.ensure_with(&["name"], true).unwrap();
    assert_eq!(record.get("name"), Some(&json!("example")));
}

#[test]
fn test_refetch_of_absent_field_marks_it_fetched() {
    let store = site_store();
    let sites = sites(&store);
    let mut record = sites
        .find_one(ReadArgs::new().with_fields(["_id"]))
        .unwrap()
        .unwrap();

    record.ensure(&["nope"]).unwrap();
    assert!(record.get("nope").is_none());
    assert!(record.fetched().contains("nope"));

    store.clear_op_log();
    record.ensure(&["nope"]).unwrap();
    assert_eq!(store.reads(), 0);
}

// --- save_partial ---

#[test]
fn test_save_partial_nested_path() {
    let store = site_store();
    let sites = sites(&store);
    let mut record = sites
        .find_one(ReadArgs::new().with_fields(["_id", "name"]))
        .unwrap()
        .unwrap();

    record
        .save_partial(Some(doc(json!({"stats.visits": 30}))), WriteOptions::default())
        .unwrap();

    // Remote: only the nested path changed.
    let stored = store.get_raw(&json!("s1")).unwrap();
    assert_eq!(stored["stats"], json!({"visits": 30, "errors": 2}));
    assert_eq!(stored["name"], json!("example"));

    // Local: the path was applied even though stats was never loaded.
    assert_eq!(record.get_path("stats.visits"), Some(&json!(30)));

    // Siblings survive a reload.
    record.reload().unwrap();
    assert_eq!(record.get_path("stats.errors"), Some(&json!(2)));
    assert_eq!(record.get_path("stats.visits"), Some(&json!(30)));
}

#[test]
fn test_save_partial_defaults_to_whole_record() {
    let store = site_store();
    let sites = sites(&store);
    let mut record = sites
        .find_one(ReadArgs::new().with_fields(["_id", "name"]))
        .unwrap()
        .unwrap();

    record.insert("name", json!("renamed"));
    record.save_partial(None, WriteOptions::default()).unwrap();

    let stored = store.get_raw(&json!("s1")).unwrap();
    assert_eq!(stored["name"], json!("renamed"));
    // Fields the record never loaded are untouched.
    assert_eq!(stored["url"], json!("http://example.com"));

    let update = store
        .op_log()
        .into_iter()
        .find(|op| op.kind == OpKind::UpdateOne)
        .unwrap();
    assert_eq!(update.filter, doc(json!({"_id": "s1"})));
}

// --- unset / reload ---

#[test]
fn test_unset_then_reload_other_copy() {
    let store = site_store();
    let sites = sites(&store);
    let mut first = sites.find_by_id(&json!("s1"), ReadArgs::new()).unwrap().unwrap();
    let mut second = sites.find_by_id(&json!("s1"), ReadArgs::new()).unwrap().unwrap();

    first.unset(&["name"]).unwrap();
    assert!(!first.contains_key("name"));
    assert!(!store.get_raw(&json!("s1")).unwrap().contains_key("name"));

    assert!(second.contains_key("name"));
    second.reload().unwrap();
    assert!(!second.contains_key("name"));
}

#[test]
fn test_reload_keeps_unset_templated_field_absent() {
    let store = site_store();
    let structure = Structure::new().field("name", Template::Scalar(doclayer::ScalarKind::String));
    let sites = Collection::new(
        store.clone(),
        CollectionConfig::new("sites").with_structure(structure),
    );
    let mut first = sites.find_by_id(&json!("s1"), ReadArgs::new()).unwrap().unwrap();
    let mut second = sites.find_by_id(&json!("s1"), ReadArgs::new()).unwrap().unwrap();

    first.unset(&["name"]).unwrap();
    second.reload().unwrap();
    assert!(!second.contains_key("name"));

    second.save_partial(None, WriteOptions::default()).unwrap();
    let stored = store.get_raw(&json!("s1")).unwrap();
    assert!(!stored.contains_key("name"));
    assert_eq!(stored["url"], json!("http://example.com"));
}

#[test]
fn test_reload_resets_fetch_state() {
    let store = site_store();
    let sites = sites(&store);
    let mut record = sites
        .find_one(ReadArgs::new().with_fields(["_id"]))
        .unwrap()
        .unwrap();

    record.reload().unwrap();
    assert!(record.fetched().is_all());
    assert!(!record.is_fully_loaded_as_input());
    assert_eq!(record.get("name"), Some(&json!("example")));
}

// --- save ---

#[test]
fn test_input_record_save_then_plain_save_fails() {
    let store = Arc::new(MemoryStore::new("sites"));
    let sites = sites(&store);

    let mut record = sites.record(doc(json!({"name": "new"})));
    let id = record.save(SaveOptions::default()).unwrap();
    assert_eq!(record.id(), Some(&id));
    assert!(!record.is_fully_loaded_as_input());

    assert!(record.save(SaveOptions::default()).is_err());
    record.save(SaveOptions::forced()).unwrap();
}

// --- skeleton ---

#[test]
fn test_skeleton_only_on_full_loads() {
    let store = site_store();
    let structure = Structure::new()
        .field("name", Template::Scalar(doclayer::ScalarKind::String))
        .field("owner", Template::Map)
        .field("history", Template::List);
    let sites = Collection::new(
        store.clone(),
        CollectionConfig::new("sites").with_structure(structure),
    );

    let partial = sites
        .find_one(ReadArgs::new().with_fields(["name"]))
        .unwrap()
        .unwrap();
    assert!(!partial.contains_key("owner"));
    assert!(!partial.contains_key("history"));

    let full = sites.find_one(RawDocument::new()).unwrap().unwrap();
    assert_eq!(full.get("owner"), Some(&json!({})));
    assert_eq!(full.get("history"), Some(&json!([])));
    assert_eq!(full.get("name"), Some(&json!("example")));
}

// --- cursor batches ---

#[test]
fn test_every_batch_is_wrapped() {
    let store = Arc::new(MemoryStore::new("sites"));
    for i in 0..7 {
        store.insert_raw(doc(json!({"_id": i, "n": i})));
    }
    let sites = sites(&store);

    let records = sites
        .find(ReadArgs::new().with_fields(["n"]).with_batch_size(3))
        .unwrap();

    assert_eq!(records.len(), 7);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.get("n"), Some(&json!(i)));
        assert_eq!(record.fetched(), &Fetched::Only(fields(&["n"])));
        assert_eq!(record.collection().name(), "sites");
    }
}
