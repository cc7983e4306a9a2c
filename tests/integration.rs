//! Integration tests for the document layer.

use doclayer::{
    Collection, CollectionConfig, HookEvent, HookRegistry, MemoryStore, ObjectId, RawDocument,
    ReadArgs, ScalarKind, SortOrder, Structure, Template, WriteOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn doc(v: Value) -> RawDocument {
    v.as_object().cloned().unwrap()
}

fn site_structure() -> Structure {
    Structure::new()
        .field("name", Template::Scalar(ScalarKind::String))
        .field("url", Template::Scalar(ScalarKind::String))
        .field(
            "stats",
            Template::Nested(
                Structure::new()
                    .field("visits", Template::factory(|| json!(0)))
                    .field("last_status", Template::Scalar(ScalarKind::Int)),
            ),
        )
        .field("tags", Template::ListOf(Box::new(Template::Scalar(ScalarKind::String))))
        .field("owner", Template::Map)
}

fn test_sites(store: &Arc<MemoryStore>) -> Collection {
    Collection::new(
        store.clone(),
        CollectionConfig::new("sites").with_structure(site_structure()),
    )
}

// --- Realistic Workflow Tests ---

#[test]
fn test_crawler_workflow() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let store = Arc::new(MemoryStore::new("sites"));
    let sites = test_sites(&store);

    // New sites get their skeleton before being saved.
    let id = sites
        .insert(doc(json!({"name": "example", "url": "http://example.com"})))
        .unwrap();
    let stored = store.get_raw(&id).unwrap();
    assert_eq!(stored["stats"], json!({"visits": 0, "last_status": null}));
    assert_eq!(stored["tags"], json!([]));

    // A worker loads just the URL, then records a visit.
    let mut site = sites
        .find_by_id(&id, ReadArgs::new().with_fields(["_id", "url"]))
        .unwrap()
        .unwrap();
    assert_eq!(site.get("url"), Some(&json!("http://example.com")));

    site.save_partial(
        Some(doc(json!({"stats.visits": 1, "stats.last_status": 200}))),
        WriteOptions::default(),
    )
    .unwrap();

    // Later it needs the tags too.
    site.ensure(&["tags"]).unwrap();
    assert_eq!(site.get("tags"), Some(&json!([])));

    let stored = store.get_raw(&id).unwrap();
    assert_eq!(stored["stats"], json!({"visits": 1, "last_status": 200}));
    assert_eq!(stored["name"], json!("example"));
}

#[test]
fn test_catalog_queries() {
    let store = Arc::new(MemoryStore::new("sites"));
    let sites = test_sites(&store);
    for (name, visits, tags) in [
        ("a", 5, vec!["news"]),
        ("b", 1, vec!["blog", "news"]),
        ("c", 9, vec!["shop"]),
    ] {
        sites
            .insert(doc(json!({"name": name, "stats": {"visits": visits}, "tags": tags})))
            .unwrap();
    }

    let busiest = sites
        .find(
            ReadArgs::new()
                .with_fields(["name"])
                .with_sort("stats.visits", SortOrder::Descending)
                .with_limit(2),
        )
        .unwrap();
    let names: Vec<_> = busiest.iter().map(|r| r.get("name").cloned().unwrap()).collect();
    assert_eq!(names, vec![json!("c"), json!("a")]);

    assert_eq!(sites.count(doc(json!({"tags": "news"}))).unwrap(), 2);
    assert_eq!(
        sites.distinct("tags", RawDocument::new()).unwrap(),
        vec![json!("news"), json!("blog"), json!("shop")]
    );
    assert_eq!(
        sites
            .list_column(doc(json!({"stats.visits": {"$gte": 5}})), "name")
            .unwrap(),
        vec![json!("a"), json!("c")]
    );
    assert!(sites.exists(doc(json!({"name": "b"}))).unwrap());

    let paged = sites
        .find(ReadArgs::new().with_sort("name", SortOrder::Ascending).with_skip(1))
        .unwrap();
    assert_eq!(paged.len(), 2);
    assert_eq!(paged[0].get("name"), Some(&json!("b")));
}

#[test]
fn test_find_by_object_ids() {
    let store = Arc::new(MemoryStore::new("sites"));
    let sites = test_sites(&store);
    let ids: Vec<Value> = ["a", "b", "c"]
        .iter()
        .map(|name| sites.insert(doc(json!({"name": name}))).unwrap())
        .collect();

    let found = sites
        .find_by_ids(&ids[..2], ReadArgs::new().with_fields(["name"]))
        .unwrap();
    assert_eq!(found.len(), 2);

    let oid = ObjectId::from_hex(ids[2].as_str().unwrap()).unwrap();
    let by_b64 = sites
        .find_by_b64id(&oid.to_base64(), ReadArgs::new())
        .unwrap()
        .unwrap();
    assert_eq!(by_b64.get("name"), Some(&json!("c")));
    assert_eq!(by_b64.b64id(), Some(oid.to_base64()));

    let by_mapping = sites
        .find_by_id(&json!({"_id": ids[0].clone()}), ReadArgs::new())
        .unwrap()
        .unwrap();
    assert_eq!(by_mapping.get("name"), Some(&json!("a")));
}

#[test]
fn test_find_one_and_replace_with_projection() {
    let store = Arc::new(MemoryStore::new("sites"));
    store.insert_raw(doc(json!({"_id": 1, "name": "a", "url": "u"})));
    let sites = Collection::new(store.clone(), CollectionConfig::new("sites"));

    let after = sites
        .find_one_and_replace(
            doc(json!({"name": "a"})),
            doc(json!({"name": "a2", "url": "u2"})),
            ReadArgs::new().with_fields(["url"]).with_return_document("after"),
            WriteOptions::default(),
        )
        .unwrap()
        .unwrap();

    assert_eq!(after.get("url"), Some(&json!("u2")));
    assert!(after.get("name").is_none());
    assert!(!after.fetched().is_all());
    assert_eq!(store.get_raw(&json!(1)).unwrap()["name"], json!("a2"));
}

#[test]
fn test_legacy_surface() {
    let store = Arc::new(MemoryStore::new("jobs"));
    let saved: Arc<parking_lot::Mutex<usize>> = Arc::default();
    let counter = saved.clone();
    let hooks = HookRegistry::new().on(HookEvent::AfterSave, move |_, _| {
        *counter.lock() += 1;
        Ok(())
    });
    let jobs = Collection::with_hooks(store.clone(), CollectionConfig::new("jobs"), hooks);

    let mut job = doc(json!({"state": "queued"}));
    let id = jobs.save(&mut job, WriteOptions::default()).unwrap();
    jobs.save(&mut doc(json!({"state": "queued"})), WriteOptions::default())
        .unwrap();

    let record = jobs.insert_record(doc(json!({"state": "done"}))).unwrap();
    assert!(record.id().is_some());
    assert!(!record.is_fully_loaded_as_input());

    let updated = jobs
        .update(
            &doc(json!({"state": "queued"})),
            doc(json!({"$set": {"state": "running"}})),
            true,
            WriteOptions::default(),
        )
        .unwrap();
    assert_eq!(updated.modified_count, 2);
    // 3 saves + 2 modified documents
    assert_eq!(*saved.lock(), 5);

    assert_eq!(jobs.remove(&id).unwrap().deleted_count, 1);
    assert_eq!(jobs.remove(&json!({"state": "running"})).unwrap().deleted_count, 1);
    assert_eq!(jobs.remove(&Value::Null).unwrap().deleted_count, 1);
    assert!(store.is_empty());
}

#[test]
fn test_references_and_size() {
    let store = Arc::new(MemoryStore::new("pages"));
    store.insert_raw(doc(json!({
        "_id": "p1",
        "site": {"$ref": "sites", "$id": "s1", "$db": "crawl"},
        "body": "x".repeat(100)
    })));
    let pages = Collection::new(store, CollectionConfig::new("pages"));

    let page = pages.find_by_id(&json!("p1"), ReadArgs::new()).unwrap().unwrap();
    let site = page.reference("site").unwrap();
    assert_eq!(site.collection, "sites");
    assert_eq!(site.id, json!("s1"));
    assert_eq!(site.database.as_deref(), Some("crawl"));
    assert!(page.size().unwrap() > 100);
    page.validate().unwrap();
}

#[test]
fn test_clones_share_collection() {
    let store = Arc::new(MemoryStore::new("sites"));
    store.insert_raw(doc(json!({"_id": 1, "name": "a"})));
    let sites = Collection::new(store.clone(), CollectionConfig::new("sites"));

    let original = sites.find_by_id(&json!(1), ReadArgs::new()).unwrap().unwrap();
    let mut copy = original.clone();
    copy.insert("name", json!("b"));

    assert_eq!(original.get("name"), Some(&json!("a")));
    assert_eq!(copy.collection().name(), original.collection().name());
    assert_ne!(original, copy);
}
