use std::fs;

use harvester_core::{ItemState, WorkItem};
use harvester_engine::{OutputRecord, ProgressError, ProgressStore};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|key| key.to_string()).collect()
}

#[test]
fn load_accepts_strings_and_integers() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("input.json");
    fs::write(&path, r#"["A", 1000123, "C"]"#).unwrap();

    assert_eq!(ProgressStore::load(&path).unwrap(), keys(&["A", "1000123", "C"]));
}

#[test]
fn load_refuses_duplicates_and_odd_entries() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("input.json");

    fs::write(&path, r#"["A", "B", "A"]"#).unwrap();
    assert!(matches!(
        ProgressStore::load(&path),
        Err(ProgressError::DuplicateKey(key)) if key == "A"
    ));

    fs::write(&path, r#"["A", {"k": 1}]"#).unwrap();
    assert!(matches!(
        ProgressStore::load(&path),
        Err(ProgressError::InvalidKey { index: 1 })
    ));

    fs::write(&path, "not json").unwrap();
    assert!(matches!(
        ProgressStore::load(&path),
        Err(ProgressError::Parse { .. })
    ));
}

#[test]
fn missing_or_empty_output_opens_empty() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("output.json");
    assert!(ProgressStore::open(&path).unwrap().is_empty());

    fs::write(&path, "").unwrap();
    let store = ProgressStore::open(&path).unwrap();
    assert!(store.is_empty());
    assert_eq!(store.resume_index(&keys(&["A", "B"])), 0);
}

#[test]
fn resume_index_follows_last_record() {
    let store = ProgressStore::from_records(vec![
        OutputRecord {
            key: "A".into(),
            result: Some(json!({"name": "a"})),
        },
        OutputRecord {
            key: "B".into(),
            result: None,
        },
    ]);
    let input = keys(&["A", "B", "C", "D"]);
    assert_eq!(store.checkpoint(), Some("B"));
    assert_eq!(store.resume_index(&input), 2);

    // Checkpoint at the end means nothing left to do.
    assert_eq!(store.resume_index(&keys(&["A", "B"])), 2);
    // Unknown checkpoint restarts from the top.
    assert_eq!(store.resume_index(&keys(&["X", "Y"])), 0);
}

#[test]
fn item_state_reflects_payload() {
    let mut store = ProgressStore::default();
    store.record("A", Some(json!({"shop": 1})));
    store.record("B", None);
    store.record("C", Some(json!({})));

    assert_eq!(store.item_state("A"), ItemState::Fresh);
    assert_eq!(store.item_state("B"), ItemState::Stale);
    assert_eq!(store.item_state("C"), ItemState::Stale);
    assert_eq!(store.item_state("D"), ItemState::Missing);

    let item = store.item("A");
    assert!(!item.needs_query());
    assert!(store.item("B").needs_query());
}

#[test]
fn recording_an_existing_key_updates_in_place() {
    let mut store = ProgressStore::default();
    store.record("A", None);
    store.record("B", None);
    store.record_item(&WorkItem {
        key: "A".into(),
        state: ItemState::Fresh,
        payload: Some(json!({"shop": "a"})),
    });

    let order: Vec<_> = store.records().iter().map(|r| r.key.as_str()).collect();
    assert_eq!(order, vec!["A", "B"]);
    assert_eq!(store.item_state("A"), ItemState::Fresh);
    assert_eq!(store.checkpoint(), Some("B"));
    assert_eq!(store.unflushed(), 3);
}

#[test]
fn flush_round_trips_through_open() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("out").join("output.json");

    let mut store = ProgressStore::default();
    store.record("A", Some(json!({"shop": "a"})));
    store.record("B", None);
    store.flush(&path).unwrap();
    assert_eq!(store.unflushed(), 0);

    let reopened = ProgressStore::open(&path).unwrap();
    assert_eq!(reopened.records(), store.records());
    assert_eq!(reopened.unflushed(), 0);

    let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(
        raw,
        json!([
            {"key": "A", "result": {"shop": "a"}},
            {"key": "B", "result": null}
        ])
    );
}

#[test]
fn failed_flush_keeps_prior_output() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("blocker");
    fs::write(&blocker, "prior").unwrap();

    let mut store = ProgressStore::default();
    store.record("A", None);
    let err = store.flush(&blocker.join("output.json")).unwrap_err();
    assert!(matches!(err, ProgressError::Persist(_)));
    assert_eq!(fs::read_to_string(&blocker).unwrap(), "prior");
    assert_eq!(store.unflushed(), 1);
}
