//! CRUD surface: add/remove/set/reconcile, verify/fetch/select/describe,
//! audit and revert.

use std::collections::HashSet;

use tempfile::TempDir;

use crate::engine::tests::helpers::*;
use crate::model::Value;

#[test]
fn add_verify_remove_round_trip() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    assert!(engine.add("name", Value::String("jeff".into()), 1).unwrap());
    assert!(engine.verify("name", &Value::String("jeff".into()), 1).unwrap());

    assert!(engine.remove("name", Value::String("jeff".into()), 1).unwrap());
    assert!(!engine.verify("name", &Value::String("jeff".into()), 1).unwrap());
    assert!(engine.fetch("name", 1).unwrap().is_empty());
}

#[test]
fn duplicate_add_and_absent_remove_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    assert!(engine.add("k", Value::Int64(1), 1).unwrap());
    assert!(!engine.add("k", Value::Int64(1), 1).unwrap(), "triple already present");
    assert!(!engine.remove("k", Value::Int64(2), 1).unwrap(), "triple absent");
}

#[test]
fn canonical_equivalents_collide_on_write() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    assert!(engine.add("age", Value::Int64(18), 1).unwrap());
    // 18.0 is the same canonical triple.
    assert!(!engine.add("age", Value::Float64(18.0), 1).unwrap());
    assert!(engine.remove("age", Value::Float64(18.0), 1).unwrap());
    assert!(engine.fetch("age", 1).unwrap().is_empty());
}

#[test]
fn keys_hold_multi_valued_sets() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("tags", Value::Tag("alpha".into()), 1).unwrap();
    engine.add("tags", Value::Tag("beta".into()), 1).unwrap();

    let values = engine.fetch("tags", 1).unwrap();
    assert_eq!(values.len(), 2);
    assert!(values.contains(&Value::Tag("alpha".into())));
}

#[test]
fn set_replaces_all_values() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("color", Value::Tag("red".into()), 1).unwrap();
    engine.add("color", Value::Tag("blue".into()), 1).unwrap();
    engine.set("color", Value::Tag("green".into()), 1).unwrap();

    let values = engine.fetch("color", 1).unwrap();
    assert_eq!(values, HashSet::from([Value::Tag("green".into())]));
}

#[test]
fn reconcile_matches_the_desired_set() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    for v in ["A", "C", "D", "E", "F"] {
        engine.add("testKey", Value::Tag(v.into()), 1).unwrap();
    }
    engine
        .reconcile(
            "testKey",
            1,
            ["A", "B", "D", "G"].map(|v| Value::Tag(v.into())),
        )
        .unwrap();

    let expected: HashSet<Value> = ["A", "B", "D", "G"]
        .map(|v| Value::Tag(v.into()))
        .into_iter()
        .collect();
    assert_eq!(engine.fetch("testKey", 1).unwrap(), expected);

    // Reconciling with the empty set clears the field.
    engine.reconcile("testKey", 1, []).unwrap();
    assert!(engine.fetch("testKey", 1).unwrap().is_empty());

    // Duplicates in the input collapse to set semantics.
    engine
        .reconcile(
            "testKey",
            1,
            [Value::Tag("X".into()), Value::Tag("X".into())],
        )
        .unwrap();
    assert_eq!(engine.fetch("testKey", 1).unwrap().len(), 1);
}

#[test]
fn select_and_describe() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("name", Value::String("jeff".into()), 1).unwrap();
    engine.add("age", Value::Int64(30), 1).unwrap();
    engine.remove("age", Value::Int64(30), 1).unwrap();

    let selected = engine.select(1).unwrap();
    assert_eq!(selected.len(), 1);
    assert!(selected.contains_key("name"));
    assert_eq!(
        engine.describe(1).unwrap().into_iter().collect::<Vec<_>>(),
        vec!["name".to_string()]
    );
}

#[test]
fn time_travel_reads() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("k", Value::Int64(1), 1).unwrap();
    let checkpoint = engine.time();
    engine.add("k", Value::Int64(2), 1).unwrap();

    let past = engine.fetch_at("k", 1, checkpoint).unwrap();
    assert_eq!(past, HashSet::from([Value::Int64(1)]));
    assert_eq!(engine.fetch("k", 1).unwrap().len(), 2);
}

#[test]
fn audit_is_version_ordered() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("k", Value::Int64(1), 1).unwrap();
    engine.add("other", Value::Int64(9), 1).unwrap();
    engine.remove("k", Value::Int64(1), 1).unwrap();

    let full = engine.audit_record(1).unwrap();
    assert_eq!(full.len(), 3);
    let versions: Vec<u64> = full.iter().map(|(v, _)| *v).collect();
    assert!(versions.windows(2).all(|w| w[0] < w[1]));

    let field = engine.audit_field("k", 1).unwrap();
    assert_eq!(field.len(), 2);
    assert!(field[0].1.contains("ADD"));
    assert!(field[1].1.contains("REMOVE"));
}

#[test]
fn revert_restores_a_past_state() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("k", Value::Int64(1), 1).unwrap();
    engine.add("k", Value::Int64(2), 1).unwrap();
    let checkpoint = engine.time();
    engine.remove("k", Value::Int64(1), 1).unwrap();
    engine.add("k", Value::Int64(3), 1).unwrap();

    engine.revert("k", 1, checkpoint).unwrap();
    assert_eq!(
        engine.fetch("k", 1).unwrap(),
        HashSet::from([Value::Int64(1), Value::Int64(2)])
    );
}

#[test]
fn inventory_lists_every_record_written() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("k", Value::Int64(1), 3).unwrap();
    engine.add("k", Value::Int64(1), 9).unwrap();
    // A removed triple still leaves the record in the inventory.
    engine.remove("k", Value::Int64(1), 9).unwrap();

    assert_eq!(engine.inventory(), vec![3, 9]);
    assert!(engine.contains(3));
    assert!(!engine.contains(4));
}

#[test]
fn empty_keys_and_empty_text_values_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    assert!(engine.add("", Value::Int64(1), 1).is_err());
    assert!(engine.add("k", Value::String(String::new()), 1).is_err());
}
