//! find operators, browse, and full-text search.

use std::collections::HashSet;

use tempfile::TempDir;

use crate::engine::tests::helpers::*;
use crate::model::Value;
use crate::query::{Conjunction, Operator, Symbol};

#[test]
fn find_equality_uses_canonical_bytes() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("age", Value::Int64(18), 1).unwrap();
    engine.add("age", Value::Float64(18.5), 2).unwrap();

    let hits = engine
        .find("age", Operator::Eq, &[Value::Float64(18.0)])
        .unwrap();
    assert_eq!(hits, HashSet::from([1]));
}

#[test]
fn find_range_operators() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("age", Value::Int64(15), 1).unwrap();
    engine.add("age", Value::Int64(19), 2).unwrap();
    engine.add("age", Value::Int64(30), 3).unwrap();

    assert_eq!(
        engine.find("age", Operator::Gt, &[Value::Int64(18)]).unwrap(),
        HashSet::from([2, 3])
    );
    assert_eq!(
        engine.find("age", Operator::Le, &[Value::Int64(19)]).unwrap(),
        HashSet::from([1, 2])
    );
    assert_eq!(
        engine
            .find(
                "age",
                Operator::Between,
                &[Value::Int64(15), Value::Int64(30)]
            )
            .unwrap(),
        HashSet::from([1, 2]),
        "BETWEEN is low-inclusive, high-exclusive"
    );
    assert_eq!(
        engine.find("age", Operator::Ne, &[Value::Int64(19)]).unwrap(),
        HashSet::from([1, 3])
    );
}

#[test]
fn find_pattern_operators() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("name", Value::String("jeffery".into()), 1).unwrap();
    engine.add("name", Value::String("ashleah".into()), 2).unwrap();
    engine.add("name", Value::Int64(42), 3).unwrap();

    assert_eq!(
        engine
            .find("name", Operator::Regex, &[Value::String("j.*".into())])
            .unwrap(),
        HashSet::from([1])
    );
    assert_eq!(
        engine
            .find("name", Operator::Like, &[Value::String("%lea%".into())])
            .unwrap(),
        HashSet::from([2])
    );
    // Non-text values never match a pattern, positive or negative.
    assert_eq!(
        engine
            .find("name", Operator::NotRegex, &[Value::String("j.*".into())])
            .unwrap(),
        HashSet::from([2])
    );
}

#[test]
fn find_links_to() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("manager", Value::Link(9), 1).unwrap();
    engine.add("manager", Value::Link(8), 2).unwrap();

    assert_eq!(
        engine
            .find("manager", Operator::LinksTo, &[Value::Link(9)])
            .unwrap(),
        HashSet::from([1])
    );
    // Integer operands coerce to record references.
    assert_eq!(
        engine
            .find("manager", Operator::LinksTo, &[Value::Int64(8)])
            .unwrap(),
        HashSet::from([2])
    );
}

#[test]
fn find_arity_errors_are_parse_errors() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    let err = engine.find("age", Operator::Between, &[Value::Int64(1)]);
    assert!(matches!(err, Err(crate::engine::EngineError::Parse(_))));
}

#[test]
fn browse_groups_records_by_value() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("age", Value::Int64(30), 1).unwrap();
    engine.add("age", Value::Int64(30), 2).unwrap();
    engine.add("age", Value::Int64(19), 3).unwrap();

    let browse = engine.browse("age").unwrap();
    assert_eq!(browse.len(), 2);
    assert_eq!(browse[&Value::Int64(30)], HashSet::from([1, 2]));
    assert_eq!(browse[&Value::Int64(19)], HashSet::from([3]));
}

#[test]
fn postfix_queue_evaluation() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("age", Value::Int64(30), 1).unwrap();
    engine.add("city", Value::Tag("atlanta".into()), 1).unwrap();
    engine.add("age", Value::Int64(30), 2).unwrap();
    engine.add("city", Value::Tag("savannah".into()), 2).unwrap();

    // age = 30 AND city = atlanta
    let symbols = vec![
        Symbol::Expression {
            key: "age".into(),
            operator: Operator::Eq,
            values: vec![Value::Int64(30)],
        },
        Symbol::Expression {
            key: "city".into(),
            operator: Operator::Eq,
            values: vec![Value::Tag("atlanta".into())],
        },
        Symbol::Conjunction(Conjunction::And),
    ];
    assert_eq!(
        crate::query::evaluate(&engine, &symbols).unwrap(),
        HashSet::from([1])
    );

    // OR combines.
    let symbols = vec![
        Symbol::Expression {
            key: "city".into(),
            operator: Operator::Eq,
            values: vec![Value::Tag("atlanta".into())],
        },
        Symbol::Expression {
            key: "city".into(),
            operator: Operator::Eq,
            values: vec![Value::Tag("savannah".into())],
        },
        Symbol::Conjunction(Conjunction::Or),
    ];
    assert_eq!(
        crate::query::evaluate(&engine, &symbols).unwrap(),
        HashSet::from([1, 2])
    );
}

#[test]
fn search_intersects_all_query_tokens() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine
        .add("name", Value::String("hello world".into()), 1)
        .unwrap();
    engine
        .add("name", Value::String("hello there".into()), 2)
        .unwrap();

    assert_eq!(
        engine.search("name", "llo wo").unwrap(),
        HashSet::from([1])
    );
    assert_eq!(
        engine.search("name", "hello").unwrap(),
        HashSet::from([1, 2])
    );
    assert!(engine.search("name", "xyz").unwrap().is_empty());
}

#[test]
fn search_ignores_tags_and_removed_values() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("name", Value::Tag("hello".into()), 1).unwrap();
    engine
        .add("name", Value::String("hello".into()), 2)
        .unwrap();
    engine
        .remove("name", Value::String("hello".into()), 2)
        .unwrap();

    assert!(engine.search("name", "hello").unwrap().is_empty());
}

#[test]
fn search_with_overlong_token_is_empty() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine
        .add("name", Value::String("abcdefghijklmnop".into()), 1)
        .unwrap();
    // Longer than the default substring cap — cannot be indexed.
    assert!(engine.search("name", "abcdefghijklmnop").unwrap().is_empty());
    // But a prefix within the cap matches.
    assert_eq!(engine.search("name", "abcdefghij").unwrap(), HashSet::from([1]));
}
