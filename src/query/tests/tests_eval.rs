//! Leaf evaluation and postfix structure errors.

use std::collections::HashSet;

use tempfile::TempDir;

use crate::engine::tests::helpers::open_engine;
use crate::model::{Action, Key, Value, Write};
use crate::query::{Conjunction, Operator, QueryError, Symbol, evaluate, evaluate_leaf};
use crate::record::{IndexRecord, PRESENT};

fn index_with(entries: &[(u64, Value)]) -> IndexRecord {
    let mut index = IndexRecord::new("k");
    for (version, (record, value)) in entries.iter().enumerate() {
        index.append(Write {
            record: *record,
            key: Key::new("k").unwrap(),
            value: value.clone(),
            version: version as u64 + 1,
            action: Action::Add,
        });
    }
    index
}

#[test]
fn leaf_operators_cover_the_value_order() {
    let index = index_with(&[
        (1, Value::Int64(5)),
        (2, Value::Float64(7.5)),
        (3, Value::Int64(10)),
    ]);

    let eq = evaluate_leaf(&index, Operator::Eq, &[Value::Float64(5.0)], PRESENT).unwrap();
    assert_eq!(eq, HashSet::from([1]));

    let lt = evaluate_leaf(&index, Operator::Lt, &[Value::Int64(8)], PRESENT).unwrap();
    assert_eq!(lt, HashSet::from([1, 2]));

    let between = evaluate_leaf(
        &index,
        Operator::Between,
        &[Value::Int64(5), Value::Int64(10)],
        PRESENT,
    )
    .unwrap();
    assert_eq!(between, HashSet::from([1, 2]));
}

#[test]
fn bad_arity_is_reported() {
    let index = index_with(&[(1, Value::Int64(5))]);
    assert!(matches!(
        evaluate_leaf(&index, Operator::Eq, &[], PRESENT),
        Err(QueryError::Arity { .. })
    ));
    assert!(matches!(
        evaluate_leaf(&index, Operator::Between, &[Value::Int64(1)], PRESENT),
        Err(QueryError::Arity { .. })
    ));
}

#[test]
fn bad_patterns_are_reported() {
    let index = index_with(&[(1, Value::String("abc".into()))]);
    assert!(matches!(
        evaluate_leaf(&index, Operator::Regex, &[Value::String("(".into())], PRESENT),
        Err(QueryError::BadPattern(_))
    ));
    assert!(matches!(
        evaluate_leaf(&index, Operator::Regex, &[Value::Int64(1)], PRESENT),
        Err(QueryError::BadOperand(_))
    ));
}

#[test]
fn like_translates_wildcards() {
    let index = index_with(&[
        (1, Value::String("jeffery".into())),
        (2, Value::String("jeff".into())),
        (3, Value::String("geoff.x".into())),
    ]);

    let like = evaluate_leaf(
        &index,
        Operator::Like,
        &[Value::String("jeff%".into())],
        PRESENT,
    )
    .unwrap();
    assert_eq!(like, HashSet::from([1, 2]));

    // Literal dots are escaped, `_` matches exactly one char.
    let dotted = evaluate_leaf(
        &index,
        Operator::Like,
        &[Value::String("geoff._".into())],
        PRESENT,
    )
    .unwrap();
    assert_eq!(dotted, HashSet::from([3]));
}

#[test]
fn links_to_rejects_non_references() {
    let index = index_with(&[(1, Value::Link(9))]);
    assert!(matches!(
        evaluate_leaf(
            &index,
            Operator::LinksTo,
            &[Value::String("nine".into())],
            PRESENT
        ),
        Err(QueryError::BadOperand(_))
    ));
}

#[test]
fn malformed_postfix_queues_are_reported() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());
    engine.add("k", Value::Int64(1), 1).unwrap();

    // A conjunction with one operand underflows.
    let symbols = vec![
        Symbol::Expression {
            key: "k".into(),
            operator: Operator::Eq,
            values: vec![Value::Int64(1)],
        },
        Symbol::Conjunction(Conjunction::And),
    ];
    assert!(evaluate(&engine, &symbols).is_err());

    // Two expressions without a conjunction never reduce.
    let symbols = vec![
        Symbol::Expression {
            key: "k".into(),
            operator: Operator::Eq,
            values: vec![Value::Int64(1)],
        },
        Symbol::Expression {
            key: "k".into(),
            operator: Operator::Eq,
            values: vec![Value::Int64(1)],
        },
    ];
    assert!(evaluate(&engine, &symbols).is_err());
}

#[test]
fn timestamp_symbol_bounds_every_leaf() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path());

    engine.add("k", Value::Int64(1), 1).unwrap();
    let checkpoint = engine.time();
    engine.add("k", Value::Int64(1), 2).unwrap();

    let symbols = vec![
        Symbol::Expression {
            key: "k".into(),
            operator: Operator::Eq,
            values: vec![Value::Int64(1)],
        },
        Symbol::Timestamp(checkpoint),
    ];
    assert_eq!(evaluate(&engine, &symbols).unwrap(), HashSet::from([1]));
}
