//! Canonical-byte and total-order semantics.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::model::{MAX_DOUBLE_REPRESENTED_INTEGER, Value};

#[test]
fn lossless_numeric_equivalents_share_canonical_bytes() {
    let forms = [
        Value::Int32(18),
        Value::Int64(18),
        Value::Float32(18.0),
        Value::Float64(18.0),
        Value::Tag("18".into()),
        Value::String("18".into()),
    ];
    let reference = forms[0].canonical_bytes();
    for form in &forms {
        assert_eq!(form.canonical_bytes(), reference, "{form:?}");
        assert_eq!(*form, forms[0]);
    }
}

#[test]
fn non_integral_floats_keep_float_form() {
    assert_ne!(
        Value::Float64(18.5).canonical_bytes(),
        Value::Int64(18).canonical_bytes()
    );
    // f32 → f64 widening is exact, so the same fraction collapses.
    assert_eq!(
        Value::Float32(18.5).canonical_bytes(),
        Value::Float64(18.5).canonical_bytes()
    );
}

#[test]
fn huge_floats_do_not_collapse_to_int() {
    let beyond = (MAX_DOUBLE_REPRESENTED_INTEGER as f64) * 4.0;
    let v = Value::Float64(beyond);
    assert_eq!(v.canonical_bytes()[0], 0x03, "float class tag expected");
}

#[test]
fn text_that_does_not_round_trip_stays_text() {
    // Leading zero and trailing ".0" both fail the lossless round-trip.
    assert_ne!(Value::Tag("018".into()), Value::Int64(18));
    assert_ne!(Value::String("18.0".into()), Value::Int64(18));
    assert_eq!(Value::Tag("hello".into()), Value::String("hello".into()));
}

#[test]
fn cross_type_numeric_order_agrees_with_math() {
    let mut values = vec![
        Value::Float64(2.5),
        Value::Int64(-3),
        Value::Int32(10),
        Value::Float32(-3.5),
        Value::Int64(3),
    ];
    values.sort();
    let as_f64: Vec<f64> = values.iter().map(|v| v.as_f64().unwrap()).collect();
    assert_eq!(as_f64, vec![-3.5, -3.0, 2.5, 3.0, 10.0]);
}

#[test]
fn exact_comparison_beyond_double_precision() {
    // 2^60 and 2^60 + 1 collapse to the same f64; exact integer comparison
    // must still distinguish them.
    let a = Value::Int64(1 << 60);
    let b = Value::Int64((1 << 60) + 1);
    assert_eq!(a.compare(&b), Ordering::Less);
}

#[test]
fn huge_numeric_ties_stay_distinct() {
    // 2^60 is exactly representable as f64 but beyond the integer-collapse
    // bound, so the float keeps its float form.  The pair is numerically
    // equal yet must not compare Equal, or equality would disagree with
    // hashing.
    let int = Value::Int64(1 << 60);
    let float = Value::Float64((1u64 << 60) as f64);
    assert_ne!(int, float);
    assert_eq!(int.compare(&float), Ordering::Less);
    assert_eq!(float.compare(&int), Ordering::Greater);
}

#[test]
fn class_ranks_are_stable() {
    let b = Value::Bool(true);
    let n = Value::Int64(0);
    let t = Value::String("a".into());
    let l = Value::Link(1);
    let blob = Value::Blob(vec![0]);
    let ts = Value::Timestamp(0);

    let mut values = vec![
        ts.clone(),
        blob.clone(),
        l.clone(),
        t.clone(),
        n.clone(),
        b.clone(),
    ];
    values.sort();
    assert_eq!(values, vec![b, n, t, l, blob, ts]);
}

#[test]
fn hashing_follows_canonical_equality() {
    let mut set = HashSet::new();
    set.insert(Value::Int64(42));
    assert!(set.contains(&Value::Float64(42.0)));
    assert!(set.contains(&Value::Tag("42".into())));
    assert!(!set.contains(&Value::Float64(42.5)));
}

#[test]
fn string_and_blob_with_same_bytes_differ() {
    assert_ne!(Value::String("ab".into()), Value::Blob(b"ab".to_vec()));
}
