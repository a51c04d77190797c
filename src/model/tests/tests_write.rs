//! Write wire-format round trips and key validation.

use crate::encoding::{Decode, encode_to_vec};
use crate::model::{Action, Key, ModelError, Value, ValueKind, Write};

fn sample_write(value: Value) -> Write {
    Write::add(7, Key::new("name").unwrap(), value, 1_000_001)
}

#[test]
fn write_round_trips_every_value_kind() {
    let values = [
        Value::Bool(true),
        Value::Int32(-5),
        Value::Int64(i64::MIN),
        Value::Float32(3.25),
        Value::Float64(-0.125),
        Value::String("hello world".into()),
        Value::Tag("tagged".into()),
        Value::Link(99),
        Value::Blob(vec![0, 255, 1, 254]),
        Value::Timestamp(1_700_000_000_000_000),
    ];

    for value in values {
        let w = sample_write(value);
        let bytes = encode_to_vec(&w).unwrap();
        let (back, consumed) = Write::decode_from(&bytes).unwrap();
        assert_eq!(back, w);
        assert_eq!(consumed, bytes.len());
    }
}

#[test]
fn decoded_value_is_bit_exact() {
    // A float that canonicalizes to int form must still decode to its
    // original bits — persistence is bit-exact even when equality is not.
    let w = sample_write(Value::Float64(18.0));
    let bytes = encode_to_vec(&w).unwrap();
    let (back, _) = Write::decode_from(&bytes).unwrap();
    match back.value {
        Value::Float64(f) => assert_eq!(f.to_bits(), 18.0f64.to_bits()),
        other => panic!("expected Float64, got {other:?}"),
    }
}

#[test]
fn remove_action_round_trips() {
    let mut w = sample_write(Value::Int64(1));
    w.action = Action::Remove;
    let bytes = encode_to_vec(&w).unwrap();
    let (back, _) = Write::decode_from(&bytes).unwrap();
    assert_eq!(back.action, Action::Remove);
}

#[test]
fn key_rejects_empty_and_nul() {
    assert!(matches!(Key::new(""), Err(ModelError::EmptyKey)));
    assert!(matches!(Key::new("a\0b"), Err(ModelError::EmbeddedNul)));
    assert!(Key::new("ok").is_ok());
}

#[test]
fn key_rejects_oversized() {
    let long = "k".repeat(crate::model::MAX_KEY_LENGTH + 1);
    assert!(matches!(Key::new(long), Err(ModelError::KeyTooLong(_))));
}

#[test]
fn value_payload_round_trips() {
    let v = Value::String("payload".into());
    let payload = v.payload();
    let back = Value::from_payload(ValueKind::String, &payload).unwrap();
    assert_eq!(back, v);
}

#[test]
fn malformed_payload_is_rejected() {
    assert!(Value::from_payload(ValueKind::Int64, &[1, 2, 3]).is_err());
    assert!(Value::from_payload(ValueKind::Bool, &[7]).is_err());
}
