//! Round-trip tests for primitive encodings.

use crate::encoding::{Decode, decode_from_slice, decode_vec, encode_to_vec, encode_vec};

#[test]
fn integers_round_trip() {
    let cases_u64: &[u64] = &[0, 1, 255, 256, u64::MAX];
    for &v in cases_u64 {
        let bytes = encode_to_vec(&v).unwrap();
        assert_eq!(bytes.len(), 8);
        let (back, n) = decode_from_slice::<u64>(&bytes).unwrap();
        assert_eq!((back, n), (v, 8));
    }

    let cases_i64: &[i64] = &[i64::MIN, -1, 0, 1, i64::MAX];
    for &v in cases_i64 {
        let bytes = encode_to_vec(&v).unwrap();
        let (back, _) = decode_from_slice::<i64>(&bytes).unwrap();
        assert_eq!(back, v);
    }
}

#[test]
fn integers_are_big_endian() {
    let bytes = encode_to_vec(&0x0102_0304u32).unwrap();
    assert_eq!(bytes, vec![0x01, 0x02, 0x03, 0x04]);

    let bytes = encode_to_vec(&0x0102u16).unwrap();
    assert_eq!(bytes, vec![0x01, 0x02]);
}

#[test]
fn bool_round_trip_and_rejects_garbage() {
    assert_eq!(encode_to_vec(&true).unwrap(), vec![1]);
    assert_eq!(encode_to_vec(&false).unwrap(), vec![0]);
    assert!(bool::decode_from(&[2]).is_err());
}

#[test]
fn byte_vectors_and_strings() {
    let v: Vec<u8> = vec![9, 8, 7];
    let bytes = encode_to_vec(&v).unwrap();
    assert_eq!(bytes, vec![0, 0, 0, 3, 9, 8, 7]);
    let (back, n) = Vec::<u8>::decode_from(&bytes).unwrap();
    assert_eq!((back, n), (v, 7));

    let s = String::from("héllo");
    let bytes = encode_to_vec(&s).unwrap();
    let (back, _) = String::decode_from(&bytes).unwrap();
    assert_eq!(back, s);
}

#[test]
fn option_round_trip() {
    let some: Option<u32> = Some(42);
    let none: Option<u32> = None;

    let bytes = encode_to_vec(&some).unwrap();
    let (back, _) = Option::<u32>::decode_from(&bytes).unwrap();
    assert_eq!(back, Some(42));

    let bytes = encode_to_vec(&none).unwrap();
    assert_eq!(bytes, vec![0]);
    let (back, _) = Option::<u32>::decode_from(&bytes).unwrap();
    assert_eq!(back, None);
}

#[test]
fn vec_of_structs_round_trip() {
    let items: Vec<u64> = vec![1, 2, 3, 4];
    let mut buf = Vec::new();
    encode_vec(&items, &mut buf).unwrap();
    let (back, consumed) = decode_vec::<u64>(&buf).unwrap();
    assert_eq!(back, items);
    assert_eq!(consumed, buf.len());
}

#[test]
fn decode_reports_eof() {
    let err = u64::decode_from(&[1, 2, 3]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("unexpected end of buffer"), "{msg}");
}
