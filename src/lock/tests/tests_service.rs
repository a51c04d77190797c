//! Token lock refcounting, GC, and range claim conflicts.

use std::sync::Arc;
use std::thread;

use crate::lock::{Interval, LockService, RangeLockService, Token};
use crate::model::Value;

#[test]
fn tokens_are_canonical() {
    assert_eq!(Token::for_record(1), Token::for_record(1));
    assert_ne!(Token::for_record(1), Token::for_record(2));
    assert_ne!(Token::for_record(1), Token::for_key("1"));
    // Canonical value bytes drive the hash.
    assert_eq!(
        Token::for_value("age", &Value::Int64(18)),
        Token::for_value("age", &Value::Float64(18.0))
    );
}

#[test]
fn gc_removes_only_unreferenced_entries() {
    let service = LockService::new();
    let held = service.get_lock(Token::for_record(1));
    {
        let _dropped = service.get_lock(Token::for_record(2));
    }
    assert_eq!(service.len(), 2);

    let removed = service.gc();
    assert_eq!(removed, 1);
    assert_eq!(service.len(), 1);

    drop(held);
    assert_eq!(service.gc(), 1);
    assert!(service.is_empty());
}

#[test]
fn write_lock_excludes_concurrent_writers() {
    let service = Arc::new(LockService::new());
    let counter = Arc::new(std::sync::Mutex::new(0u64));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let counter = Arc::clone(&counter);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let handle = service.get_lock(Token::for_field(1, "balance"));
                let _guard = handle.write();
                let mut count = counter.lock().unwrap();
                *count += 1;
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*counter.lock().unwrap(), 800);
}

#[test]
fn point_in_range_conflict_is_detected() {
    let ranges = RangeLockService::new();
    ranges.register_read(1, "foo", Interval::between(Value::Int64(5), Value::Int64(20)));

    // Another operation writing inside the range is refused.
    assert!(!ranges.try_register_write(2, "foo", &Value::Int64(15)));
    // Outside the range is fine.
    assert!(ranges.try_register_write(2, "foo", &Value::Int64(25)));
    // The owner of the range may write into it.
    assert!(ranges.try_register_write(1, "foo", &Value::Int64(10)));
}

#[test]
fn readers_detect_existing_points() {
    let ranges = RangeLockService::new();
    assert!(ranges.try_register_write(1, "foo", &Value::Int64(15)));

    let interval = Interval::between(Value::Int64(5), Value::Int64(20));
    assert!(ranges.range_conflicts(2, "foo", &interval));
    assert!(!ranges.range_conflicts(1, "foo", &interval));
    assert!(!ranges.range_conflicts(
        2,
        "foo",
        &Interval::between(Value::Int64(30), Value::Int64(40))
    ));
}

#[test]
fn release_clears_all_claims() {
    let ranges = RangeLockService::new();
    ranges.register_read(1, "foo", Interval::all());
    assert!(!ranges.try_register_write(2, "foo", &Value::Int64(1)));

    ranges.release(1);
    assert!(ranges.try_register_write(2, "foo", &Value::Int64(1)));
}

#[test]
fn claims_are_per_key() {
    let ranges = RangeLockService::new();
    ranges.register_read(1, "foo", Interval::all());
    assert!(ranges.try_register_write(2, "bar", &Value::Int64(1)));
}
